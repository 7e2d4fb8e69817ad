//! Hub transport contract for simulated IoT device fleets.
//!
//! The simulator treats the message hub as an external collaborator. This
//! crate pins down exactly what it needs from one:
//!
//! - **[`Transport`] / [`Connection`]**: open a per-device handle from a
//!   [`ConnectionString`] and [`Protocol`], publish [`OutboundMessage`]s,
//!   acknowledge [`InboundMessage`]s, and observe [`ConnectionEvent`]s on the
//!   handle's [`Session`] event stream.
//! - **[`MemoryHub`]**: an in-process transport with scriptable failures,
//!   used by the `fleetsim` binary and by every test suite in the workspace.
//! - **[`ReconnectConfig`]**: immediate or exponential-backoff reconnection.

pub mod credential;
pub mod error;
pub mod memory;
pub mod message;
pub mod protocol;
pub mod reconnect;
pub mod transport;

pub use credential::{ConnectionString, DEFAULT_HOST_SUFFIX};
pub use error::Error;
pub use memory::{DEFAULT_RETENTION, MemoryConnection, MemoryHub};
pub use message::{
    CONTENT_TYPE_JSON, InboundMessage, MessageId, MessageProperties, OutboundMessage, SendReceipt,
};
pub use protocol::Protocol;
pub use reconnect::{ReconnectConfig, calculate_backoff};
pub use transport::{Connection, ConnectionEvent, Session, Transport};
