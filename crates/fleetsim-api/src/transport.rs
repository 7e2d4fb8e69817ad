// ── Transport contract ──
//
// The hub transport is an external collaborator: the simulator only needs
// to open a per-device handle, publish on it, acknowledge inbound
// messages, and observe its events. Implementations own the wire protocol.

use std::future::Future;

use tokio::sync::mpsc;

use crate::credential::ConnectionString;
use crate::error::Error;
use crate::message::{InboundMessage, MessageId, OutboundMessage, SendReceipt};
use crate::protocol::Protocol;

/// Event emitted by an open connection, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Cloud-to-device message awaiting acknowledgement.
    Message(InboundMessage),
    /// Non-fatal transport fault. The handle may still be usable.
    Error(Error),
    /// The hub tore the handle down. No further events follow.
    Disconnected,
}

/// A freshly opened handle plus its event stream.
///
/// Dropping `events` detaches every listener from the handle; the
/// transport keeps delivering into a closed channel and discards.
#[derive(Debug)]
pub struct Session<C> {
    pub connection: C,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

/// One open device-to-hub handle.
pub trait Connection: Send + Sync + 'static {
    /// Publish a device-to-cloud message. Resolves once the hub accepts
    /// or rejects it.
    fn send(
        &self,
        message: OutboundMessage,
    ) -> impl Future<Output = Result<SendReceipt, Error>> + Send;

    /// Complete a cloud-to-device message so the hub stops redelivering it.
    fn acknowledge(&self, id: &MessageId) -> impl Future<Output = Result<(), Error>> + Send;

    /// Tear the handle down from the device side. Idempotent.
    fn close(&self);
}

/// Factory for device handles.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;

    /// Open a handle for the device identified by `credential`.
    fn open(
        &self,
        credential: &ConnectionString,
        protocol: Protocol,
    ) -> impl Future<Output = Result<Session<Self::Connection>, Error>> + Send;
}
