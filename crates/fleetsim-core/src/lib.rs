//! Device simulation engine for fleetsim.
//!
//! Drives many independent per-device state machines against a hub
//! [`Transport`](fleetsim_api::Transport):
//!
//! - **[`Device`]**: one device's transport handle and [`ConnectionState`].
//!   Connects without blocking, reconnects after unsolicited disconnects,
//!   acknowledges cloud-to-device messages, and ignores callbacks from
//!   replaced handles via handle epochs.
//! - **[`PublishLoop`]**: the per-device periodic timer, cancelled through
//!   a [`CancellationToken`](tokio_util::sync::CancellationToken).
//! - **[`DataGenerator`]**: pluggable reading sources. [`GeneratorKind`]
//!   builds the temperature, humidity, and uniform variants.
//! - **[`Fleet`]**: builds devices from a [`FleetConfig`] roster with
//!   jittered intervals and runs them concurrently.
//!
//! All runtime faults are logged through `tracing` and surfaced as state
//! and [`DeviceStats`]; [`CoreError`] covers building and waiting on a
//! fleet.

pub mod config;
pub mod device;
pub mod error;
pub mod fleet;
pub mod generator;
pub mod model;
pub mod publish;

pub use config::{DeviceCredential, DeviceSettings, FleetConfig, LogSettings, RosterEntry};
pub use device::Device;
pub use error::CoreError;
pub use fleet::{Fleet, jittered_interval};
pub use generator::{
    DataGenerator, GeneratorKind, HumidityGenerator, TemperatureGenerator, UniformGenerator,
    WaveformGenerator, WaveformParams, seconds_into_cycle, truncate_1_decimal,
};
pub use model::{
    ConnectionState, DeviceIdentity, DeviceStats, DeviceSummary, Reading, StateChange,
    TickOutcome,
};
pub use publish::PublishLoop;
