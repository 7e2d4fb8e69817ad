use thiserror::Error;

/// Top-level error type for the `fleetsim-api` crate.
///
/// Covers every failure a hub transport can report: opening a handle,
/// publishing, acknowledging inbound messages, and credential parsing.
/// `fleetsim-core` maps these into device-level outcomes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// The hub could not be reached or refused the connection.
    #[error("Connection to {host} refused: {reason}")]
    ConnectionRefused { host: String, reason: String },

    /// The handle was used after the hub tore it down.
    #[error("Connection is closed")]
    NotConnected,

    // ── Messaging ───────────────────────────────────────────────────
    /// Publishing a device-to-cloud message failed.
    #[error("Send failed: {reason}")]
    SendFailed { reason: String },

    /// Completing a cloud-to-device message failed.
    #[error("Acknowledgement of message {id} failed: {reason}")]
    AckFailed { id: String, reason: String },

    // ── Credentials ─────────────────────────────────────────────────
    /// The device connection string is malformed.
    #[error("Invalid connection string: {reason}")]
    InvalidConnectionString { reason: String },

    // ── Transport ───────────────────────────────────────────────────
    /// Any other transport-level fault surfaced on the event stream.
    #[error("Transport error: {0}")]
    Transport(String),
}
