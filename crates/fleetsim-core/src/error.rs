// ── Core error types ──
//
// Errors surfaced to callers of fleetsim-core. Runtime device faults are
// never returned from here; they land in `ConnectionState` and
// `DeviceStats`. These cover building a fleet and waiting on it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Device {device} could not connect: {reason}")]
    ConnectionFailed { device: String, reason: String },

    #[error("Hub {host} unreachable: {reason}")]
    HubUnreachable { host: String, reason: String },

    #[error("Timed out after {timeout_secs}s waiting for {pending} device(s) to connect")]
    Timeout { timeout_secs: u64, pending: usize },

    // ── Fleet errors ─────────────────────────────────────────────────
    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    #[error("Invalid credential for device {device}: {reason}")]
    InvalidCredential { device: String, reason: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Payload errors ───────────────────────────────────────────────
    #[error("Payload encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    // ── Transport errors (wrapped) ───────────────────────────────────
    #[error("Transport error: {message}")]
    Transport { message: String },
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<fleetsim_api::Error> for CoreError {
    fn from(err: fleetsim_api::Error) -> Self {
        match err {
            fleetsim_api::Error::ConnectionRefused { host, reason } => {
                CoreError::HubUnreachable { host, reason }
            }
            fleetsim_api::Error::InvalidConnectionString { reason } => {
                CoreError::InvalidCredential {
                    device: "<unknown>".into(),
                    reason,
                }
            }
            other => CoreError::Transport {
                message: other.to_string(),
            },
        }
    }
}
