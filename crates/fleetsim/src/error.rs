//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use fleetsim_config::ConfigError;
use fleetsim_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(
        code(fleetsim::config_invalid),
        help("Fix the value in {path} or the matching FLEETSIM_* variable.")
    )]
    ConfigInvalid {
        field: String,
        reason: String,
        path: String,
    },

    #[error("No key configured for device '{device}'")]
    #[diagnostic(
        code(fleetsim::no_credentials),
        help(
            "Set `key_env`, `key` or `connection_string` for the device,\n\
             or store the key in the system keyring under service 'fleetsim'."
        )
    )]
    NoCredentials { device: String },

    #[error(transparent)]
    #[diagnostic(code(fleetsim::config))]
    ConfigLoad(Box<figment::Error>),

    #[error("Config file already exists at {path}")]
    #[diagnostic(
        code(fleetsim::config_exists),
        help("Pass --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(fleetsim::usage))]
    Usage { field: String, reason: String },

    // ── Connection ───────────────────────────────────────────────────

    #[error("Device {device} could not connect")]
    #[diagnostic(
        code(fleetsim::connection_failed),
        help("Reason: {reason}\nCheck hub_name and the device credentials.")
    )]
    ConnectionFailed { device: String, reason: String },

    #[error("Every device failed to connect ({count} device(s))")]
    #[diagnostic(
        code(fleetsim::all_devices_failed),
        help("Check hub_name and host_suffix, then rerun with -v for details.")
    )]
    AllDevicesFailed { count: usize },

    #[error("Timed out after {seconds}s with {pending} device(s) still connecting")]
    #[diagnostic(
        code(fleetsim::timeout),
        help("Increase --connect-timeout or check hub responsiveness.")
    )]
    Timeout { seconds: u64, pending: usize },

    // ── Fleet ────────────────────────────────────────────────────────

    #[error("Device '{identifier}' not found")]
    #[diagnostic(
        code(fleetsim::not_found),
        help("Run: fleetsim roster to see configured devices")
    )]
    NotFound { identifier: String },

    #[error("Invalid credential for device {device}: {reason}")]
    #[diagnostic(code(fleetsim::invalid_credential))]
    InvalidCredential { device: String, reason: String },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON rendering failed: {0}")]
    #[diagnostic(code(fleetsim::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigInvalid { .. }
            | Self::NoCredentials { .. }
            | Self::ConfigLoad(_)
            | Self::ConfigExists { .. }
            | Self::InvalidCredential { .. } => exit_code::CONFIG,
            Self::Usage { .. } => exit_code::USAGE,
            Self::ConnectionFailed { .. } | Self::AllDevicesFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }

    /// Attach the config path to a `ConfigError`.
    pub fn from_config(err: ConfigError, path: &std::path::Path) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::ConfigInvalid {
                field,
                reason,
                path: path.display().to_string(),
            },
            other => other.into(),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::ConfigInvalid {
                field,
                reason,
                path: "the config file".into(),
            },
            ConfigError::NoCredentials { device } => Self::NoCredentials { device },
            ConfigError::Figment(err) => Self::ConfigLoad(err),
            ConfigError::Serialization(err) => Self::Io(std::io::Error::other(err)),
            ConfigError::Io(err) => Self::Io(err),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { device, reason } => {
                Self::ConnectionFailed { device, reason }
            }
            CoreError::HubUnreachable { host, reason } => Self::ConnectionFailed {
                device: format!("(hub {host})"),
                reason,
            },
            CoreError::Timeout {
                timeout_secs,
                pending,
            } => Self::Timeout {
                seconds: timeout_secs,
                pending,
            },
            CoreError::DeviceNotFound { identifier } => Self::NotFound { identifier },
            CoreError::InvalidCredential { device, reason } => {
                Self::InvalidCredential { device, reason }
            }
            CoreError::Config { message } => Self::ConfigInvalid {
                field: "fleet".into(),
                reason: message,
                path: "the config file".into(),
            },
            CoreError::Encoding(err) => Self::Json(err),
            CoreError::Transport { message } => Self::ConnectionFailed {
                device: "(transport)".into(),
                reason: message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_class() {
        let timeout: CliError = CoreError::Timeout {
            timeout_secs: 10,
            pending: 2,
        }
        .into();
        assert_eq!(timeout.exit_code(), exit_code::TIMEOUT);

        let missing: CliError = CoreError::DeviceNotFound {
            identifier: "device9999".into(),
        }
        .into();
        assert_eq!(missing.exit_code(), exit_code::NOT_FOUND);

        let no_key: CliError = ConfigError::NoCredentials {
            device: "device1000".into(),
        }
        .into();
        assert_eq!(no_key.exit_code(), exit_code::CONFIG);

        let all_failed = CliError::AllDevicesFailed { count: 3 };
        assert_eq!(all_failed.exit_code(), exit_code::CONNECTION);
    }

    #[test]
    fn validation_errors_name_the_config_path() {
        let err = CliError::from_config(
            ConfigError::Validation {
                field: "frequency_ms".into(),
                reason: "must be greater than zero".into(),
            },
            std::path::Path::new("/tmp/fleetsim.toml"),
        );
        match err {
            CliError::ConfigInvalid { field, path, .. } => {
                assert_eq!(field, "frequency_ms");
                assert_eq!(path, "/tmp/fleetsim.toml");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
