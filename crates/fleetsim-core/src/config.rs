// ── Runtime configuration ──
//
// These types describe a fleet at runtime. They are built in memory by
// callers (the CLI, tests). fleetsim-core never reads config files;
// fleetsim-config translates its TOML profile into `FleetConfig`.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use fleetsim_api::{ConnectionString, DEFAULT_HOST_SUFFIX, Protocol, ReconnectConfig};

use crate::error::CoreError;
use crate::generator::GeneratorKind;

/// Logging knobs passed down to every device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogSettings {
    /// Log successful send status at `info` instead of `debug`.
    pub send_status: bool,
}

/// How a roster entry authenticates.
#[derive(Clone)]
pub enum DeviceCredential {
    /// Shared access key; host is derived from the fleet's hub name.
    Key(SecretString),
    /// A full `HostName=..;DeviceId=..;SharedAccessKey=..` string.
    ConnectionString(SecretString),
}

impl std::fmt::Debug for DeviceCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Key(_) => f.write_str("Key(***)"),
            Self::ConnectionString(_) => f.write_str("ConnectionString(***)"),
        }
    }
}

/// One device in the roster.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub id: String,
    pub credential: DeviceCredential,
    /// Overrides the fleet-wide generator.
    pub generator: Option<GeneratorKind>,
}

impl RosterEntry {
    pub fn with_key(id: impl Into<String>, key: SecretString) -> Self {
        Self {
            id: id.into(),
            credential: DeviceCredential::Key(key),
            generator: None,
        }
    }
}

/// Settings shared by every device in a fleet.
#[derive(Debug, Clone, Default)]
pub struct DeviceSettings {
    pub reconnect: ReconnectConfig,
    /// Cap on unacknowledged sends per device. `None` is unbounded.
    pub max_in_flight: Option<usize>,
    pub log: LogSettings,
}

/// Everything needed to build and run a fleet.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub hub_name: String,
    pub host_suffix: String,
    pub protocol: Protocol,
    /// Base publish interval.
    pub frequency: Duration,
    /// Width of the jitter window centered on `frequency`.
    pub randomness: Duration,
    pub generator: GeneratorKind,
    pub devices: Vec<RosterEntry>,
    pub settings: DeviceSettings,
    /// Seeds interval jitter and generators for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            hub_name: "my-iothub".into(),
            host_suffix: DEFAULT_HOST_SUFFIX.into(),
            protocol: Protocol::default(),
            frequency: Duration::from_millis(1000),
            randomness: Duration::from_millis(10),
            generator: GeneratorKind::default(),
            devices: Vec::new(),
            settings: DeviceSettings::default(),
            seed: None,
        }
    }
}

impl FleetConfig {
    /// Resolve the hub credential for one roster entry.
    pub fn credential_for(&self, entry: &RosterEntry) -> Result<ConnectionString, CoreError> {
        match &entry.credential {
            DeviceCredential::Key(key) => Ok(ConnectionString::new(
                &self.hub_name,
                &self.host_suffix,
                entry.id.clone(),
                key.clone(),
            )),
            DeviceCredential::ConnectionString(raw) => {
                let parsed: ConnectionString =
                    raw.expose_secret().parse().map_err(|e: fleetsim_api::Error| {
                        CoreError::InvalidCredential {
                            device: entry.id.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                if parsed.device_id() != entry.id {
                    return Err(CoreError::InvalidCredential {
                        device: entry.id.clone(),
                        reason: format!(
                            "connection string is for device {}",
                            parsed.device_id()
                        ),
                    });
                }
                Ok(parsed)
            }
        }
    }

    /// Reject configurations no fleet can run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.hub_name.trim().is_empty() {
            return Err(config_error("hub name must not be empty"));
        }
        if self.frequency.is_zero() {
            return Err(config_error("publish frequency must be greater than zero"));
        }
        if self.randomness >= self.frequency * 2 {
            return Err(config_error(
                "randomness must be less than twice the publish frequency",
            ));
        }
        if self.devices.is_empty() {
            return Err(config_error("roster has no devices"));
        }
        if self.settings.max_in_flight == Some(0) {
            return Err(config_error("max_in_flight must be at least 1"));
        }

        let mut seen = std::collections::HashSet::new();
        for entry in &self.devices {
            if entry.id.trim().is_empty() {
                return Err(config_error("device id must not be empty"));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(config_error(&format!("duplicate device id: {}", entry.id)));
            }
        }
        Ok(())
    }
}

fn config_error(message: &str) -> CoreError {
    CoreError::Config {
        message: message.to_owned(),
    }
}
