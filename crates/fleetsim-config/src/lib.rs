//! Configuration for fleetsim.
//!
//! TOML fleet profile, environment overrides, device key resolution
//! (env + keyring + plaintext), and translation to
//! `fleetsim_core::FleetConfig`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fleetsim_api::{DEFAULT_HOST_SUFFIX, Protocol, ReconnectConfig};
use fleetsim_core::{
    DeviceCredential, DeviceSettings, FleetConfig, GeneratorKind, LogSettings, RosterEntry,
};

/// Environment variable prefix; nested keys split on `__`.
pub const ENV_PREFIX: &str = "FLEETSIM_";

const KEYRING_SERVICE: &str = "fleetsim";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no key configured for device '{device}'")]
    NoCredentials { device: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level `fleetsim.toml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Hub name, without the DNS suffix.
    #[serde(default = "default_hub_name")]
    pub hub_name: String,

    #[serde(default = "default_host_suffix")]
    pub host_suffix: String,

    #[serde(default)]
    pub protocol: Protocol,

    /// Base publish interval.
    #[serde(default = "default_frequency_ms")]
    pub frequency_ms: u64,

    /// Jitter window, centered on `frequency_ms`.
    #[serde(default = "default_randomness_ms")]
    pub randomness_ms: u64,

    /// Fleet-wide generator; devices may override.
    #[serde(default)]
    pub generator: GeneratorKind,

    /// Log successful send status at info level.
    #[serde(default)]
    pub send_status: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,

    /// Fixed seed for jitter and generators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[serde(default)]
    pub reconnect: ReconnectSection,

    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hub_name: default_hub_name(),
            host_suffix: default_host_suffix(),
            protocol: Protocol::default(),
            frequency_ms: default_frequency_ms(),
            randomness_ms: default_randomness_ms(),
            generator: GeneratorKind::default(),
            send_status: false,
            max_in_flight: None,
            seed: None,
            reconnect: ReconnectSection::default(),
            devices: Vec::new(),
        }
    }
}

fn default_hub_name() -> String {
    "my-iothub".into()
}
fn default_host_suffix() -> String {
    DEFAULT_HOST_SUFFIX.into()
}
fn default_frequency_ms() -> u64 {
    1000
}
fn default_randomness_ms() -> u64 {
    10
}
fn default_max_delay_ms() -> u64 {
    30_000
}

/// `[reconnect]` table. An `initial_delay_ms` of zero reconnects
/// immediately.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReconnectSection {
    #[serde(default)]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_delay_ms: 0,
            max_delay_ms: default_max_delay_ms(),
            max_retries: None,
        }
    }
}

impl ReconnectSection {
    pub fn to_reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_retries: self.max_retries,
        }
    }
}

/// One `[[devices]]` entry.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeviceEntry {
    pub id: String,

    /// Shared access key (plaintext; prefer `key_env` or the keyring).
    #[serde(default, skip_serializing_if = "Option::is_none", with = "secret")]
    pub key: Option<SecretString>,

    /// Environment variable holding the shared access key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_env: Option<String>,

    /// Full device connection string, instead of a key.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "secret")]
    pub connection_string: Option<SecretString>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<GeneratorKind>,
}

/// Plaintext in, redacted out. A file written by [`save_config_to`]
/// carries the placeholder, which [`Config::validate`] refuses.
mod secret {
    use secrecy::SecretString;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const REDACTED: &str = "********";

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<SecretString>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(_) => s.serialize_str(REDACTED),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SecretString>, D::Error> {
        Ok(Option::<String>::deserialize(d)?.map(SecretString::from))
    }

    pub fn is_redacted(value: Option<&SecretString>) -> bool {
        use secrecy::ExposeSecret;
        value.is_some_and(|v| v.expose_secret() == REDACTED)
    }
}

impl Config {
    /// The reference fleet: eleven devices, `device1000` to `device1010`,
    /// each reading its key from `<ID>_KEY`.
    pub fn reference() -> Self {
        Self {
            devices: (1000..=1010)
                .map(|n| DeviceEntry {
                    id: format!("device{n}"),
                    key_env: Some(format!("DEVICE{n}_KEY")),
                    ..DeviceEntry::default()
                })
                .collect(),
            ..Self::default()
        }
    }

    /// Replace the roster with `count` devices numbered from
    /// `device1000`, each with a placeholder key.
    pub fn with_synthetic_roster(mut self, count: usize) -> Self {
        self.devices = (1000..)
            .take(count)
            .map(|n: u64| {
                let id = format!("device{n}");
                DeviceEntry {
                    key: Some(SecretString::from(format!("{id}-simulated"))),
                    id,
                    ..DeviceEntry::default()
                }
            })
            .collect();
        self
    }

    /// Check everything that can be checked without resolving keys.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub_name.trim().is_empty() {
            return Err(invalid("hub_name", "must not be empty"));
        }
        if self.host_suffix.trim().is_empty() {
            return Err(invalid("host_suffix", "must not be empty"));
        }
        if self.frequency_ms == 0 {
            return Err(invalid("frequency_ms", "must be greater than zero"));
        }
        if self.randomness_ms >= self.frequency_ms.saturating_mul(2) {
            return Err(invalid(
                "randomness_ms",
                format!(
                    "must be less than twice frequency_ms ({} >= {})",
                    self.randomness_ms,
                    self.frequency_ms.saturating_mul(2)
                ),
            ));
        }
        if self.max_in_flight == Some(0) {
            return Err(invalid("max_in_flight", "must be at least 1"));
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(invalid(
                "reconnect.max_delay_ms",
                "must not be less than reconnect.initial_delay_ms",
            ));
        }
        if self.devices.is_empty() {
            return Err(invalid("devices", "at least one device is required"));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.id.trim().is_empty() {
                return Err(invalid("devices.id", "must not be empty"));
            }
            if !seen.insert(device.id.as_str()) {
                return Err(invalid(
                    "devices.id",
                    format!("duplicate device id '{}'", device.id),
                ));
            }
            for (field, value) in [
                ("devices.key", device.key.as_ref()),
                ("devices.connection_string", device.connection_string.as_ref()),
            ] {
                if secret::is_redacted(value) {
                    return Err(invalid(
                        field,
                        format!(
                            "'{}' holds the redacted placeholder; restore the real value or use key_env",
                            device.id
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "fleetsim", "fleetsim").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("fleetsim.toml");
            p
        },
        |dirs| dirs.config_dir().join("fleetsim.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("fleetsim");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file at `path` (if present), then
/// `FLEETSIM_*` environment variables.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment(path).extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Render as TOML. Keys are written redacted.
pub fn render_config(cfg: &Config) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(cfg)?)
}

/// Write `cfg` to `path`, creating parent directories. Plaintext keys are
/// redacted, so the file must be edited before those devices can run.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_config(cfg)?)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve a device's credential: `key_env`, then the system keyring,
/// then a plaintext `key`, then a plaintext `connection_string`.
pub fn resolve_device_credential(
    device: &DeviceEntry,
    hub_name: &str,
) -> Result<DeviceCredential, ConfigError> {
    // 1. Entry's key_env → env var lookup
    if let Some(ref env_name) = device.key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(DeviceCredential::Key(SecretString::from(val)));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{hub_name}/{}", device.id)) {
        if let Ok(secret) = entry.get_password() {
            return Ok(DeviceCredential::Key(SecretString::from(secret)));
        }
    }

    // 3. Plaintext in config
    if let Some(ref key) = device.key {
        return Ok(DeviceCredential::Key(key.clone()));
    }
    if let Some(ref raw) = device.connection_string {
        return Ok(DeviceCredential::ConnectionString(raw.clone()));
    }

    Err(ConfigError::NoCredentials {
        device: device.id.clone(),
    })
}

/// Validate `cfg`, resolve every device key, and build the runtime
/// fleet configuration.
pub fn to_fleet_config(cfg: &Config) -> Result<FleetConfig, ConfigError> {
    cfg.validate()?;

    let devices = cfg
        .devices
        .iter()
        .map(|device| {
            Ok(RosterEntry {
                id: device.id.clone(),
                credential: resolve_device_credential(device, &cfg.hub_name)?,
                generator: device.generator,
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(FleetConfig {
        hub_name: cfg.hub_name.clone(),
        host_suffix: cfg.host_suffix.clone(),
        protocol: cfg.protocol,
        frequency: Duration::from_millis(cfg.frequency_ms),
        randomness: Duration::from_millis(cfg.randomness_ms),
        generator: cfg.generator,
        devices,
        settings: DeviceSettings {
            reconnect: cfg.reconnect.to_reconnect_config(),
            max_in_flight: cfg.max_in_flight,
            log: LogSettings {
                send_status: cfg.send_status,
            },
        },
        seed: cfg.seed,
    })
}
