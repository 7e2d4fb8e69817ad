// ── Device connection strings ──
//
// A device authenticates to the hub with a connection string of the form
// `HostName=<hub>.<suffix>;DeviceId=<id>;SharedAccessKey=<key>`. The key
// is held as a `SecretString` and never rendered by `Debug` or `Display`.

use std::fmt;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

/// Default DNS suffix appended to a bare hub name.
pub const DEFAULT_HOST_SUFFIX: &str = "azure-devices.net";

const HOST_NAME: &str = "HostName";
const DEVICE_ID: &str = "DeviceId";
const SHARED_ACCESS_KEY: &str = "SharedAccessKey";

/// Opaque per-device credential used to open a hub connection.
#[derive(Clone)]
pub struct ConnectionString {
    host_name: String,
    device_id: String,
    shared_access_key: SecretString,
}

impl ConnectionString {
    /// Build a connection string for `device_id` on hub `hub_name`.
    ///
    /// `host_suffix` is appended as `<hub_name>.<host_suffix>`.
    pub fn new(
        hub_name: &str,
        host_suffix: &str,
        device_id: impl Into<String>,
        shared_access_key: SecretString,
    ) -> Self {
        Self {
            host_name: format!("{hub_name}.{host_suffix}"),
            device_id: device_id.into(),
            shared_access_key,
        }
    }

    /// Fully qualified hub host, e.g. `my-iothub.azure-devices.net`.
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn shared_access_key(&self) -> &SecretString {
        &self.shared_access_key
    }

    /// Render the full connection string, key included.
    ///
    /// Only transports should call this; everything else logs the
    /// redacted [`Display`] form.
    pub fn expose_secret(&self) -> String {
        format!(
            "{HOST_NAME}={};{DEVICE_ID}={};{SHARED_ACCESS_KEY}={}",
            self.host_name,
            self.device_id,
            self.shared_access_key.expose_secret()
        )
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{HOST_NAME}={};{DEVICE_ID}={};{SHARED_ACCESS_KEY}=<redacted>",
            self.host_name, self.device_id
        )
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("host_name", &self.host_name)
            .field("device_id", &self.device_id)
            .field("shared_access_key", &"<redacted>")
            .finish()
    }
}

impl FromStr for ConnectionString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut host_name = None;
        let mut device_id = None;
        let mut key = None;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // Keys are base64 and may themselves end in '='; split on the first only.
            let (name, value) = part
                .split_once('=')
                .ok_or_else(|| invalid(format!("segment '{part}' is not a key=value pair")))?;
            match name {
                HOST_NAME => host_name = Some(value.to_owned()),
                DEVICE_ID => device_id = Some(value.to_owned()),
                SHARED_ACCESS_KEY => key = Some(value.to_owned()),
                // Gateway and module segments are tolerated but unused.
                _ => {}
            }
        }

        let host_name = host_name
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing HostName".into()))?;
        let device_id = device_id
            .filter(|d| !d.is_empty())
            .ok_or_else(|| invalid("missing DeviceId".into()))?;
        let key = key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| invalid("missing SharedAccessKey".into()))?;

        Ok(Self {
            host_name,
            device_id,
            shared_access_key: SecretString::from(key),
        })
    }
}

fn invalid(reason: String) -> Error {
    Error::InvalidConnectionString { reason }
}
