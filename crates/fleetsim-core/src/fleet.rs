// ── Fleet runner ──
//
// Builds one `Device` per roster entry, each with its own jittered
// publish interval, and starts them all at once. Devices share nothing
// but the transport and the root cancellation token.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use fleetsim_api::Transport;

use crate::config::FleetConfig;
use crate::device::Device;
use crate::error::CoreError;
use crate::model::{ConnectionState, DeviceIdentity, DeviceSummary};

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// `frequency + offset`, with `offset` drawn from
/// `[-randomness/2, randomness - randomness/2]` at millisecond
/// granularity (symmetric for even spreads). Never shorter than 1ms.
pub fn jittered_interval<R: Rng + ?Sized>(
    frequency: Duration,
    randomness: Duration,
    rng: &mut R,
) -> Duration {
    let spread = as_millis(randomness);
    if spread == 0 {
        return frequency;
    }
    let offset = rng.gen_range(0..=spread);
    let millis = as_millis(frequency)
        .saturating_add(offset)
        .saturating_sub(spread / 2)
        .max(1);
    Duration::from_millis(millis)
}

/// A running set of simulated devices.
pub struct Fleet<T: Transport> {
    devices: Vec<Device<T>>,
    cancel: CancellationToken,
}

impl<T: Transport> Fleet<T> {
    /// Validate `config` and build every device. Nothing connects until
    /// [`start`](Self::start).
    pub fn new(config: &FleetConfig, transport: Arc<T>) -> Result<Self, CoreError> {
        config.validate()?;

        let mut rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let cancel = CancellationToken::new();

        let devices = config
            .devices
            .iter()
            .map(|entry| {
                let credential = config.credential_for(entry)?;
                let interval = jittered_interval(config.frequency, config.randomness, &mut rng);
                let generator_seed = config.seed.map(|_| rng.r#gen::<u64>());
                let kind = entry.generator.unwrap_or(config.generator);

                debug!(
                    device = %entry.id,
                    interval_ms = as_millis(interval),
                    generator = %kind,
                    "device configured"
                );

                Ok(Device::new(
                    DeviceIdentity {
                        name: entry.id.clone(),
                        credential,
                        protocol: config.protocol,
                    },
                    interval,
                    kind.build(generator_seed),
                    Arc::clone(&transport),
                    config.settings.clone(),
                    cancel.child_token(),
                ))
            })
            .collect::<Result<Vec<_>, CoreError>>()?;

        Ok(Self { devices, cancel })
    }

    /// Connect every device and start its publish timer. Returns
    /// immediately; devices proceed independently.
    pub fn start(&self) {
        for device in &self.devices {
            device.connect();
            device.start_publishing();
        }
        info!(devices = self.devices.len(), "fleet started");
    }

    pub fn devices(&self) -> &[Device<T>] {
        &self.devices
    }

    pub fn device(&self, name: &str) -> Option<&Device<T>> {
        self.devices.iter().find(|d| d.name() == name)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Stop one device without touching the rest.
    pub fn stop_device(&self, name: &str) -> Result<(), CoreError> {
        let device = self.device(name).ok_or_else(|| CoreError::DeviceNotFound {
            identifier: name.to_owned(),
        })?;
        device.stop_publishing();
        device.disconnect();
        Ok(())
    }

    /// Wait until every device has either connected or failed.
    ///
    /// Returns the first failed device as an error, or `Timeout` if some
    /// device is still connecting when `timeout` elapses.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), CoreError> {
        let waits = self.devices.iter().map(|device| {
            let mut state = device.watch_state();
            async move {
                state
                    .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Failed))
                    .await
                    .map(|s| *s)
            }
        });

        let Ok(outcomes) = tokio::time::timeout(timeout, join_all(waits)).await else {
            let pending = self
                .devices
                .iter()
                .filter(|d| d.state() != ConnectionState::Connected)
                .count();
            return Err(CoreError::Timeout {
                timeout_secs: timeout.as_secs(),
                pending,
            });
        };

        for (device, outcome) in self.devices.iter().zip(outcomes) {
            if matches!(outcome, Ok(ConnectionState::Failed)) {
                return Err(CoreError::ConnectionFailed {
                    device: device.name().to_owned(),
                    reason: device
                        .stats()
                        .last_error
                        .unwrap_or_else(|| "unknown error".into()),
                });
            }
        }
        Ok(())
    }

    /// Per-device state and counters, in roster order.
    pub fn summary(&self) -> Vec<DeviceSummary> {
        self.devices.iter().map(Device::summary).collect()
    }

    /// Stop every timer and event pump, then close every handle.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        for device in &self.devices {
            device.stop_publishing();
            device.disconnect();
        }
        info!(devices = self.devices.len(), "fleet stopped");
    }
}
