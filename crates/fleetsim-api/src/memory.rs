//! In-process hub transport.
//!
//! [`MemoryHub`] implements [`Transport`] without any network I/O. It keeps
//! the most recent delivered messages per device (see
//! [`MemoryHub::set_retention`]) and exposes controls to script the
//! failure modes a real hub produces: refused connects, unsolicited
//! disconnects, transport errors, slow or failing sends, and
//! cloud-to-device traffic. The `fleetsim` binary runs fleets against it,
//! and the test suites use it to drive device state machines.
//!
//! ```rust,ignore
//! let hub = MemoryHub::for_hub("my-iothub.azure-devices.net");
//! hub.fail_next_connects("device1000", 1);
//! // ... run a fleet ...
//! assert_eq!(hub.delivered_with_schema("temperature").len(), 3);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::one::RefMut;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::credential::ConnectionString;
use crate::error::Error;
use crate::message::{
    InboundMessage, MessageId, MessageProperties, OutboundMessage, SendReceipt,
};
use crate::protocol::Protocol;
use crate::transport::{Connection, ConnectionEvent, Session, Transport};

// ── Hub state ────────────────────────────────────────────────────────

/// Messages kept per device for inspection; older ones are counted only.
pub const DEFAULT_RETENTION: usize = 1024;

/// Cheaply cloneable handle to a shared in-memory hub.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    /// When set, credentials for any other host are refused.
    host_name: Option<String>,
    devices: DashMap<String, DeviceSlot>,
    next_link: AtomicU64,
    connect_latency_ms: AtomicU64,
    /// Per-send disconnect probability, stored as `f64` bits.
    drop_rate: AtomicU64,
    retention: AtomicUsize,
}

impl Default for HubInner {
    fn default() -> Self {
        Self {
            host_name: None,
            devices: DashMap::new(),
            next_link: AtomicU64::new(0),
            connect_latency_ms: AtomicU64::new(0),
            drop_rate: AtomicU64::new(0),
            retention: AtomicUsize::new(DEFAULT_RETENTION),
        }
    }
}

#[derive(Default)]
struct DeviceSlot {
    opens: u32,
    pending_connect_failures: u32,
    link: Option<Link>,
    delivered: Retained<OutboundMessage>,
    acknowledged: Retained<MessageId>,
    hold_sends: bool,
    held: Vec<oneshot::Sender<Result<(), String>>>,
    fail_sends: Option<String>,
}

/// The newest `limit` items plus a running total.
struct Retained<T> {
    items: VecDeque<T>,
    total: usize,
}

impl<T> Default for Retained<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
            total: 0,
        }
    }
}

impl<T: Clone> Retained<T> {
    fn push(&mut self, item: T, limit: usize) {
        self.total += 1;
        if limit == 0 {
            return;
        }
        while self.items.len() >= limit {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[derive(Clone)]
struct Link {
    id: u64,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    closed: Arc<AtomicBool>,
}

impl Link {
    fn tear_down(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl MemoryHub {
    /// A hub that accepts credentials for any host.
    pub fn new() -> Self {
        Self::default()
    }

    /// A hub that only accepts credentials whose `HostName` is `host_name`.
    pub fn for_hub(host_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                host_name: Some(host_name.into()),
                ..HubInner::default()
            }),
        }
    }

    fn slot(&self, device_id: &str) -> RefMut<'_, String, DeviceSlot> {
        self.inner
            .devices
            .entry(device_id.to_owned())
            .or_default()
    }

    // ── Failure scripting ────────────────────────────────────────────

    /// Refuse the next `count` connection attempts from `device_id`.
    pub fn fail_next_connects(&self, device_id: &str, count: u32) {
        self.slot(device_id).pending_connect_failures += count;
    }

    /// Delay every `open` by `latency` (observes the tokio clock).
    pub fn set_connect_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.inner.connect_latency_ms.store(ms, Ordering::Relaxed);
    }

    /// Drop the device's connection after a successful send with
    /// probability `rate` (clamped to `0.0..=1.0`).
    pub fn set_drop_rate(&self, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        self.inner.drop_rate.store(rate.to_bits(), Ordering::Relaxed);
    }

    /// Keep at most `per_device` delivered messages (and acknowledgements)
    /// per device. Counts keep growing past the limit.
    pub fn set_retention(&self, per_device: usize) {
        self.inner.retention.store(per_device, Ordering::Relaxed);
    }

    /// Tear down the device's live connection as if the hub dropped it.
    ///
    /// Emits [`ConnectionEvent::Disconnected`] on the old handle. Returns
    /// `false` if the device had no live connection.
    pub fn disconnect(&self, device_id: &str) -> bool {
        self.drop_link(device_id, None)
    }

    /// Tear down the live link, or only link `only` when given.
    fn drop_link(&self, device_id: &str, only: Option<u64>) -> bool {
        let link = {
            let mut slot = self.slot(device_id);
            match (&slot.link, only) {
                (Some(live), Some(id)) if live.id != id => None,
                _ => slot.link.take(),
            }
        };
        let Some(link) = link else { return false };

        link.tear_down();
        let _ = link.events.send(ConnectionEvent::Disconnected);
        debug!(device = device_id, link = link.id, "hub dropped connection");
        true
    }

    /// Surface a non-fatal transport error on the device's live connection.
    pub fn inject_error(&self, device_id: &str, error: Error) -> bool {
        let slot = self.slot(device_id);
        match &slot.link {
            Some(link) => link.events.send(ConnectionEvent::Error(error)).is_ok(),
            None => false,
        }
    }

    /// Deliver a cloud-to-device message. Returns its id, or `None` if the
    /// device is not connected.
    pub fn send_to_device(
        &self,
        device_id: &str,
        body: impl Into<Vec<u8>>,
        properties: MessageProperties,
    ) -> Option<MessageId> {
        let slot = self.slot(device_id);
        let link = slot.link.as_ref()?;
        let id = MessageId::generate();
        let message = InboundMessage {
            id: id.clone(),
            body: body.into(),
            properties,
        };
        link.events.send(ConnectionEvent::Message(message)).ok()?;
        Some(id)
    }

    /// Park every subsequent send from `device_id` until
    /// [`release_held`](Self::release_held) is called.
    pub fn hold_sends(&self, device_id: &str, hold: bool) {
        self.slot(device_id).hold_sends = hold;
    }

    /// Complete all parked sends with `outcome` (`Err` carries the failure
    /// reason). Returns how many were released.
    pub fn release_held(&self, device_id: &str, outcome: Result<(), String>) -> usize {
        let held = std::mem::take(&mut self.slot(device_id).held);
        let count = held.len();
        for waiter in held {
            let _ = waiter.send(outcome.clone());
        }
        count
    }

    /// Make every send from `device_id` fail with `reason`; `None` restores
    /// normal delivery.
    pub fn fail_sends(&self, device_id: &str, reason: Option<String>) {
        self.slot(device_id).fail_sends = reason;
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Retained messages the hub accepted from `device_id`, oldest first.
    pub fn delivered(&self, device_id: &str) -> Vec<OutboundMessage> {
        self.inner
            .devices
            .get(device_id)
            .map(|slot| slot.delivered.to_vec())
            .unwrap_or_default()
    }

    /// Every message accepted from `device_id`, retained or not.
    pub fn delivered_count(&self, device_id: &str) -> usize {
        self.inner
            .devices
            .get(device_id)
            .map_or(0, |slot| slot.delivered.total)
    }

    pub fn total_delivered(&self) -> usize {
        self.inner
            .devices
            .iter()
            .map(|slot| slot.delivered.total)
            .sum()
    }

    /// Retained messages tagged with `schema`, paired with the sending
    /// device id.
    pub fn delivered_with_schema(&self, schema: &str) -> Vec<(String, OutboundMessage)> {
        let mut out = Vec::new();
        for entry in &self.inner.devices {
            for message in entry
                .delivered
                .items
                .iter()
                .filter(|m| m.schema() == Some(schema))
            {
                out.push((entry.key().clone(), message.clone()));
            }
        }
        out.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at));
        out
    }

    /// Cloud-to-device message ids the device has completed (retained ones).
    pub fn acknowledged(&self, device_id: &str) -> Vec<MessageId> {
        self.inner
            .devices
            .get(device_id)
            .map(|slot| slot.acknowledged.to_vec())
            .unwrap_or_default()
    }

    /// How many times `device_id` attempted to open a connection.
    pub fn open_count(&self, device_id: &str) -> u32 {
        self.inner.devices.get(device_id).map_or(0, |slot| slot.opens)
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.inner
            .devices
            .get(device_id)
            .is_some_and(|slot| slot.link.is_some())
    }

    pub fn held_count(&self, device_id: &str) -> usize {
        self.inner
            .devices
            .get(device_id)
            .map_or(0, |slot| slot.held.len())
    }

    pub fn connected_devices(&self) -> usize {
        self.inner
            .devices
            .iter()
            .filter(|slot| slot.link.is_some())
            .count()
    }

    fn connect_latency(&self) -> Duration {
        Duration::from_millis(self.inner.connect_latency_ms.load(Ordering::Relaxed))
    }

    fn drop_rate(&self) -> f64 {
        f64::from_bits(self.inner.drop_rate.load(Ordering::Relaxed))
    }

    fn retention(&self) -> usize {
        self.inner.retention.load(Ordering::Relaxed)
    }
}

// ── Transport impl ───────────────────────────────────────────────────

impl Transport for MemoryHub {
    type Connection = MemoryConnection;

    async fn open(
        &self,
        credential: &ConnectionString,
        protocol: Protocol,
    ) -> Result<Session<MemoryConnection>, Error> {
        let latency = self.connect_latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(expected) = &self.inner.host_name {
            if credential.host_name() != expected {
                return Err(Error::ConnectionRefused {
                    host: credential.host_name().to_owned(),
                    reason: format!("unknown hub (expected {expected})"),
                });
            }
        }

        let device_id = credential.device_id().to_owned();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let link = Link {
            id: self.inner.next_link.fetch_add(1, Ordering::Relaxed),
            events: events_tx,
            closed: Arc::new(AtomicBool::new(false)),
        };

        {
            let mut slot = self.slot(&device_id);
            slot.opens += 1;

            if slot.pending_connect_failures > 0 {
                slot.pending_connect_failures -= 1;
                return Err(Error::ConnectionRefused {
                    host: credential.host_name().to_owned(),
                    reason: "hub unavailable".into(),
                });
            }

            // One live connection per device; a new open supersedes the old.
            if let Some(previous) = slot.link.replace(link.clone()) {
                previous.tear_down();
            }
        }

        debug!(device = %device_id, link = link.id, %protocol, "hub accepted connection");

        Ok(Session {
            connection: MemoryConnection {
                device_id,
                link,
                hub: self.clone(),
            },
            events: events_rx,
        })
    }
}

// ── MemoryConnection ─────────────────────────────────────────────────

/// A device handle opened on a [`MemoryHub`].
pub struct MemoryConnection {
    device_id: String,
    link: Link,
    hub: MemoryHub,
}

impl MemoryConnection {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_closed(&self) -> bool {
        self.link.closed.load(Ordering::Acquire)
    }
}

impl Connection for MemoryConnection {
    async fn send(&self, message: OutboundMessage) -> Result<SendReceipt, Error> {
        if self.is_closed() {
            return Err(Error::NotConnected);
        }

        let waiter = {
            let mut slot = self.hub.slot(&self.device_id);
            if let Some(reason) = &slot.fail_sends {
                return Err(Error::SendFailed {
                    reason: reason.clone(),
                });
            }
            if slot.hold_sends {
                let (tx, rx) = oneshot::channel();
                slot.held.push(tx);
                Some(rx)
            } else {
                None
            }
        };

        if let Some(rx) = waiter {
            trace!(device = %self.device_id, id = %message.id, "send parked");
            match rx.await {
                Ok(Ok(())) => {}
                Ok(Err(reason)) => return Err(Error::SendFailed { reason }),
                Err(_) => return Err(Error::NotConnected),
            }
        }

        let receipt = SendReceipt {
            message_id: message.id.clone(),
            enqueued_at: Utc::now(),
        };
        let limit = self.hub.retention();
        self.hub.slot(&self.device_id).delivered.push(message, limit);

        // Only the link that carried the send may be dropped for it.
        let rate = self.hub.drop_rate();
        if rate > 0.0 && rand::random::<f64>() < rate {
            self.hub.drop_link(&self.device_id, Some(self.link.id));
        }

        Ok(receipt)
    }

    async fn acknowledge(&self, id: &MessageId) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::AckFailed {
                id: id.to_string(),
                reason: "connection closed".into(),
            });
        }
        let limit = self.hub.retention();
        self.hub
            .slot(&self.device_id)
            .acknowledged
            .push(id.clone(), limit);
        Ok(())
    }

    fn close(&self) {
        self.link.tear_down();
        let mut slot = self.hub.slot(&self.device_id);
        if slot.link.as_ref().is_some_and(|l| l.id == self.link.id) {
            slot.link = None;
        }
    }
}
