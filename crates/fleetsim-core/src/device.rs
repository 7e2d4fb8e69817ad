//! Device connection state machine.
//!
//! A [`Device`] owns one simulated device's transport handle and its
//! [`ConnectionState`]. Every operation is fire-and-forget: `connect()`
//! spawns the open and returns immediately, and outcomes arrive through
//! tasks running on the tokio runtime.
//!
//! Each open is tagged with a handle epoch. Every callback (connect
//! completion, handle events, send completions) carries the epoch it
//! was started under and is dropped if a newer handle has since been
//! opened, so a replaced handle can never touch the current one's state.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::Local;
use tokio::sync::{Semaphore, broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use fleetsim_api::{
    Connection, ConnectionEvent, InboundMessage, SendReceipt, Session, Transport,
    calculate_backoff,
};

use crate::config::DeviceSettings;
use crate::generator::DataGenerator;
use crate::model::{
    ConnectionState, DeviceIdentity, DeviceStats, DeviceSummary, StateChange, TickOutcome,
};
use crate::publish::PublishLoop;

const STATE_CHANGE_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A transport handle tagged with the epoch it was opened under.
struct Handle<C> {
    epoch: u64,
    connection: C,
}

#[derive(Default)]
struct StatCells {
    sent: AtomicU64,
    send_errors: AtomicU64,
    received: AtomicU64,
    reconnects: AtomicU64,
    skipped_ticks: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl StatCells {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn fail(&self, message: String) {
        *lock(&self.last_error) = Some(message);
    }

    fn snapshot(&self) -> DeviceStats {
        DeviceStats {
            sent: self.sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            last_error: lock(&self.last_error).clone(),
        }
    }
}

// ── Device ───────────────────────────────────────────────────────────

/// One simulated device. Cheap to clone; clones share state.
pub struct Device<T: Transport> {
    inner: Arc<DeviceInner<T>>,
}

impl<T: Transport> Clone for Device<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct DeviceInner<T: Transport> {
    identity: DeviceIdentity,
    interval: Duration,
    transport: Arc<T>,
    settings: DeviceSettings,
    state: watch::Sender<ConnectionState>,
    changes: broadcast::Sender<StateChange>,
    /// Epoch of the most recent open; zero before the first.
    epoch: AtomicU64,
    /// Held across every epoch bump and the state change that goes with it.
    transition: Mutex<()>,
    handle: ArcSwapOption<Handle<T::Connection>>,
    generator: Mutex<Box<dyn DataGenerator>>,
    /// Whether the owner asked for periodic publishing.
    publishing: AtomicBool,
    publish_loop: Mutex<Option<PublishLoop>>,
    in_flight: Option<Arc<Semaphore>>,
    /// Consecutive unsolicited disconnects since the last healthy send.
    reconnect_attempt: AtomicU32,
    stats: StatCells,
    cancel: CancellationToken,
}

impl<T: Transport> Device<T> {
    /// Create a disconnected device. `cancel` bounds every task the
    /// device spawns; pass a child of the fleet's root token.
    pub fn new(
        identity: DeviceIdentity,
        interval: Duration,
        generator: Box<dyn DataGenerator>,
        transport: Arc<T>,
        settings: DeviceSettings,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (changes, _) = broadcast::channel(STATE_CHANGE_CAPACITY);
        let in_flight = settings
            .max_in_flight
            .map(|slots| Arc::new(Semaphore::new(slots)));

        Self {
            inner: Arc::new(DeviceInner {
                identity,
                interval,
                transport,
                settings,
                state,
                changes,
                epoch: AtomicU64::new(0),
                transition: Mutex::new(()),
                handle: ArcSwapOption::empty(),
                generator: Mutex::new(generator),
                publishing: AtomicBool::new(false),
                publish_loop: Mutex::new(None),
                in_flight,
                reconnect_attempt: AtomicU32::new(0),
                stats: StatCells::default(),
                cancel,
            }),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.inner.identity.name
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.inner.identity
    }

    /// Publish interval, jitter included.
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to the latest connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to every state transition, in order.
    pub fn state_changes(&self) -> broadcast::Receiver<StateChange> {
        self.inner.changes.subscribe()
    }

    /// Current handle epoch. Increments on every open and every
    /// handle teardown.
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::Acquire)
    }

    pub fn is_publishing(&self) -> bool {
        lock(&self.inner.publish_loop)
            .as_ref()
            .is_some_and(PublishLoop::is_running)
    }

    pub fn stats(&self) -> DeviceStats {
        self.inner.stats.snapshot()
    }

    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            name: self.name().to_owned(),
            state: self.state(),
            interval: self.interval(),
            stats: self.stats(),
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.inner.epoch.load(Ordering::Acquire) == epoch
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.inner.state.send_replace(next);
        if previous != next {
            debug!(device = %self.name(), from = %previous, to = %next, "state changed");
            let _ = self.inner.changes.send(StateChange {
                from: previous,
                to: next,
            });
        }
    }

    // ── Connect ──────────────────────────────────────────────────────

    /// Start opening a transport handle. Returns immediately.
    ///
    /// On failure the device moves to `Failed` and stays there; an
    /// initial connect failure is not retried.
    pub fn connect(&self) {
        self.begin_connect(None);
    }

    /// Bump the epoch and spawn the open. With `expected` set, only if
    /// nothing has moved the device on since that epoch.
    fn begin_connect(&self, expected: Option<u64>) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        let epoch = {
            let _transition = lock(&self.inner.transition);
            if !expected.is_none_or(|e| self.is_current(e)) {
                return;
            }
            let epoch = self.inner.epoch.fetch_add(1, Ordering::AcqRel) + 1;
            self.set_state(ConnectionState::Connecting);
            epoch
        };
        info!(
            device = %self.name(),
            epoch,
            protocol = %self.inner.identity.protocol,
            host = self.inner.identity.credential.host_name(),
            "connecting"
        );

        let device = self.clone();
        tokio::spawn(async move { device.open_handle(epoch).await });
    }

    async fn open_handle(self, epoch: u64) {
        let inner = &self.inner;
        let opened = tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return,
            result = inner.transport.open(&inner.identity.credential, inner.identity.protocol) => result,
        };

        let transition = lock(&self.inner.transition);
        let still_wanted = self.is_current(epoch) && self.state() == ConnectionState::Connecting;
        match opened {
            Ok(session) if still_wanted => {
                self.attach(epoch, session);
                drop(transition);
            }
            Ok(session) => {
                drop(transition);
                debug!(device = %self.name(), epoch, "connect superseded, closing new handle");
                session.connection.close();
            }
            Err(e) if still_wanted => {
                self.set_state(ConnectionState::Failed);
                self.inner.stats.fail(e.to_string());
                error!(device = %self.name(), error = %e, "could not connect");
            }
            Err(e) => {
                debug!(device = %self.name(), epoch, error = %e, "superseded connect failed");
            }
        }
    }

    /// Install a freshly opened handle. Caller holds `transition`.
    fn attach(&self, epoch: u64, session: Session<T::Connection>) {
        let Session { connection, events } = session;
        let previous = self
            .inner
            .handle
            .swap(Some(Arc::new(Handle { epoch, connection })));
        if let Some(previous) = previous {
            previous.connection.close();
        }

        self.set_state(ConnectionState::Connected);
        info!(device = %self.name(), epoch, "client connected");

        let device = self.clone();
        tokio::spawn(async move { device.pump_events(epoch, events).await });

        // Realign the timer so the first send comes one interval after connect.
        self.restart_publish_loop();
    }

    /// Tear the device down on request. No reconnect follows.
    pub fn disconnect(&self) {
        let _transition = lock(&self.inner.transition);
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        self.stop_publish_loop();
        if let Some(handle) = self.inner.handle.swap(None) {
            handle.connection.close();
        }
        self.set_state(ConnectionState::Disconnected);
        info!(device = %self.name(), "disconnected");
    }

    // ── Handle events ────────────────────────────────────────────────

    async fn pump_events(self, epoch: u64, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
        loop {
            let event = tokio::select! {
                biased;
                () = self.inner.cancel.cancelled() => return,
                event = events.recv() => event,
            };

            if !self.is_current(epoch) {
                trace!(device = %self.name(), epoch, "detached from superseded handle");
                return;
            }

            match event {
                Some(ConnectionEvent::Message(message)) => self.on_message(epoch, message),
                Some(ConnectionEvent::Error(e)) => {
                    error!(device = %self.name(), error = %e, "transport error");
                }
                Some(ConnectionEvent::Disconnected) | None => {
                    // Dropping `events` on return detaches every listener.
                    self.on_disconnect(epoch).await;
                    return;
                }
            }
        }
    }

    fn on_message(&self, epoch: u64, message: InboundMessage) {
        info!(
            device = %self.name(),
            id = %message.id,
            body = %message.body_str(),
            "message received"
        );
        StatCells::bump(&self.inner.stats.received);

        let Some(handle) = self.current_handle(epoch) else {
            return;
        };
        let device = self.clone();
        tokio::spawn(async move {
            match handle.connection.acknowledge(&message.id).await {
                Ok(()) => device.log_status(&format!("completed {}", message.id)),
                Err(e) => warn!(device = %device.name(), error = %e, "acknowledge failed"),
            }
        });
    }

    async fn on_disconnect(&self, epoch: u64) {
        let retired = epoch + 1;
        let reconnect = &self.inner.settings.reconnect;
        let attempt = {
            let _transition = lock(&self.inner.transition);
            if self
                .inner
                .epoch
                .compare_exchange(epoch, retired, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            // The old handle's timer goes; a fresh one keeps ticking (and
            // skipping) until the next handle attaches.
            self.restart_publish_loop();
            self.inner.handle.store(None);
            self.set_state(ConnectionState::Disconnected);
            StatCells::bump(&self.inner.stats.reconnects);
            warn!(device = %self.name(), "client disconnected");

            let attempt = self.inner.reconnect_attempt.fetch_add(1, Ordering::AcqRel);
            if !reconnect.allows(attempt) {
                self.set_state(ConnectionState::Failed);
                self.inner
                    .stats
                    .fail(format!("gave up after {attempt} reconnect attempts"));
                error!(device = %self.name(), attempts = attempt, "reconnect limit reached");
                return;
            }
            attempt
        };

        let delay = calculate_backoff(attempt, reconnect);
        if !delay.is_zero() {
            info!(
                device = %self.name(),
                attempt = attempt + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "reconnecting after backoff"
            );
            tokio::select! {
                biased;
                () = self.inner.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
        self.begin_connect(Some(retired));
    }

    fn current_handle(&self, epoch: u64) -> Option<Arc<Handle<T::Connection>>> {
        self.inner
            .handle
            .load_full()
            .filter(|handle| handle.epoch == epoch)
    }

    // ── Publishing ───────────────────────────────────────────────────

    /// Start the periodic publish timer. Idempotent.
    pub fn start_publishing(&self) {
        self.inner.publishing.store(true, Ordering::Release);
        self.ensure_publish_loop();
    }

    /// Stop the periodic publish timer; reconnects will not restart it.
    pub fn stop_publishing(&self) {
        self.inner.publishing.store(false, Ordering::Release);
        self.stop_publish_loop();
    }

    fn ensure_publish_loop(&self) {
        let mut slot = lock(&self.inner.publish_loop);
        if slot.as_ref().is_some_and(PublishLoop::is_running) {
            return;
        }
        *slot = self.spawn_publish_loop();
    }

    /// Replace any running timer with a fresh one, if publishing is on.
    fn restart_publish_loop(&self) {
        let mut slot = lock(&self.inner.publish_loop);
        if let Some(old) = slot.take() {
            old.stop();
        }
        *slot = self.spawn_publish_loop();
    }

    fn spawn_publish_loop(&self) -> Option<PublishLoop> {
        if !self.inner.publishing.load(Ordering::Acquire) || self.inner.cancel.is_cancelled() {
            return None;
        }
        let device = self.clone();
        let publish = PublishLoop::start(
            self.inner.interval,
            self.inner.cancel.child_token(),
            move || {
                device.tick();
            },
        );
        debug!(device = %self.name(), interval_ms = self.interval_ms(), "publish timer started");
        Some(publish)
    }

    fn stop_publish_loop(&self) {
        if let Some(publish) = lock(&self.inner.publish_loop).take() {
            publish.stop();
            debug!(device = %self.name(), "publish timer cancelled");
        }
    }

    fn interval_ms(&self) -> u64 {
        u64::try_from(self.inner.interval.as_millis()).unwrap_or(u64::MAX)
    }

    /// Run one publish check: send a fresh reading if connected,
    /// otherwise log and skip. The send itself is not awaited.
    pub fn tick(&self) -> TickOutcome {
        let state = self.state();
        match state {
            ConnectionState::Connected => self.publish(),
            ConnectionState::Connecting => {
                StatCells::bump(&self.inner.stats.skipped_ticks);
                warn!(device = %self.name(), "client is not connected yet, skipping");
                TickOutcome::NotYetConnected
            }
            other => {
                StatCells::bump(&self.inner.stats.skipped_ticks);
                error!(device = %self.name(), state = %other, "client could not connect, skipping");
                TickOutcome::Unavailable(other)
            }
        }
    }

    fn publish(&self) -> TickOutcome {
        let Some(handle) = self.inner.handle.load_full() else {
            StatCells::bump(&self.inner.stats.skipped_ticks);
            return TickOutcome::Unavailable(self.state());
        };

        let permit = match &self.inner.in_flight {
            Some(slots) => match Arc::clone(slots).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    StatCells::bump(&self.inner.stats.skipped_ticks);
                    warn!(device = %self.name(), "send backlog full, dropping reading");
                    return TickOutcome::Backlogged;
                }
            },
            None => None,
        };

        let reading = lock(&self.inner.generator).generate(Local::now().fixed_offset());
        let message = match reading.to_message() {
            Ok(message) => message,
            Err(e) => {
                error!(device = %self.name(), error = %e, "could not encode reading");
                return TickOutcome::EncodeFailed;
            }
        };

        match message.schema() {
            Some(schema) => info!(device = %self.name(), "Sending {schema}: {}", message.body_str()),
            None => info!(device = %self.name(), "Sending message: {}", message.body_str()),
        }

        let device = self.clone();
        tokio::spawn(async move {
            let result = handle.connection.send(message).await;
            drop(permit);
            device.on_send_complete(handle.epoch, result);
        });
        TickOutcome::Sent
    }

    fn on_send_complete(&self, epoch: u64, result: Result<SendReceipt, fleetsim_api::Error>) {
        if !self.is_current(epoch) {
            debug!(device = %self.name(), epoch, "ignoring send completion from superseded handle");
            return;
        }
        match result {
            Ok(receipt) => {
                StatCells::bump(&self.inner.stats.sent);
                self.inner.reconnect_attempt.store(0, Ordering::Release);
                self.log_status(&format!("send status: enqueued {}", receipt.message_id));
            }
            Err(e) => {
                StatCells::bump(&self.inner.stats.send_errors);
                self.inner.stats.fail(e.to_string());
                warn!(device = %self.name(), error = %e, "send error");
            }
        }
    }

    fn log_status(&self, status: &str) {
        if self.inner.settings.log.send_status {
            info!(device = %self.name(), "{status}");
        } else {
            debug!(device = %self.name(), "{status}");
        }
    }
}
