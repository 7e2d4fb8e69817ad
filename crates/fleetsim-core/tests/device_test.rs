#![allow(clippy::unwrap_used)]
// Device state machine scenarios over the in-memory hub.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use fleetsim_api::{ConnectionString, Error, MemoryHub, MessageProperties, Protocol, ReconnectConfig};
use fleetsim_core::{
    ConnectionState, Device, DeviceIdentity, DeviceSettings, GeneratorKind, TickOutcome,
};

// ── Helpers ─────────────────────────────────────────────────────────

const DEVICE: &str = "device1000";

fn device(hub: &MemoryHub, settings: DeviceSettings) -> Device<MemoryHub> {
    let identity = DeviceIdentity {
        name: DEVICE.into(),
        credential: ConnectionString::new(
            "my-iothub",
            fleetsim_api::DEFAULT_HOST_SUFFIX,
            DEVICE,
            SecretString::from("ZGV2aWNlMTAwMA==".to_string()),
        ),
        protocol: Protocol::Amqp,
    };
    Device::new(
        identity,
        Duration::from_secs(1),
        GeneratorKind::Temperature.build(Some(17)),
        Arc::new(hub.clone()),
        settings,
        CancellationToken::new(),
    )
}

async fn reach(device: &Device<MemoryHub>, target: ConnectionState) {
    device
        .watch_state()
        .wait_for(|s| *s == target)
        .await
        .unwrap();
}

/// Let spawned callbacks run without advancing the clock.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never held: {what}");
}

// ── Publishing ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_tick_while_connected_sends_exactly_once() {
    let hub = MemoryHub::new();
    let device = device(&hub, DeviceSettings::default());
    device.connect();
    reach(&device, ConnectionState::Connected).await;

    assert_eq!(device.tick(), TickOutcome::Sent);
    settle().await;

    let delivered = hub.delivered(DEVICE);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].schema(), Some("temperature"));
    assert_eq!(delivered[0].properties.content_type.as_deref(), Some("json"));

    let payload: serde_json::Value = serde_json::from_slice(&delivered[0].body).unwrap();
    assert!(payload["value"].is_number());
    assert!(payload["time"].as_str().unwrap().ends_with('Z'));
    assert_eq!(device.stats().sent, 1);
}

#[tokio::test(start_paused = true)]
async fn test_ticks_never_send_unless_connected() {
    let hub = MemoryHub::new();

    let idle = device(&hub, DeviceSettings::default());
    assert_eq!(
        idle.tick(),
        TickOutcome::Unavailable(ConnectionState::Disconnected)
    );

    hub.set_connect_latency(Duration::from_secs(30));
    let connecting = device(&hub, DeviceSettings::default());
    connecting.connect();
    assert_eq!(connecting.tick(), TickOutcome::NotYetConnected);

    settle().await;
    assert_eq!(hub.total_delivered(), 0);
    assert_eq!(connecting.stats().skipped_ticks, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_device_keeps_ticking_without_sending() {
    let hub = MemoryHub::new();
    hub.fail_next_connects(DEVICE, 1);
    let device = device(&hub, DeviceSettings::default());

    device.connect();
    device.start_publishing();
    reach(&device, ConnectionState::Failed).await;

    tokio::time::sleep(Duration::from_millis(4500)).await;
    assert_eq!(hub.delivered_count(DEVICE), 0);
    assert_eq!(device.stats().skipped_ticks, 4);
    assert!(device.is_publishing());
    // Initial connect failures are not retried.
    assert_eq!(hub.open_count(DEVICE), 1);
    assert_eq!(device.state(), ConnectionState::Failed);
}

// ── Disconnect and reconnect ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_disconnect_keeps_timer_skipping_and_reconnects() {
    let hub = MemoryHub::new();
    let device = device(&hub, DeviceSettings::default());
    let mut changes = device.state_changes();

    device.connect();
    device.start_publishing();
    reach(&device, ConnectionState::Connected).await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(hub.delivered_count(DEVICE), 1);

    hub.set_connect_latency(Duration::from_secs(10));
    assert!(hub.disconnect(DEVICE));
    reach(&device, ConnectionState::Connecting).await;
    assert!(device.is_publishing());

    // Ticks keep firing while the reconnect is pending, but send nothing.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(hub.delivered_count(DEVICE), 1);
    assert!(device.stats().skipped_ticks >= 4, "{:?}", device.stats());

    reach(&device, ConnectionState::Connected).await;
    assert_eq!(hub.open_count(DEVICE), 2);
    assert!(device.is_publishing());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(hub.delivered_count(DEVICE), 2);
    assert_eq!(device.stats().reconnects, 1);

    let mut seen = Vec::new();
    while let Ok(change) = changes.try_recv() {
        seen.push(change.to);
    }
    assert_eq!(
        seen,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_late_send_completion_from_replaced_handle_is_ignored() {
    let hub = MemoryHub::new();
    let device = device(&hub, DeviceSettings::default());
    device.connect();
    reach(&device, ConnectionState::Connected).await;

    hub.hold_sends(DEVICE, true);
    assert_eq!(device.tick(), TickOutcome::Sent);
    eventually("send parked", || hub.held_count(DEVICE) == 1).await;

    let first_epoch = device.epoch();
    hub.hold_sends(DEVICE, false);
    assert!(hub.disconnect(DEVICE));
    eventually("new handle attached", || {
        device.epoch() > first_epoch + 1 && device.state() == ConnectionState::Connected
    })
    .await;

    // The old handle's send fails late; it must not count against the
    // new handle.
    assert_eq!(hub.release_held(DEVICE, Err("link detached".into())), 1);
    settle().await;
    assert_eq!(device.stats().send_errors, 0);
    assert_eq!(device.stats().last_error, None);
    assert_eq!(device.state(), ConnectionState::Connected);

    assert_eq!(device.tick(), TickOutcome::Sent);
    settle().await;
    assert_eq!(device.stats().sent, 1);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_reconnect() {
    let hub = MemoryHub::new();
    let settings = DeviceSettings {
        reconnect: ReconnectConfig::backoff(),
        ..DeviceSettings::default()
    };
    let device = device(&hub, settings);
    device.connect();
    reach(&device, ConnectionState::Connected).await;

    hub.disconnect(DEVICE);
    reach(&device, ConnectionState::Disconnected).await;

    // First attempt waits the initial delay (1s, no jitter at attempt 0).
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(device.state(), ConnectionState::Disconnected);
    assert_eq!(hub.open_count(DEVICE), 1);

    reach(&device, ConnectionState::Connected).await;
    assert_eq!(hub.open_count(DEVICE), 2);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_disconnect_during_backoff_stops_reconnect() {
    let hub = MemoryHub::new();
    let settings = DeviceSettings {
        reconnect: ReconnectConfig::backoff(),
        ..DeviceSettings::default()
    };
    let device = device(&hub, settings);
    device.connect();
    reach(&device, ConnectionState::Connected).await;

    hub.disconnect(DEVICE);
    reach(&device, ConnectionState::Disconnected).await;
    device.disconnect();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(hub.open_count(DEVICE), 1);
    assert_eq!(device.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconnect_keeps_ticking() {
    let hub = MemoryHub::new();
    let device = device(&hub, DeviceSettings::default());
    device.connect();
    device.start_publishing();
    reach(&device, ConnectionState::Connected).await;

    hub.fail_next_connects(DEVICE, 1);
    assert!(hub.disconnect(DEVICE));
    reach(&device, ConnectionState::Failed).await;
    let skipped = device.stats().skipped_ticks;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(device.is_publishing());
    assert!(device.stats().skipped_ticks >= skipped + 9, "{:?}", device.stats());
    assert_eq!(hub.delivered_count(DEVICE), 0);
    assert_eq!(hub.open_count(DEVICE), 2);
    assert_eq!(device.state(), ConnectionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retry_budget_keeps_ticking() {
    let hub = MemoryHub::new();
    let settings = DeviceSettings {
        reconnect: ReconnectConfig {
            max_retries: Some(0),
            ..ReconnectConfig::immediate()
        },
        ..DeviceSettings::default()
    };
    let device = device(&hub, settings);
    device.connect();
    device.start_publishing();
    reach(&device, ConnectionState::Connected).await;

    assert!(hub.disconnect(DEVICE));
    reach(&device, ConnectionState::Failed).await;

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert!(device.is_publishing());
    assert_eq!(device.stats().skipped_ticks, 3);
    assert_eq!(hub.open_count(DEVICE), 1);
}

fn one_retry() -> DeviceSettings {
    DeviceSettings {
        reconnect: ReconnectConfig {
            max_retries: Some(1),
            ..ReconnectConfig::immediate()
        },
        ..DeviceSettings::default()
    }
}

async fn drop_and_await_reopen(hub: &MemoryHub, device: &Device<MemoryHub>, opens: u32) {
    assert!(hub.disconnect(DEVICE));
    eventually("device reopened", || {
        hub.open_count(DEVICE) == opens && device.state() == ConnectionState::Connected
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_healthy_send_resets_reconnect_budget() {
    let hub = MemoryHub::new();
    let device = device(&hub, one_retry());
    device.connect();
    reach(&device, ConnectionState::Connected).await;

    drop_and_await_reopen(&hub, &device, 2).await;
    assert_eq!(device.tick(), TickOutcome::Sent);
    eventually("send completed", || device.stats().sent == 1).await;

    // The budget is per outage, so a second drop reconnects again.
    drop_and_await_reopen(&hub, &device, 3).await;
    assert_eq!(device.stats().reconnects, 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_budget_spans_outages_without_a_send() {
    let hub = MemoryHub::new();
    let device = device(&hub, one_retry());
    device.connect();
    reach(&device, ConnectionState::Connected).await;

    drop_and_await_reopen(&hub, &device, 2).await;

    assert!(hub.disconnect(DEVICE));
    reach(&device, ConnectionState::Failed).await;
    assert_eq!(hub.open_count(DEVICE), 2);
}

// ── Handle events ───────────────────────────────────────────────────

#[tokio::test]
async fn test_inbound_messages_are_acknowledged() {
    let hub = MemoryHub::new();
    let device = device(&hub, DeviceSettings::default());
    device.connect();
    reach(&device, ConnectionState::Connected).await;

    let id = hub
        .send_to_device(DEVICE, "reboot", MessageProperties::default())
        .unwrap();
    eventually("message acknowledged", || hub.acknowledged(DEVICE) == vec![id.clone()]).await;
    assert_eq!(device.stats().received, 1);
}

#[tokio::test]
async fn test_transport_errors_do_not_change_state() {
    let hub = MemoryHub::new();
    let device = device(&hub, DeviceSettings::default());
    device.connect();
    reach(&device, ConnectionState::Connected).await;

    assert!(hub.inject_error(DEVICE, Error::Transport("throttled".into())));
    settle().await;
    assert_eq!(device.state(), ConnectionState::Connected);
    assert_eq!(hub.open_count(DEVICE), 1);
}

#[tokio::test]
async fn test_send_errors_are_counted_not_raised() {
    let hub = MemoryHub::new();
    let device = device(&hub, DeviceSettings::default());
    device.connect();
    reach(&device, ConnectionState::Connected).await;

    hub.fail_sends(DEVICE, Some("quota exceeded".into()));
    assert_eq!(device.tick(), TickOutcome::Sent);
    eventually("send error recorded", || device.stats().send_errors == 1).await;

    let stats = device.stats();
    assert_eq!(stats.sent, 0);
    assert!(stats.last_error.unwrap().contains("quota exceeded"));
    assert_eq!(device.state(), ConnectionState::Connected);
}
