// ── Publish loop ──
//
// A per-device periodic task. Each tick runs a callback; the loop itself
// knows nothing about connection state. Cancelling the token stops it.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Handle to one running publish timer.
pub struct PublishLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PublishLoop {
    /// Start ticking every `period`. The first tick fires one full period
    /// after start.
    pub fn start<F>(period: Duration, cancel: CancellationToken, mut on_tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = interval.tick() => on_tick(),
                }
            }
        });
        Self { cancel, handle }
    }

    /// Cancel the timer. Ticks already running finish; no new ones start.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

impl Drop for PublishLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_loop(period: Duration, cancel: CancellationToken) -> (PublishLoop, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let publish = PublishLoop::start(period, cancel, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (publish, ticks)
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_a_full_period() {
        let (publish, ticks) = counting_loop(Duration::from_millis(1000), CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(publish.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_ticking() {
        let (publish, ticks) = counting_loop(Duration::from_millis(100), CancellationToken::new());
        tokio::time::sleep(Duration::from_millis(250)).await;
        publish.stop();
        let seen = ticks.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
        assert!(!publish.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_stops_child_loops() {
        let root = CancellationToken::new();
        let (a, a_ticks) = counting_loop(Duration::from_millis(100), root.child_token());
        let (b, _) = counting_loop(Duration::from_millis(130), root.child_token());

        tokio::time::sleep(Duration::from_millis(450)).await;
        root.cancel();
        let seen = a_ticks.load(Ordering::SeqCst);
        assert_eq!(seen, 4);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(a_ticks.load(Ordering::SeqCst), seen);
        assert!(!a.is_running());
        assert!(!b.is_running());
    }
}
