use std::sync::Arc;
use std::time::Duration;

use rand_distr::{Distribution, Normal};
use tracing::{debug, error, info, warn};

use crate::message::Synthesizer;
use crate::messaging::publish::MessagePublisher;
use crate::shutdown::Shutdown;
use crate::stats::RunStats;

/// Terminal state of a send run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderOutcome {
    /// All requested publish attempts were made.
    Completed,
    /// The shutdown signal arrived before the count was reached.
    Cancelled,
    /// The session stopped carrying publishes mid-run.
    Failed,
}

/// Publishes synthetic messages at a paced cadence until `count` attempts
/// have been made or the run is cancelled. Individual publish failures are
/// counted and the loop continues; only a dead session aborts it.
pub struct Sender<P: MessagePublisher> {
    publisher: P,
    synthesizer: Synthesizer,
    stats: Arc<RunStats>,
    shutdown: Arc<Shutdown>,
    count: u64,
    interval: Duration,
    jitter: Option<Normal<f64>>,
}

impl<P: MessagePublisher> Sender<P> {
    pub fn new(
        publisher: P,
        synthesizer: Synthesizer,
        stats: Arc<RunStats>,
        shutdown: Arc<Shutdown>,
        count: u32,
        interval_ms: u64,
        stddev: u32,
    ) -> Self {
        // Cadence spread reuses the stddev flag, in milliseconds. Zero (the
        // default) keeps the interval as a fixed delay.
        let jitter = if stddev > 0 {
            Normal::new(interval_ms as f64, f64::from(stddev)).ok()
        } else {
            None
        };
        Self {
            publisher,
            synthesizer,
            stats,
            shutdown,
            count: u64::from(count),
            interval: Duration::from_millis(interval_ms),
            jitter,
        }
    }

    pub async fn run(self) -> SenderOutcome {
        info!(count = self.count, interval_ms = self.interval.as_millis() as u64, "Sender starting");

        while self.stats.attempts() < self.count {
            if self.shutdown.is_triggered() {
                info!("Sender cancelled");
                return SenderOutcome::Cancelled;
            }

            let message = self.synthesizer.synthesize();
            if let Some(bits) = message.entropy {
                self.stats.record_entropy(bits);
                debug!(size = message.size(), entropy = bits, "Message synthesized");
            }

            match self.publisher.publish(&message).await {
                Ok(()) => {
                    self.stats.record_sent(message.size());
                    debug!(size = message.size(), "Message published");
                }
                Err(e) => {
                    self.stats.record_failed();
                    warn!(error = %e, "Publish failed");
                    if !self.publisher.is_usable() {
                        error!("Session no longer usable, aborting send run");
                        return SenderOutcome::Failed;
                    }
                }
            }

            if self.stats.attempts() >= self.count {
                break;
            }

            // Timeout-or-cancel race: the sleep never outlives a shutdown.
            tokio::select! {
                _ = self.shutdown.wait() => {
                    info!("Sender cancelled during pause");
                    return SenderOutcome::Cancelled;
                }
                _ = tokio::time::sleep(self.next_delay()) => {}
            }
        }

        info!(attempts = self.stats.attempts(), "Sender complete");
        SenderOutcome::Completed
    }

    fn next_delay(&self) -> Duration {
        match &self.jitter {
            Some(normal) => {
                let ms = normal.sample(&mut rand::rng()).max(0.0);
                Duration::from_millis(ms.round() as u64)
            }
            None => self.interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::messaging::publish::PublishError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Instant;

    struct MockPublisher {
        calls: AtomicU64,
        fail_every_other: bool,
        usable: AtomicBool,
    }

    impl MockPublisher {
        fn reliable() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU64::new(0),
                fail_every_other: false,
                usable: AtomicBool::new(true),
            })
        }

        fn flaky() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU64::new(0),
                fail_every_other: true,
                usable: AtomicBool::new(true),
            })
        }
    }

    #[async_trait]
    impl MessagePublisher for Arc<MockPublisher> {
        async fn publish(&self, _message: &Message) -> Result<(), PublishError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_every_other && call % 2 == 1 {
                Err(PublishError::PublishFailed("mock failure".into()))
            } else {
                Ok(())
            }
        }

        fn is_usable(&self) -> bool {
            self.usable.load(Ordering::SeqCst)
        }
    }

    fn sender(
        publisher: &Arc<MockPublisher>,
        stats: &Arc<RunStats>,
        shutdown: &Arc<Shutdown>,
        count: u32,
        interval_ms: u64,
    ) -> Sender<Arc<MockPublisher>> {
        Sender::new(
            publisher.clone(),
            Synthesizer::new(1.0, 0, false, false),
            stats.clone(),
            shutdown.clone(),
            count,
            interval_ms,
            0,
        )
    }

    #[tokio::test]
    async fn test_exactly_count_attempts() {
        let publisher = MockPublisher::reliable();
        let stats = RunStats::new();
        let shutdown = Shutdown::new();

        let outcome = sender(&publisher, &stats, &shutdown, 5, 0).run().await;

        assert_eq!(outcome, SenderOutcome::Completed);
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 5);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sent, 5);
        assert_eq!(snapshot.failed, 0);
        assert_eq!(snapshot.bytes_total, 5 * 1024);
    }

    #[tokio::test]
    async fn test_failures_counted_and_loop_continues() {
        let publisher = MockPublisher::flaky();
        let stats = RunStats::new();
        let shutdown = Shutdown::new();

        let outcome = sender(&publisher, &stats, &shutdown, 6, 0).run().await;

        assert_eq!(outcome, SenderOutcome::Completed);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sent + snapshot.failed, 6);
        assert_eq!(snapshot.sent, 3);
        assert_eq!(snapshot.failed, 3);
    }

    #[tokio::test]
    async fn test_unusable_session_terminates_failed() {
        let publisher = MockPublisher::flaky();
        publisher.usable.store(false, Ordering::SeqCst);
        let stats = RunStats::new();
        let shutdown = Shutdown::new();

        let outcome = sender(&publisher, &stats, &shutdown, 10, 0).run().await;

        assert_eq!(outcome, SenderOutcome::Failed);
        // Aborted on the first failed publish, well short of the count.
        assert!(stats.attempts() < 10);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_sleep_promptly() {
        let publisher = MockPublisher::reliable();
        let stats = RunStats::new();
        let shutdown = Shutdown::new();

        let run = tokio::spawn(sender(&publisher, &stats, &shutdown, 100, 60_000).run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let triggered_at = Instant::now();
        shutdown.trigger();

        let outcome = tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("sender should stop well before the minute-long sleep")
            .unwrap();

        assert_eq!(outcome, SenderOutcome::Cancelled);
        assert!(triggered_at.elapsed() < Duration::from_secs(1));
        // One publish happened before the loop parked in its sleep.
        assert_eq!(stats.snapshot().sent, 1);
    }

    #[tokio::test]
    async fn test_pre_triggered_shutdown_sends_nothing() {
        let publisher = MockPublisher::reliable();
        let stats = RunStats::new();
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let outcome = sender(&publisher, &stats, &shutdown, 5, 0).run().await;

        assert_eq!(outcome, SenderOutcome::Cancelled);
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_jittered_delay_stays_nonnegative() {
        let publisher = MockPublisher::reliable();
        let stats = RunStats::new();
        let shutdown = Shutdown::new();
        let s = Sender::new(
            publisher.clone(),
            Synthesizer::new(1.0, 0, false, false),
            stats,
            shutdown,
            1,
            5,
            50,
        );
        for _ in 0..100 {
            // Duration is unsigned; the clamp just has to avoid a panic on
            // negative samples from N(5, 50).
            let _ = s.next_delay();
        }
    }
}
