use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;

use crate::shutdown::Shutdown;

/// Counters for the active loop. Written by exactly one loop per run and
/// read concurrently by the reporter, hence atomics for the counters and a
/// lock around the entropy accumulator.
pub struct RunStats {
    sent: AtomicU64,
    failed: AtomicU64,
    received: AtomicU64,
    bytes_total: AtomicU64,
    entropy: Mutex<Welford>,
    started: Instant,
}

impl RunStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            received: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            entropy: Mutex::new(Welford::default()),
            started: Instant::now(),
        })
    }

    pub fn record_sent(&self, bytes: usize) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.bytes_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_entropy(&self, bits_per_byte: f64) {
        self.entropy
            .lock()
            .expect("entropy accumulator poisoned")
            .push(bits_per_byte);
    }

    pub fn attempts(&self) -> u64 {
        self.sent.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Snapshot {
        let entropy = {
            let acc = self.entropy.lock().expect("entropy accumulator poisoned");
            acc.summary()
        };
        Snapshot {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            bytes_total: self.bytes_total.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
            entropy,
        }
    }
}

/// Point-in-time read of RunStats, detached from the live counters.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub sent: u64,
    pub failed: u64,
    pub received: u64,
    pub bytes_total: u64,
    pub elapsed: Duration,
    pub entropy: Option<EntropySummary>,
}

#[derive(Debug, Clone, Copy)]
pub struct EntropySummary {
    pub samples: u64,
    pub mean: f64,
    pub stddev: f64,
}

/// Welford's online mean/variance, so entropy statistics never need the
/// individual samples retained.
#[derive(Debug, Default)]
struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn summary(&self) -> Option<EntropySummary> {
        if self.count == 0 {
            return None;
        }
        let variance = self.m2 / self.count as f64;
        Some(EntropySummary {
            samples: self.count,
            mean: self.mean,
            stddev: variance.sqrt(),
        })
    }
}

/// Renders snapshots; never mutates RunStats.
pub struct Reporter;

impl Reporter {
    pub fn render(snapshot: &Snapshot) -> String {
        let secs = snapshot.elapsed.as_secs_f64();
        let messages = snapshot.sent + snapshot.received;
        let (rate, byte_rate) = if secs > 0.0 {
            (
                messages as f64 / secs,
                snapshot.bytes_total as f64 / 1024.0 / secs,
            )
        } else {
            (0.0, 0.0)
        };

        let mut out = format!(
            "sent: {}  failed: {}  received: {}\n\
             elapsed: {:.2}s  throughput: {:.1} msg/s, {:.1} kB/s\n\
             total: {:.1} kB",
            snapshot.sent,
            snapshot.failed,
            snapshot.received,
            secs,
            rate,
            byte_rate,
            snapshot.bytes_total as f64 / 1024.0,
        );
        if let Some(entropy) = &snapshot.entropy {
            out.push_str(&format!(
                "\nentropy: mean {:.3} bits/byte, stddev {:.3} ({} samples)",
                entropy.mean, entropy.stddev, entropy.samples
            ));
        }
        out
    }

    /// Logs a snapshot on a fixed cadence until shutdown. Runs beside the
    /// active loop, reading the shared counters only.
    pub async fn run_periodic(stats: Arc<RunStats>, cadence: Duration, shutdown: Arc<Shutdown>) {
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(cadence) => {
                    let snapshot = stats.snapshot();
                    info!(
                        sent = snapshot.sent,
                        failed = snapshot.failed,
                        received = snapshot.received,
                        bytes_total = snapshot.bytes_total,
                        "Progress"
                    );
                }
            }
        }
    }
}
