use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Payloads never shrink below this regardless of how far the size
/// distribution wanders negative.
const MIN_PAYLOAD_BYTES: usize = 1;

/// A synthesized outbound message. Built once per send, serialized to the
/// wire and discarded.
#[derive(Debug, Clone)]
pub struct Message {
    pub payload: Vec<u8>,
    pub entropy: Option<f64>,
    pub persistent: bool,
}

impl Message {
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Generates messages of a target size in kB with Gaussian spread.
///
/// Sizes are sampled from Normal(size * 1024, stddev * 1024) bytes, so the
/// stddev flag shares the kB unit of the size flag, and are clamped to a
/// 1-byte floor (a truncated normal rather than a resample). With stddev 0
/// every payload is exactly the rounded target size.
pub struct Synthesizer {
    mean_bytes: f64,
    spread: Option<Normal<f64>>,
    persistent: bool,
    track_entropy: bool,
}

impl Synthesizer {
    pub fn new(size_kb: f64, stddev_kb: u32, persistent: bool, track_entropy: bool) -> Self {
        let mean_bytes = size_kb * 1024.0;
        // Normal::new only fails on a non-finite or negative sigma, which
        // the validated options rule out; stddev 0 short-circuits to a
        // fixed size instead.
        let spread = if stddev_kb > 0 {
            Normal::new(mean_bytes, f64::from(stddev_kb) * 1024.0).ok()
        } else {
            None
        };
        Self {
            mean_bytes,
            spread,
            persistent,
            track_entropy,
        }
    }

    pub fn synthesize(&self) -> Message {
        let mut rng = rand::rng();
        let size = match &self.spread {
            Some(normal) => normal.sample(&mut rng).round(),
            None => self.mean_bytes.round(),
        };
        let size = (size.max(MIN_PAYLOAD_BYTES as f64)) as usize;

        let mut payload = vec![0u8; size];
        rng.fill(payload.as_mut_slice());

        let entropy = self.track_entropy.then(|| shannon_entropy(&payload));

        Message {
            payload,
            entropy,
            persistent: self.persistent,
        }
    }
}

/// Shannon entropy of the byte histogram, in bits per byte ([0, 8]).
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u64; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }
    let len = data.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}
