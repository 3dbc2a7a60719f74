//! Reconnect policy with jittered exponential back-off.

use std::time::Duration;

/// Controls how the agent reconnects after a disconnect or a denial.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Cap on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub backoff_factor: f64,
    /// Consecutive failures before giving up; `0` retries forever.
    pub max_attempts: u32,
    /// Per-agent jitter seed; see [`ReconnectBackoff::seeded`].
    pub jitter_seed: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: 0,
            jitter_seed: 0,
        }
    }
}

impl ReconnectBackoff {
    /// Derive the jitter seed from `node_id`, so agents restarted together
    /// spread their reconnects instead of retrying in step.
    pub fn seeded(mut self, node_id: &str) -> Self {
        self.jitter_seed = seed_from(node_id);
        self
    }

    /// Delay before reconnect attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(attempt.min(32) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        // Up to 25% jitter, varying per seed and attempt.
        let jitter = capped_ms * 0.25 * spread(attempt, self.jitter_seed);
        Duration::from_millis((capped_ms + jitter) as u64)
    }

    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Deterministic fraction in [0, 1) derived from the attempt number and seed.
fn spread(attempt: u32, seed: u32) -> f64 {
    fraction(attempt.wrapping_add(seed).wrapping_mul(2_654_435_761))
}

fn fraction(hash: u32) -> f64 {
    f64::from(hash) / (f64::from(u32::MAX) + 1.0)
}

/// FNV-1a over the id bytes.
fn seed_from(id: &str) -> u32 {
    id.bytes().fold(0x811c_9dc5, |h: u32, b| {
        (h ^ u32::from(b)).wrapping_mul(0x0100_0193)
    })
}
