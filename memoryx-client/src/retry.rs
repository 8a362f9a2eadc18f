//! Exponential backoff with jitter for outbox retry scheduling
//! (spec.md §4.1: `base · 2^retry` clamped to 60s with ±20% jitter).

use std::time::Duration;

use rand::Rng;

/// Computes the backoff delay before the next retry attempt.
pub fn backoff_delay(base: Duration, max: Duration, retry_count: u32) -> Duration {
    let exponent = retry_count.min(32);
    let scaled = base.as_millis().saturating_mul(1u128 << exponent);
    let clamped = scaled.min(max.as_millis());
    let jitter_fraction = rand::thread_rng().gen_range(-0.2..=0.2);
    let jittered = (clamped as f64 * (1.0 + jitter_fraction)).max(0.0) as u64;
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_to_max() {
        let delay = backoff_delay(Duration::from_secs(1), Duration::from_secs(60), 20);
        assert!(delay <= Duration::from_millis(60_000 * 12 / 10));
    }

    #[test]
    fn grows_with_retry_count() {
        let d0 = backoff_delay(Duration::from_millis(100), Duration::from_secs(60), 0);
        let d3 = backoff_delay(Duration::from_millis(100), Duration::from_secs(60), 3);
        // Even with jitter, the exponential trend should dominate across the
        // [0.8x, 1.2x] jitter band for this gap in retry_count.
        assert!(d3.as_millis() > d0.as_millis());
    }
}
