//! Exponential backoff with jitter: `delay = min(100ms * 2^attempt, 30s)
//! + random(0, delay * 0.5)`.

use std::time::Duration;

const BASE_MS: u64 = 100;
const CAP_MS: u64 = 30_000;

/// Compute the backoff delay for the given retry attempt (0-indexed).
pub fn next_delay(attempt: u32) -> Duration {
    let base_ms = BASE_MS.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    let capped_ms = base_ms.min(CAP_MS);
    let jitter_ms = (rand::random::<f64>() * capped_ms as f64 * 0.5) as u64;
    Duration::from_millis(capped_ms + jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_with_attempt_and_stays_capped() {
        let d0 = next_delay(0);
        assert!(d0.as_millis() >= 100 && d0.as_millis() <= 150);

        let d_big = next_delay(20);
        assert!(d_big.as_millis() <= (CAP_MS as f64 * 1.5) as u128);
    }

    #[test]
    fn delay_never_panics_on_large_attempt() {
        let _ = next_delay(u32::MAX);
    }
}
