//! Retry helpers: backoff with jitter and status classification.

use std::time::Duration;

use rand::Rng;

/// Base delay for the first retry.
pub const BACKOFF_BASE_MS: u64 = 500;

/// Ceiling on any single backoff delay.
pub const BACKOFF_CAP_MS: u64 = 8_000;

/// Statuses that should rotate to the next credential: rate limits and
/// auth/quota rejections.
pub fn is_rotation_status(status: u16) -> bool {
    matches!(status, 429 | 401 | 403)
}

/// Transient server-side statuses worth retrying on the same credential.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 500 | 502 | 503 | 504)
}

/// Calculate exponential backoff delay with ±20% jitter.
///
/// Base delay is 500 ms, doubled each attempt, capped at 8 s:
/// - attempt 0: ~500ms (400–600ms)
/// - attempt 1: ~1s (800ms–1.2s)
/// - attempt 4: ~8s (6.4–9.6s, capped before jitter)
pub fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = BACKOFF_BASE_MS
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(BACKOFF_CAP_MS);
    let jitter_range = base_ms / 5; // 20%
    let jitter = if jitter_range > 0 {
        let offset = rand::thread_rng().gen_range(0..=jitter_range * 2);
        offset as i64 - jitter_range as i64
    } else {
        0
    };
    let delay_ms = (base_ms as i64 + jitter).max(1) as u64;
    Duration::from_millis(delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_and_retry_statuses_are_disjoint() {
        assert!(is_rotation_status(429));
        assert!(is_rotation_status(401));
        assert!(is_rotation_status(403));
        assert!(!is_rotation_status(500));

        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(429));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(200));
    }

    #[test]
    fn backoff_grows_exponentially_within_jitter_bounds() {
        for _ in 0..20 {
            let d0 = backoff_delay(0);
            assert!(d0.as_millis() >= 400 && d0.as_millis() <= 600, "{d0:?}");

            let d1 = backoff_delay(1);
            assert!(d1.as_millis() >= 800 && d1.as_millis() <= 1200, "{d1:?}");

            let d2 = backoff_delay(2);
            assert!(d2.as_millis() >= 1600 && d2.as_millis() <= 2400, "{d2:?}");
        }
    }

    #[test]
    fn backoff_is_capped() {
        for _ in 0..20 {
            let d = backoff_delay(10);
            assert!(d.as_millis() <= (BACKOFF_CAP_MS + BACKOFF_CAP_MS / 5) as u128);
        }
    }

    #[test]
    fn backoff_does_not_overflow_on_large_attempts() {
        let d = backoff_delay(64);
        assert!(d.as_millis() >= 1);
    }
}
