//! Bounded exponential backoff for transient remote failures.

use std::time::Duration;

pub fn calculate_backoff(
    attempt: u32,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
) -> Duration {
    let base = base_delay_ms.unwrap_or(200);
    let max = max_delay_ms.unwrap_or(5_000);

    // Doubles each attempt; the exponent is clamped so the shift cannot
    // overflow before the cap applies.
    let delay_ms = base.saturating_mul(2_u64.saturating_pow(attempt.min(10)));
    let capped_delay = delay_ms.min(max);

    Duration::from_millis(capped_delay)
}
