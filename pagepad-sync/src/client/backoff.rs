use std::time::Duration;

/// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`, capped.
/// The caller resets its attempt counter on success, which is what makes
/// this a schedule rather than a strategy object.
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
  let exponent = attempt.saturating_sub(1).min(16);
  let delay = base.saturating_mul(1u32 << exponent);
  delay.min(cap)
}
