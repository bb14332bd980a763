use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// Single seam for "what time is it". Every TTL, debounce and throttle
/// decision reads the clock through this trait so tests can move time
/// forward without sleeping.
pub trait Clock: Send + Sync + 'static {
  fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Test clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
  now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Arc::new(RwLock::new(start)),
    }
  }

  pub fn starting_now() -> Self {
    Self::new(Utc::now())
  }

  pub fn advance(&self, by: Duration) {
    let mut now = self.now.write();
    *now = *now + by;
  }

  pub fn set(&self, to: DateTime<Utc>) {
    *self.now.write() = to;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.read()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn manual_clock_advances_on_demand() {
    let clock = ManualClock::starting_now();
    let before = clock.now();
    clock.advance(Duration::seconds(42));
    assert_eq!(clock.now() - before, Duration::seconds(42));
  }
}
