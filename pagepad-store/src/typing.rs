use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pagepad_entity::Clock;
use std::sync::Arc;
use std::time::Duration;

/// How long a typing claim lives without a refresh. Matches the decay the
/// receiving side applies, so a crashed client's indicator self-heals.
pub const TYPING_TTL: Duration = Duration::from_millis(3500);

/// Advisory claim that a session is actively editing one block. Never
/// consulted by the write path; it only feeds the typing indicators.
#[derive(Debug, Clone)]
pub struct TypingLock {
  pub page_id: String,
  pub block_id: String,
  pub session_id: String,
  pub user_name: String,
  pub expires_at: DateTime<Utc>,
}

impl TypingLock {
  fn is_current(&self, now: DateTime<Utc>) -> bool {
    now < self.expires_at
  }
}

/// TTL map keyed by (page, block): at most one current lock per block, the
/// newest start wins.
pub struct TypingRegistry {
  clock: Arc<dyn Clock>,
  locks: DashMap<(String, String), TypingLock>,
}

impl TypingRegistry {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    Self {
      clock,
      locks: DashMap::new(),
    }
  }

  /// Insert or refresh the lock for this block.
  pub fn start(&self, page_id: &str, block_id: &str, session_id: &str, user_name: &str) {
    let now = self.clock.now();
    let expires_at = now + chrono::Duration::milliseconds(TYPING_TTL.as_millis() as i64);
    self.locks.insert(
      (page_id.to_string(), block_id.to_string()),
      TypingLock {
        page_id: page_id.to_string(),
        block_id: block_id.to_string(),
        session_id: session_id.to_string(),
        user_name: user_name.to_string(),
        expires_at,
      },
    );
  }

  /// Release the lock, but only when the caller still holds it. A stop
  /// from a session that already lost the block to a newer start must not
  /// clear the newer claim.
  pub fn stop(&self, page_id: &str, block_id: &str, session_id: &str) {
    self
      .locks
      .remove_if(&(page_id.to_string(), block_id.to_string()), |_, lock| {
        lock.session_id == session_id
      });
  }

  /// Current (non-expired) locks for the page.
  pub fn active_locks(&self, page_id: &str) -> Vec<TypingLock> {
    let now = self.clock.now();
    self
      .locks
      .iter()
      .filter(|lock| lock.page_id == page_id && lock.is_current(now))
      .map(|lock| lock.value().clone())
      .collect()
  }

  pub fn holder(&self, page_id: &str, block_id: &str) -> Option<TypingLock> {
    let now = self.clock.now();
    self
      .locks
      .get(&(page_id.to_string(), block_id.to_string()))
      .filter(|lock| lock.is_current(now))
      .map(|lock| lock.value().clone())
  }

  pub fn prune(&self) {
    let now = self.clock.now();
    self.locks.retain(|_, lock| lock.is_current(now));
  }
}
