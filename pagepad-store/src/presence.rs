use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pagepad_entity::Clock;
use std::sync::Arc;
use std::time::Duration;

/// A session counts as online while its last heartbeat is at most this old.
/// The TTL compensates for abrupt disconnects where no explicit leave ever
/// arrives.
pub const PRESENCE_TTL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct PresenceEntry {
  pub page_id: String,
  pub session_id: String,
  pub user_name: String,
  pub last_seen_at: DateTime<Utc>,
}

impl PresenceEntry {
  fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
    let age = now.signed_duration_since(self.last_seen_at);
    age.num_milliseconds() <= ttl.as_millis() as i64
  }
}

/// Last-write-wins TTL map of who is viewing which page. No transactional
/// semantics: a lost heartbeat at worst shows a viewer as offline until the
/// next one lands.
pub struct PresenceRegistry {
  clock: Arc<dyn Clock>,
  entries: DashMap<(String, String), PresenceEntry>,
}

impl PresenceRegistry {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    Self {
      clock,
      entries: DashMap::new(),
    }
  }

  /// Refresh `last_seen_at` for the session, creating the entry on first
  /// contact.
  pub fn heartbeat(&self, page_id: &str, session_id: &str, user_name: &str) {
    let now = self.clock.now();
    self.entries.insert(
      (page_id.to_string(), session_id.to_string()),
      PresenceEntry {
        page_id: page_id.to_string(),
        session_id: session_id.to_string(),
        user_name: user_name.to_string(),
        last_seen_at: now,
      },
    );
  }

  /// Drop the entry. Best-effort: an already-expired or unknown session is
  /// not an error.
  pub fn leave(&self, page_id: &str, session_id: &str) -> Option<PresenceEntry> {
    self
      .entries
      .remove(&(page_id.to_string(), session_id.to_string()))
      .map(|(_, entry)| entry)
  }

  /// Sessions currently online for the page, TTL-filtered.
  pub fn online(&self, page_id: &str) -> Vec<PresenceEntry> {
    let now = self.clock.now();
    self
      .entries
      .iter()
      .filter(|entry| entry.page_id == page_id && entry.is_fresh(now, PRESENCE_TTL))
      .map(|entry| entry.value().clone())
      .collect()
  }

  pub fn is_online(&self, page_id: &str, session_id: &str) -> bool {
    let now = self.clock.now();
    self
      .entries
      .get(&(page_id.to_string(), session_id.to_string()))
      .map(|entry| entry.is_fresh(now, PRESENCE_TTL))
      .unwrap_or(false)
  }

  /// Drop entries past the TTL. Freshness checks filter on read anyway;
  /// this bounds the map.
  pub fn prune(&self) {
    let now = self.clock.now();
    self.entries.retain(|_, entry| entry.is_fresh(now, PRESENCE_TTL));
  }
}
