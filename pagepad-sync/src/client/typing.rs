use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Outgoing typing bookkeeping for one session. "Start" is throttled per
/// block while the author keeps typing; "stop" always goes out immediately.
/// The tracker also remembers every block this session marked, so teardown
/// can stop them all.
#[derive(Debug, Default)]
pub struct TypingTracker {
  last_start: HashMap<String, DateTime<Utc>>,
}

impl TypingTracker {
  /// Record a keystroke on `block_id`. Returns true when a start signal
  /// should actually be sent (first keystroke, or the throttle window has
  /// passed since the last sent start).
  pub fn note_start(&mut self, block_id: &str, now: DateTime<Utc>, throttle: Duration) -> bool {
    match self.last_start.get(block_id) {
      Some(sent_at) => {
        let since = now.signed_duration_since(*sent_at);
        if since.num_milliseconds() >= throttle.as_millis() as i64 {
          self.last_start.insert(block_id.to_string(), now);
          true
        } else {
          false
        }
      },
      None => {
        self.last_start.insert(block_id.to_string(), now);
        true
      },
    }
  }

  /// Forget the block. The stop signal itself is unconditional; this only
  /// clears the throttle state so the next keystroke sends a fresh start.
  pub fn note_stop(&mut self, block_id: &str) {
    self.last_start.remove(block_id);
  }

  /// Blocks this session currently marks as typing; drained at teardown so
  /// each one gets a final stop signal.
  pub fn drain(&mut self) -> Vec<String> {
    self.last_start.drain().map(|(block_id, _)| block_id).collect()
  }
}
