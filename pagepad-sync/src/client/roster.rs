use chrono::{DateTime, Utc};
use pagepad_entity::{PresenceSignal, TypingSignal};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TypingPeer {
  pub block_id: String,
  pub session_id: String,
  pub user_name: String,
  pub seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PresencePeer {
  pub session_id: String,
  pub user_name: String,
  pub last_seen_at: DateTime<Utc>,
}

fn within(seen_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
  now.signed_duration_since(seen_at).num_milliseconds() <= ttl.as_millis() as i64
}

/// Receive-side view of the other sessions on a page. Each client keeps its
/// own decaying copy, so a lost stop or offline signal merely leaves a stale
/// indicator that expires on its own.
#[derive(Debug, Default)]
pub struct PeerRoster {
  own_session: String,
  typing: HashMap<String, TypingPeer>,
  peers: HashMap<String, PresencePeer>,
}

impl PeerRoster {
  pub fn new(own_session: impl Into<String>) -> Self {
    Self {
      own_session: own_session.into(),
      typing: HashMap::new(),
      peers: HashMap::new(),
    }
  }

  /// A start stamps (or re-stamps) the local expiry for the block; a stop
  /// clears it immediately. Our own echoes are ignored.
  pub fn apply_typing(&mut self, signal: &TypingSignal, now: DateTime<Utc>) {
    if signal.session_id == self.own_session {
      return;
    }
    if signal.is_typing {
      self.typing.insert(
        signal.block_id.clone(),
        TypingPeer {
          block_id: signal.block_id.clone(),
          session_id: signal.session_id.clone(),
          user_name: signal.user_name.clone(),
          seen_at: now,
        },
      );
    } else if self
      .typing
      .get(&signal.block_id)
      .map(|peer| peer.session_id == signal.session_id)
      .unwrap_or(false)
    {
      self.typing.remove(&signal.block_id);
    }
  }

  pub fn apply_presence(&mut self, signal: &PresenceSignal, now: DateTime<Utc>) {
    if signal.session_id == self.own_session {
      return;
    }
    if signal.is_online {
      self.peers.insert(
        signal.session_id.clone(),
        PresencePeer {
          session_id: signal.session_id.clone(),
          user_name: signal.user_name.clone(),
          last_seen_at: now,
        },
      );
    } else {
      self.peers.remove(&signal.session_id);
    }
  }

  /// Who is typing in `block_id` right now, if the indicator hasn't decayed.
  pub fn typing_on(&self, block_id: &str, now: DateTime<Utc>, decay: Duration) -> Option<&TypingPeer> {
    self
      .typing
      .get(block_id)
      .filter(|peer| within(peer.seen_at, now, decay))
  }

  pub fn typing_peers(&self, now: DateTime<Utc>, decay: Duration) -> Vec<TypingPeer> {
    self
      .typing
      .values()
      .filter(|peer| within(peer.seen_at, now, decay))
      .cloned()
      .collect()
  }

  pub fn online_peers(&self, now: DateTime<Utc>, ttl: Duration) -> Vec<PresencePeer> {
    self
      .peers
      .values()
      .filter(|peer| within(peer.last_seen_at, now, ttl))
      .cloned()
      .collect()
  }

  /// Drop decayed entries. Reads filter by age anyway; the sweep bounds the
  /// maps.
  pub fn prune(&mut self, now: DateTime<Utc>, decay: Duration, ttl: Duration) {
    self.typing.retain(|_, peer| within(peer.seen_at, now, decay));
    self.peers.retain(|_, peer| within(peer.last_seen_at, now, ttl));
  }
}
