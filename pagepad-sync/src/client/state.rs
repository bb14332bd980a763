/// Where the agent stands with respect to the server. Modeled as one tagged
/// state instead of ad hoc booleans so the single rule that matters (when
/// may an incoming remote snapshot overwrite local state) is a predicate on
/// this enum and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
  /// Nothing pending; the local page matches the last server answer.
  Idle,
  /// Local edits are buffered, waiting out the debounce window.
  Dirty,
  /// Exactly one write is in flight.
  Syncing,
  /// A transient failure; the same coalesced payload will be resent.
  Retrying { attempt: u32 },
  /// The last write lost the revision race; the canonical snapshot is being
  /// adopted.
  Conflict,
  /// A non-retryable failure (unknown page, rejected payload). The agent
  /// stops writing; the error is surfaced through `last_error`.
  Failed,
}

impl SyncState {
  /// A remote `page` event may replace local state only while nothing local
  /// is pending or in flight; otherwise a stale snapshot would clobber
  /// edits the server has not seen yet.
  pub fn accepts_remote(&self) -> bool {
    matches!(self, SyncState::Idle)
  }

  pub fn is_retrying(&self) -> bool {
    matches!(self, SyncState::Retrying { .. })
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, SyncState::Failed)
  }
}
