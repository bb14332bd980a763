/// Client-facing failure taxonomy. A revision conflict is NOT here: it is a
/// modeled outcome (`WriteOutcome::Conflict`), because the server answers it
/// with the canonical page rather than an error.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  /// Network or server failure; recoverable by backoff retry.
  #[error("transport failure: {0}")]
  Transport(String),

  /// The event stream dropped; recoverable by reconnect.
  #[error("event stream closed")]
  StreamClosed,

  /// Unknown page id. Fatal to the current agent, never retried.
  #[error("page not found: {0}")]
  PageNotFound(String),

  /// Malformed payload. Non-retryable, surfaced to the author.
  #[error("invalid request: {0}")]
  Validation(String),

  #[error(transparent)]
  Serde(#[from] serde_json::Error),

  /// The agent was closed while the call was pending.
  #[error("sync agent closed")]
  AgentClosed,

  #[error(transparent)]
  Internal(#[from] anyhow::Error),
}

impl SyncError {
  /// Whether the write path may transparently retry after this failure.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      SyncError::Transport(_) | SyncError::StreamClosed | SyncError::Internal(_)
    )
  }
}
