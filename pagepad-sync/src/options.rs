use std::time::Duration;

/// Every timing knob of the protocol in one place. Defaults are the
/// production values; tests shrink them to run in milliseconds.
#[derive(Debug, Clone)]
pub struct SyncOptions {
  /// Quiet window after the last local edit before a write goes out.
  pub debounce: Duration,
  /// First retry delay after a transient write failure; doubles per attempt.
  pub write_backoff_base: Duration,
  /// Ceiling for write retry delays.
  pub write_backoff_cap: Duration,
  /// First reconnect delay after the event stream drops; doubles per attempt.
  pub stream_backoff_base: Duration,
  /// Ceiling for reconnect delays.
  pub stream_backoff_cap: Duration,
  /// Presence heartbeat period while the agent is mounted.
  pub heartbeat_interval: Duration,
  /// Minimum gap between typing-start signals for one block.
  pub typing_throttle: Duration,
  /// How long a received typing indicator lives without a refresh.
  pub typing_decay: Duration,
  /// How long a received presence entry counts as online.
  pub presence_ttl: Duration,
  /// Period of the local roster sweep that prunes decayed entries.
  pub roster_sweep_interval: Duration,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self {
      debounce: Duration::from_millis(320),
      write_backoff_base: Duration::from_millis(350),
      write_backoff_cap: Duration::from_secs(4),
      stream_backoff_base: Duration::from_millis(450),
      stream_backoff_cap: Duration::from_secs(8),
      heartbeat_interval: Duration::from_secs(5),
      typing_throttle: Duration::from_millis(1200),
      typing_decay: Duration::from_millis(3500),
      presence_ttl: Duration::from_secs(15),
      roster_sweep_interval: Duration::from_secs(1),
    }
  }
}

impl SyncOptions {
  /// Millisecond-scale timings for tests that drive a real agent.
  pub fn fast() -> Self {
    Self {
      debounce: Duration::from_millis(20),
      write_backoff_base: Duration::from_millis(10),
      write_backoff_cap: Duration::from_millis(80),
      stream_backoff_base: Duration::from_millis(10),
      stream_backoff_cap: Duration::from_millis(80),
      heartbeat_interval: Duration::from_millis(50),
      typing_throttle: Duration::from_millis(40),
      typing_decay: Duration::from_millis(120),
      presence_ttl: Duration::from_millis(500),
      roster_sweep_interval: Duration::from_millis(25),
    }
  }
}
