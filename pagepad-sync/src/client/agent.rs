use crate::client::backoff::backoff_delay;
use crate::client::buffer::{EditBuffer, PendingWrite};
use crate::client::roster::{PeerRoster, PresencePeer, TypingPeer};
use crate::client::state::SyncState;
use crate::client::transport::SyncTransport;
use crate::client::typing::TypingTracker;
use crate::error::SyncError;
use crate::options::SyncOptions;
use arc_swap::ArcSwapOption;
use futures_util::StreamExt;
use pagepad_entity::{
  Block, Clock, Page, PageDraft, PageEvent, PageMeta, PresenceSignal, Revision, SystemClock,
  TypingSignal,
};
use pagepad_store::WriteOutcome;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How the agent comes to life: attached to a page that already exists on
/// the server, or carrying a local draft that is created on first write.
#[derive(Debug, Clone)]
pub enum AgentSeed {
  Existing { page_id: String },
  Draft(PageDraft),
}

enum AgentCommand {
  EditBlocks(Vec<Block>),
  EditMeta(PageMeta),
  Typing { block_id: String, is_typing: bool },
  Close(oneshot::Sender<()>),
}

enum RequestOutcome {
  Created(Result<Page, SyncError>),
  Wrote(Result<WriteOutcome, SyncError>),
}

enum StreamMessage {
  /// Canonical state fetched right after a (re)subscribe.
  Connected(Page),
  Event(PageEvent),
}

/// Per-editor-session sync agent. Owns its timers, its pending-edit buffer
/// and its peer maps; nothing is global, so concurrent sessions never share
/// state. All work happens on one cooperative event loop, and at most one
/// write request is ever in flight.
pub struct SyncAgent {
  session_id: String,
  cmd_tx: mpsc::UnboundedSender<AgentCommand>,
  page: Arc<ArcSwapOption<Page>>,
  state_rx: watch::Receiver<SyncState>,
  roster: Arc<RwLock<PeerRoster>>,
  last_error: Arc<RwLock<Option<Arc<SyncError>>>>,
  options: SyncOptions,
  clock: Arc<dyn Clock>,
  runner: JoinHandle<()>,
}

impl SyncAgent {
  pub fn spawn(
    transport: Arc<dyn SyncTransport>,
    seed: AgentSeed,
    user_name: impl Into<String>,
    options: SyncOptions,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let session_id = Uuid::new_v4().to_string();
    let user_name = user_name.into();
    let page = Arc::new(ArcSwapOption::const_empty());
    let roster = Arc::new(RwLock::new(PeerRoster::new(session_id.clone())));
    let last_error = Arc::new(RwLock::new(None));
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(SyncState::Idle);
    let (result_tx, result_rx) = mpsc::unbounded_channel();
    let (stream_tx, stream_rx) = mpsc::unbounded_channel();

    let (page_id, draft) = match seed {
      AgentSeed::Existing { page_id } => (Some(page_id), None),
      AgentSeed::Draft(draft) => (None, Some(draft)),
    };

    let worker = AgentWorker {
      transport,
      options: options.clone(),
      clock: clock.clone(),
      session_id: session_id.clone(),
      user_name,
      page_id,
      draft,
      revision: Revision::default(),
      state: state_tx,
      page: page.clone(),
      roster: roster.clone(),
      last_error: last_error.clone(),
      buffer: EditBuffer::default(),
      in_flight: None,
      creating: false,
      outstanding: false,
      attempt: 0,
      retry_at: None,
      tracker: TypingTracker::default(),
      cmd_rx,
      result_tx,
      result_rx,
      stream_tx,
      stream_rx,
      stream_task: None,
      heartbeat_task: None,
    };
    let runner = tokio::spawn(worker.run());

    Self {
      session_id,
      cmd_tx,
      page,
      state_rx,
      roster,
      last_error,
      options,
      clock,
      runner,
    }
  }

  /// Spawn with the production options and wall clock.
  pub fn spawn_default(
    transport: Arc<dyn SyncTransport>,
    seed: AgentSeed,
    user_name: impl Into<String>,
  ) -> Self {
    Self::spawn(
      transport,
      seed,
      user_name,
      SyncOptions::default(),
      Arc::new(SystemClock),
    )
  }

  pub fn session_id(&self) -> &str {
    &self.session_id
  }

  /// Last adopted canonical page, if any.
  pub fn page(&self) -> Option<Arc<Page>> {
    self.page.load_full()
  }

  pub fn state(&self) -> SyncState {
    *self.state_rx.borrow()
  }

  pub fn state_stream(&self) -> watch::Receiver<SyncState> {
    self.state_rx.clone()
  }

  /// The non-retryable error that moved the agent to `Failed`, if any.
  pub fn last_error(&self) -> Option<Arc<SyncError>> {
    self.last_error.read().clone()
  }

  /// Replace the local block list. Starts (or restarts) the debounce window.
  pub fn edit_blocks(&self, blocks: Vec<Block>) {
    let _ = self.cmd_tx.send(AgentCommand::EditBlocks(blocks));
  }

  /// Stage a meta edit. Coalesces field-wise with anything already pending.
  pub fn edit_meta(&self, meta: PageMeta) {
    let _ = self.cmd_tx.send(AgentCommand::EditMeta(meta));
  }

  /// Signal that this session started or stopped typing in a block. Starts
  /// are throttled; stops always go out immediately.
  pub fn set_typing(&self, block_id: impl Into<String>, is_typing: bool) {
    let _ = self.cmd_tx.send(AgentCommand::Typing {
      block_id: block_id.into(),
      is_typing,
    });
  }

  pub fn typing_on(&self, block_id: &str) -> Option<TypingPeer> {
    let now = self.clock.now();
    self
      .roster
      .read()
      .typing_on(block_id, now, self.options.typing_decay)
      .cloned()
  }

  pub fn typing_peers(&self) -> Vec<TypingPeer> {
    let now = self.clock.now();
    self.roster.read().typing_peers(now, self.options.typing_decay)
  }

  pub fn online_peers(&self) -> Vec<PresencePeer> {
    let now = self.clock.now();
    self.roster.read().online_peers(now, self.options.presence_ttl)
  }

  /// Tear the session down: best-effort presence-offline and typing-stop
  /// for every block this session marked, then cancel all timers and close
  /// the stream.
  pub async fn close(self) {
    let (ack_tx, ack_rx) = oneshot::channel();
    if self.cmd_tx.send(AgentCommand::Close(ack_tx)).is_ok() {
      let _ = ack_rx.await;
    }
    let _ = self.runner.await;
  }
}

struct AgentWorker {
  transport: Arc<dyn SyncTransport>,
  options: SyncOptions,
  clock: Arc<dyn Clock>,
  session_id: String,
  user_name: String,
  page_id: Option<String>,
  draft: Option<PageDraft>,
  revision: Revision,
  state: watch::Sender<SyncState>,
  page: Arc<ArcSwapOption<Page>>,
  roster: Arc<RwLock<PeerRoster>>,
  last_error: Arc<RwLock<Option<Arc<SyncError>>>>,
  buffer: EditBuffer,
  /// The coalesced payload reserved for the write currently in flight or
  /// awaiting its retry slot.
  in_flight: Option<PendingWrite>,
  creating: bool,
  /// True while a request task is actually running.
  outstanding: bool,
  attempt: u32,
  retry_at: Option<tokio::time::Instant>,
  tracker: TypingTracker,
  cmd_rx: mpsc::UnboundedReceiver<AgentCommand>,
  result_tx: mpsc::UnboundedSender<RequestOutcome>,
  result_rx: mpsc::UnboundedReceiver<RequestOutcome>,
  stream_tx: mpsc::UnboundedSender<StreamMessage>,
  stream_rx: mpsc::UnboundedReceiver<StreamMessage>,
  stream_task: Option<JoinHandle<()>>,
  heartbeat_task: Option<JoinHandle<()>>,
}

enum Wake {
  Cmd(Option<AgentCommand>),
  Result(RequestOutcome),
  Stream(StreamMessage),
  Tick,
}

impl AgentWorker {
  async fn run(mut self) {
    if let Some(page_id) = self.page_id.clone() {
      self.attach(&page_id);
    }

    loop {
      let wake_after = self.next_wake();
      let wake = tokio::select! {
        cmd = self.cmd_rx.recv() => Wake::Cmd(cmd),
        Some(outcome) = self.result_rx.recv() => Wake::Result(outcome),
        Some(message) = self.stream_rx.recv() => Wake::Stream(message),
        _ = tokio::time::sleep(wake_after) => Wake::Tick,
      };

      match wake {
        Wake::Cmd(Some(AgentCommand::Close(ack))) => {
          self.shutdown().await;
          let _ = ack.send(());
          return;
        },
        Wake::Cmd(Some(command)) => self.handle_command(command),
        Wake::Cmd(None) => {
          // The handle was dropped; same teardown as an explicit close.
          self.shutdown().await;
          return;
        },
        Wake::Result(outcome) => self.handle_result(outcome),
        Wake::Stream(message) => self.handle_stream(message),
        Wake::Tick => self.sweep(),
      }

      self.pump();
    }
  }

  /// Time until the next thing that needs attention: the debounce deadline,
  /// the retry slot, or the roster sweep.
  fn next_wake(&self) -> Duration {
    let mut wake = self.options.roster_sweep_interval;
    if !self.outstanding && self.in_flight.is_none() {
      if let Some(ms) = self.buffer.due_in_ms(self.clock.now(), self.options.debounce) {
        wake = wake.min(Duration::from_millis(ms));
      }
    }
    if let Some(at) = self.retry_at {
      wake = wake.min(at.saturating_duration_since(tokio::time::Instant::now()));
    }
    wake.max(Duration::from_millis(1))
  }

  fn handle_command(&mut self, command: AgentCommand) {
    match command {
      AgentCommand::EditBlocks(blocks) => {
        if self.is_failed() {
          tracing::warn!("agent failed, dropping block edit");
          return;
        }
        self.buffer.edit_blocks(blocks, self.clock.now());
        self.update_state();
      },
      AgentCommand::EditMeta(meta) => {
        if self.is_failed() {
          tracing::warn!("agent failed, dropping meta edit");
          return;
        }
        self.buffer.edit_meta(meta, self.clock.now());
        self.update_state();
      },
      AgentCommand::Typing { block_id, is_typing } => self.handle_typing(block_id, is_typing),
      AgentCommand::Close(_) => unreachable!("close is handled in the loop"),
    }
  }

  fn handle_typing(&mut self, block_id: String, is_typing: bool) {
    // An unpersisted draft has nothing for peers to point at yet.
    let Some(page_id) = self.page_id.clone() else {
      return;
    };
    if is_typing {
      if self
        .tracker
        .note_start(&block_id, self.clock.now(), self.options.typing_throttle)
      {
        self.send_signal(TypingSignal::start(
          page_id,
          block_id,
          &self.session_id,
          &self.user_name,
        ));
      }
    } else {
      self.tracker.note_stop(&block_id);
      self.send_signal(TypingSignal::stop(
        page_id,
        block_id,
        &self.session_id,
        &self.user_name,
      ));
    }
  }

  /// Typing signals are fire-and-forget; a lost one self-heals via TTL.
  fn send_signal(&self, signal: TypingSignal) {
    let transport = self.transport.clone();
    tokio::spawn(async move {
      if let Err(err) = transport.send_typing(signal).await {
        tracing::trace!(?err, "typing signal dropped");
      }
    });
  }

  fn handle_result(&mut self, outcome: RequestOutcome) {
    self.outstanding = false;
    match outcome {
      RequestOutcome::Created(Ok(page)) => {
        tracing::debug!(page_id = %page.id, "page created");
        self.creating = false;
        self.draft = None;
        self.attempt = 0;
        self.page_id = Some(page.id.clone());
        self.adopt(page);
        let page_id = self.page_id.clone().unwrap_or_default();
        self.attach(&page_id);
        self.update_state();
      },
      RequestOutcome::Wrote(Ok(WriteOutcome::Applied(page))) => {
        tracing::trace!(revision = %page.revision, "write applied");
        self.in_flight = None;
        self.attempt = 0;
        self.adopt(page);
        self.update_state();
      },
      RequestOutcome::Wrote(Ok(WriteOutcome::Conflict(page))) => {
        // Lost the revision race. Adopt the canonical page wholesale: every
        // edit made before this response is superseded by definition.
        tracing::debug!(revision = %page.revision, "write conflicted, adopting canonical page");
        let _ = self.state.send(SyncState::Conflict);
        self.in_flight = None;
        self.attempt = 0;
        self.retry_at = None;
        self.buffer.clear();
        self.adopt(page);
        self.update_state();
      },
      RequestOutcome::Created(Err(err)) | RequestOutcome::Wrote(Err(err)) => {
        if err.is_retryable() {
          self.attempt += 1;
          let delay = backoff_delay(
            self.options.write_backoff_base,
            self.options.write_backoff_cap,
            self.attempt,
          );
          tracing::warn!(?err, attempt = self.attempt, ?delay, "transient write failure");
          self.retry_at = Some(tokio::time::Instant::now() + delay);
          let _ = self.state.send(SyncState::Retrying {
            attempt: self.attempt,
          });
        } else {
          tracing::error!(?err, "non-retryable write failure");
          *self.last_error.write() = Some(Arc::new(err));
          self.in_flight = None;
          self.creating = false;
          self.retry_at = None;
          let _ = self.state.send(SyncState::Failed);
        }
      },
    }
  }

  fn handle_stream(&mut self, message: StreamMessage) {
    match message {
      StreamMessage::Connected(page) => self.maybe_adopt_remote(page),
      StreamMessage::Event(PageEvent::Page(page)) => self.maybe_adopt_remote(*page),
      StreamMessage::Event(PageEvent::Typing(signal)) => {
        self.roster.write().apply_typing(&signal, self.clock.now());
      },
      StreamMessage::Event(PageEvent::Presence(signal)) => {
        self.roster.write().apply_presence(&signal, self.clock.now());
      },
    }
  }

  /// The single gating rule for remote snapshots: apply only while nothing
  /// local is pending or in flight. Exceptions: the first canonical fetch
  /// (nothing to clobber yet), and a snapshot that already contains the
  /// in-flight payload, which short-circuits a retry whose response was
  /// lost.
  fn maybe_adopt_remote(&mut self, page: Page) {
    let state = *self.state.borrow();
    if state.accepts_remote() || self.revision.is_empty() {
      if page.revision != self.revision {
        self.adopt(page);
      }
      return;
    }
    if state.is_retrying() {
      if let Some(payload) = &self.in_flight {
        if payload.reflected_in(&page) {
          tracing::debug!("own write observed on the stream, skipping retry");
          self.in_flight = None;
          self.retry_at = None;
          self.attempt = 0;
          self.adopt(page);
          self.update_state();
        }
      }
    }
  }

  fn adopt(&mut self, page: Page) {
    self.revision = page.revision.clone();
    self.page.store(Some(Arc::new(page)));
  }

  /// Dispatch the next due request, respecting the one-in-flight gate.
  fn pump(&mut self) {
    if self.is_failed() || self.outstanding {
      return;
    }

    if let Some(at) = self.retry_at {
      if tokio::time::Instant::now() >= at {
        self.retry_at = None;
        if self.creating {
          self.dispatch_create();
        } else {
          self.dispatch_write();
        }
      }
      return;
    }

    if self.in_flight.is_some() {
      // Reserved payload waiting on its retry slot.
      return;
    }

    if !self.buffer.due(self.clock.now(), self.options.debounce) {
      return;
    }

    if self.page_id.is_none() {
      // First write from a fresh draft: create, then send the pending edit
      // against the assigned id.
      self.creating = true;
      self.dispatch_create();
      return;
    }

    if self.revision.is_empty() {
      // Waiting for the first canonical fetch; edits stay buffered.
      return;
    }

    self.in_flight = self.buffer.take_next();
    if self.in_flight.is_some() {
      self.dispatch_write();
    }
  }

  fn dispatch_create(&mut self) {
    let draft = self.draft.clone().unwrap_or_default();
    let transport = self.transport.clone();
    let results = self.result_tx.clone();
    self.outstanding = true;
    let _ = self.state.send(SyncState::Syncing);
    tokio::spawn(async move {
      let outcome = transport.create_page(draft).await;
      let _ = results.send(RequestOutcome::Created(outcome));
    });
  }

  fn dispatch_write(&mut self) {
    let (Some(payload), Some(page_id)) = (self.in_flight.clone(), self.page_id.clone()) else {
      return;
    };
    let base = self.revision.clone();
    let transport = self.transport.clone();
    let results = self.result_tx.clone();
    self.outstanding = true;
    let _ = self.state.send(SyncState::Syncing);
    tokio::spawn(async move {
      let outcome = match payload {
        PendingWrite::Blocks(blocks) => transport.push_blocks(&page_id, blocks, base).await,
        PendingWrite::Meta(meta) => transport.push_meta(&page_id, meta, base).await,
      };
      let _ = results.send(RequestOutcome::Wrote(outcome));
    });
  }

  /// Recompute the resting state after a completion or an edit.
  fn update_state(&mut self) {
    if self.is_failed() {
      return;
    }
    let next = if self.outstanding {
      SyncState::Syncing
    } else if self.in_flight.is_some() || self.retry_at.is_some() {
      SyncState::Retrying {
        attempt: self.attempt,
      }
    } else if !self.buffer.is_empty() {
      SyncState::Dirty
    } else {
      SyncState::Idle
    };
    let _ = self.state.send(next);
  }

  fn is_failed(&self) -> bool {
    self.state.borrow().is_terminal()
  }

  fn sweep(&mut self) {
    let now = self.clock.now();
    self
      .roster
      .write()
      .prune(now, self.options.typing_decay, self.options.presence_ttl);
  }

  /// Start the stream and heartbeat tasks once the page id is known.
  fn attach(&mut self, page_id: &str) {
    if self.stream_task.is_none() {
      self.stream_task = Some(tokio::spawn(run_stream(
        self.transport.clone(),
        page_id.to_string(),
        self.stream_tx.clone(),
        self.options.clone(),
      )));
    }
    if self.heartbeat_task.is_none() {
      self.heartbeat_task = Some(tokio::spawn(run_heartbeat(
        self.transport.clone(),
        page_id.to_string(),
        self.session_id.clone(),
        self.user_name.clone(),
        self.options.heartbeat_interval,
      )));
    }
  }

  async fn shutdown(&mut self) {
    if let Some(task) = self.stream_task.take() {
      task.abort();
    }
    if let Some(task) = self.heartbeat_task.take() {
      task.abort();
    }
    if let Some(page_id) = self.page_id.clone() {
      for block_id in self.tracker.drain() {
        let stop = TypingSignal::stop(&page_id, &block_id, &self.session_id, &self.user_name);
        if let Err(err) = self.transport.send_typing(stop).await {
          tracing::trace!(?err, "teardown typing stop dropped");
        }
      }
      let offline = PresenceSignal::offline(&page_id, &self.session_id, &self.user_name);
      if let Err(err) = self.transport.send_presence(offline).await {
        tracing::trace!(?err, "teardown presence offline dropped");
      }
    }
    tracing::debug!(session_id = %self.session_id, "sync agent closed");
  }
}

/// Event stream loop: subscribe, fetch canonical state once, consume events
/// forward, and on any failure reconnect with exponential backoff (reset on
/// success). Subscribing before the fetch means no commit can fall into the
/// gap between the snapshot and the first event.
async fn run_stream(
  transport: Arc<dyn SyncTransport>,
  page_id: String,
  tx: mpsc::UnboundedSender<StreamMessage>,
  options: SyncOptions,
) {
  let mut attempt: u32 = 0;
  loop {
    match transport.subscribe(&page_id).await {
      Ok(mut events) => match transport.fetch_page(&page_id).await {
        Ok(page) => {
          attempt = 0;
          if tx.send(StreamMessage::Connected(page)).is_err() {
            return;
          }
          loop {
            match events.next().await {
              Some(Ok(event)) => {
                if tx.send(StreamMessage::Event(event)).is_err() {
                  return;
                }
              },
              Some(Err(err)) => {
                tracing::warn!(?err, %page_id, "event stream error");
                break;
              },
              None => {
                tracing::debug!(%page_id, "event stream ended");
                break;
              },
            }
          }
        },
        Err(SyncError::PageNotFound(_)) => {
          tracing::error!(%page_id, "page vanished, stopping stream");
          return;
        },
        Err(err) => tracing::warn!(?err, %page_id, "canonical fetch failed"),
      },
      Err(err) => tracing::warn!(?err, %page_id, "subscribe failed"),
    }

    attempt += 1;
    let delay = backoff_delay(
      options.stream_backoff_base,
      options.stream_backoff_cap,
      attempt,
    );
    tracing::debug!(%page_id, attempt, ?delay, "reconnecting event stream");
    tokio::time::sleep(delay).await;
  }
}

async fn run_heartbeat(
  transport: Arc<dyn SyncTransport>,
  page_id: String,
  session_id: String,
  user_name: String,
  interval: Duration,
) {
  loop {
    let signal = PresenceSignal::online(&page_id, &session_id, &user_name);
    if let Err(err) = transport.send_presence(signal).await {
      tracing::trace!(?err, "presence heartbeat dropped");
    }
    tokio::time::sleep(interval).await;
  }
}
