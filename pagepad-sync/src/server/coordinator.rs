use crate::server::broadcast::PageBroadcast;
use dashmap::DashMap;
use pagepad_entity::{
  Block, Clock, Page, PageDraft, PageEvent, PageMeta, PresenceSignal, Revision, SystemClock,
  TypingSignal,
};
use pagepad_store::{
  DocumentStore, PresenceEntry, PresenceRegistry, StoreError, TypingLock, TypingRegistry,
  WriteOutcome,
};
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;
use tokio::sync::Mutex;

/// The request/response layer: applies CAS writes against the store and,
/// when a write commits, publishes the new canonical page to every
/// subscriber of that page as part of the same logical operation. Ephemeral
/// typing/presence signals bypass the store entirely.
pub struct SyncCoordinator {
  store: Arc<dyn DocumentStore>,
  presence: PresenceRegistry,
  typing: TypingRegistry,
  broadcast: PageBroadcast,
  // Commit-then-publish runs under a per-page gate so the fanout observes
  // page events in commit order even when two writes race past the store's
  // row lock back-to-back.
  publish_gates: DashMap<String, Arc<Mutex<()>>>,
}

impl SyncCoordinator {
  pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      presence: PresenceRegistry::new(clock.clone()),
      typing: TypingRegistry::new(clock),
      broadcast: PageBroadcast::default(),
      publish_gates: DashMap::new(),
    }
  }

  pub fn in_memory() -> Self {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    Self::new(
      Arc::new(pagepad_store::MemoryDocumentStore::new(clock.clone())),
      clock,
    )
  }

  fn publish_gate(&self, page_id: &str) -> Arc<Mutex<()>> {
    self
      .publish_gates
      .entry(page_id.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(())))
      .clone()
  }

  pub async fn create_page(&self, draft: PageDraft) -> Result<Page, StoreError> {
    let page = self.store.create(draft).await?;
    self.broadcast.publish(PageEvent::snapshot(page.clone()));
    Ok(page)
  }

  pub async fn get_page(&self, page_id: &str) -> Result<Page, StoreError> {
    self.store.get(page_id).await
  }

  pub async fn update_blocks(
    &self,
    page_id: &str,
    blocks: Vec<Block>,
    base: &Revision,
  ) -> Result<WriteOutcome, StoreError> {
    let gate = self.publish_gate(page_id);
    let _ordered = gate.lock().await;
    let outcome = self.store.update_blocks(page_id, blocks, base).await?;
    if let WriteOutcome::Applied(page) = &outcome {
      self.broadcast.publish(PageEvent::snapshot(page.clone()));
    }
    Ok(outcome)
  }

  pub async fn update_meta(
    &self,
    page_id: &str,
    meta: PageMeta,
    base: &Revision,
  ) -> Result<WriteOutcome, StoreError> {
    let gate = self.publish_gate(page_id);
    let _ordered = gate.lock().await;
    let outcome = self.store.update_meta(page_id, meta, base).await?;
    if let WriteOutcome::Applied(page) = &outcome {
      self.broadcast.publish(PageEvent::snapshot(page.clone()));
    }
    Ok(outcome)
  }

  /// Record the advisory lock table change and fan the signal out.
  /// Fire-and-forget: nothing here can fail a write.
  pub fn set_typing(&self, signal: TypingSignal) {
    if signal.is_typing {
      self.typing.start(
        &signal.page_id,
        &signal.block_id,
        &signal.session_id,
        &signal.user_name,
      );
    } else {
      self
        .typing
        .stop(&signal.page_id, &signal.block_id, &signal.session_id);
    }
    tracing::trace!(?signal, "typing signal");
    self.broadcast.publish(PageEvent::Typing(signal));
  }

  pub fn heartbeat(&self, page_id: &str, session_id: &str, user_name: &str) {
    self.presence.heartbeat(page_id, session_id, user_name);
    self.broadcast.publish(PageEvent::Presence(PresenceSignal::online(
      page_id, session_id, user_name,
    )));
  }

  /// Best-effort goodbye; the presence TTL covers sessions that never get
  /// to send one.
  pub fn leave(&self, page_id: &str, session_id: &str, user_name: &str) {
    self.presence.leave(page_id, session_id);
    self.broadcast.publish(PageEvent::Presence(PresenceSignal::offline(
      page_id, session_id, user_name,
    )));
  }

  pub fn subscribe(&self, page_id: &str) -> Receiver<PageEvent> {
    self.broadcast.subscribe(page_id)
  }

  pub fn broadcast(&self) -> &PageBroadcast {
    &self.broadcast
  }

  pub fn online_sessions(&self, page_id: &str) -> Vec<PresenceEntry> {
    self.presence.online(page_id)
  }

  pub fn active_typing(&self, page_id: &str) -> Vec<TypingLock> {
    self.typing.active_locks(page_id)
  }

  /// Drop decayed presence entries and typing locks; callable from a
  /// periodic sweep.
  pub fn prune_ephemeral(&self) {
    self.presence.prune();
    self.typing.prune();
  }

  pub fn subscriber_count(&self, page_id: &str) -> usize {
    self.broadcast.subscriber_count(page_id)
  }
}
