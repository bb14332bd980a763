#![allow(dead_code)]

use async_trait::async_trait;
use pagepad_entity::{
  Block, BlockType, Page, PageDraft, PageMeta, PresenceSignal, Revision, TypingSignal,
};
use pagepad_store::WriteOutcome;
use pagepad_sync::{EventStream, LocalTransport, SyncCoordinator, SyncError, SyncTransport};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

pub fn setup_log() {
  static START: Once = Once::new();
  START.call_once(|| {
    let subscriber = tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .with_test_writer()
      .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
  });
}

pub struct TestBed {
  pub coordinator: Arc<SyncCoordinator>,
  pub transport: Arc<LocalTransport>,
}

impl TestBed {
  pub fn new() -> Self {
    setup_log();
    let coordinator = Arc::new(SyncCoordinator::in_memory());
    let transport = Arc::new(LocalTransport::new(coordinator.clone()));
    Self {
      coordinator,
      transport,
    }
  }

  pub async fn seeded_page(&self, title: &str) -> Page {
    self
      .coordinator
      .create_page(PageDraft::new(title))
      .await
      .expect("create never fails")
  }
}

pub fn text_block(text: &str) -> Block {
  Block::new(BlockType::Text, json!({ "text": text }))
}

/// Poll until `check` passes or the deadline hits. Agent timings in tests
/// are milliseconds, so the deadline stays short.
pub async fn wait_until<F>(what: &str, mut check: F)
where
  F: FnMut() -> bool,
{
  let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
  loop {
    if check() {
      return;
    }
    if tokio::time::Instant::now() > deadline {
      panic!("timed out waiting for {what}");
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
}

/// Transport wrapper that counts calls and can fail the first N block
/// writes with a transient error.
pub struct FlakyTransport {
  inner: Arc<LocalTransport>,
  pub block_writes: AtomicUsize,
  pub meta_writes: AtomicUsize,
  pub fetches: AtomicUsize,
  pub subscribes: AtomicUsize,
  fail_block_writes: AtomicUsize,
  dead_streams: AtomicUsize,
}

impl FlakyTransport {
  pub fn new(inner: Arc<LocalTransport>) -> Self {
    Self {
      inner,
      block_writes: AtomicUsize::new(0),
      meta_writes: AtomicUsize::new(0),
      fetches: AtomicUsize::new(0),
      subscribes: AtomicUsize::new(0),
      fail_block_writes: AtomicUsize::new(0),
      dead_streams: AtomicUsize::new(0),
    }
  }

  /// The next `n` block writes answer with a transient transport error.
  pub fn fail_next_block_writes(&self, n: usize) {
    self.fail_block_writes.store(n, Ordering::SeqCst);
  }

  /// The next `n` subscriptions hand back a stream that ends immediately,
  /// as a dropped connection would.
  pub fn drop_next_streams(&self, n: usize) {
    self.dead_streams.store(n, Ordering::SeqCst);
  }
}

#[async_trait]
impl SyncTransport for FlakyTransport {
  async fn create_page(&self, draft: PageDraft) -> Result<Page, SyncError> {
    self.inner.create_page(draft).await
  }

  async fn fetch_page(&self, page_id: &str) -> Result<Page, SyncError> {
    self.fetches.fetch_add(1, Ordering::SeqCst);
    self.inner.fetch_page(page_id).await
  }

  async fn push_blocks(
    &self,
    page_id: &str,
    blocks: Vec<Block>,
    base: Revision,
  ) -> Result<WriteOutcome, SyncError> {
    self.block_writes.fetch_add(1, Ordering::SeqCst);
    let remaining = self.fail_block_writes.load(Ordering::SeqCst);
    if remaining > 0 {
      self.fail_block_writes.store(remaining - 1, Ordering::SeqCst);
      return Err(SyncError::Transport("injected failure".to_string()));
    }
    self.inner.push_blocks(page_id, blocks, base).await
  }

  async fn push_meta(
    &self,
    page_id: &str,
    meta: PageMeta,
    base: Revision,
  ) -> Result<WriteOutcome, SyncError> {
    self.meta_writes.fetch_add(1, Ordering::SeqCst);
    self.inner.push_meta(page_id, meta, base).await
  }

  async fn send_typing(&self, signal: TypingSignal) -> Result<(), SyncError> {
    self.inner.send_typing(signal).await
  }

  async fn send_presence(&self, signal: PresenceSignal) -> Result<(), SyncError> {
    self.inner.send_presence(signal).await
  }

  async fn subscribe(&self, page_id: &str) -> Result<EventStream, SyncError> {
    self.subscribes.fetch_add(1, Ordering::SeqCst);
    let remaining = self.dead_streams.load(Ordering::SeqCst);
    if remaining > 0 {
      self.dead_streams.store(remaining - 1, Ordering::SeqCst);
      return Ok(Box::pin(futures_util::stream::empty()));
    }
    self.inner.subscribe(page_id).await
  }
}

/// Transport whose event stream never yields: the agent keeps whatever
/// revision it last adopted, which is how tests force a stale base.
pub struct MuteTransport {
  inner: Arc<LocalTransport>,
}

impl MuteTransport {
  pub fn new(inner: Arc<LocalTransport>) -> Self {
    Self { inner }
  }
}

#[async_trait]
impl SyncTransport for MuteTransport {
  async fn create_page(&self, draft: PageDraft) -> Result<Page, SyncError> {
    self.inner.create_page(draft).await
  }

  async fn fetch_page(&self, page_id: &str) -> Result<Page, SyncError> {
    self.inner.fetch_page(page_id).await
  }

  async fn push_blocks(
    &self,
    page_id: &str,
    blocks: Vec<Block>,
    base: Revision,
  ) -> Result<WriteOutcome, SyncError> {
    self.inner.push_blocks(page_id, blocks, base).await
  }

  async fn push_meta(
    &self,
    page_id: &str,
    meta: PageMeta,
    base: Revision,
  ) -> Result<WriteOutcome, SyncError> {
    self.inner.push_meta(page_id, meta, base).await
  }

  async fn send_typing(&self, signal: TypingSignal) -> Result<(), SyncError> {
    self.inner.send_typing(signal).await
  }

  async fn send_presence(&self, signal: PresenceSignal) -> Result<(), SyncError> {
    self.inner.send_presence(signal).await
  }

  async fn subscribe(&self, _page_id: &str) -> Result<EventStream, SyncError> {
    Ok(Box::pin(futures_util::stream::pending()))
  }
}
