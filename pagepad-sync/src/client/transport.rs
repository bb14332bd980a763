use crate::error::SyncError;
use crate::server::coordinator::SyncCoordinator;
use async_trait::async_trait;
use futures_util::stream::StreamExt;
use pagepad_entity::{Block, Page, PageDraft, PageEvent, PageMeta, PresenceSignal, Revision, TypingSignal};
use pagepad_store::{StoreError, WriteOutcome};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

pub type EventStream = Pin<Box<dyn futures_util::Stream<Item = Result<PageEvent, SyncError>> + Send>>;

/// The seam between the agent and the wire. Whether the other end is an
/// in-process coordinator or an HTTP server behind SSE is an implementation
/// detail; the agent only sees CAS writes, fire-and-forget signals and a
/// forward-only event stream.
#[async_trait]
pub trait SyncTransport: Send + Sync + 'static {
  async fn create_page(&self, draft: PageDraft) -> Result<Page, SyncError>;

  async fn fetch_page(&self, page_id: &str) -> Result<Page, SyncError>;

  async fn push_blocks(
    &self,
    page_id: &str,
    blocks: Vec<Block>,
    base: Revision,
  ) -> Result<WriteOutcome, SyncError>;

  async fn push_meta(
    &self,
    page_id: &str,
    meta: PageMeta,
    base: Revision,
  ) -> Result<WriteOutcome, SyncError>;

  async fn send_typing(&self, signal: TypingSignal) -> Result<(), SyncError>;

  async fn send_presence(&self, signal: PresenceSignal) -> Result<(), SyncError>;

  /// Open a forward-only event stream for the page. No history: callers
  /// fetch canonical state separately after subscribing.
  async fn subscribe(&self, page_id: &str) -> Result<EventStream, SyncError>;
}

fn store_error(err: StoreError) -> SyncError {
  match err {
    StoreError::PageNotFound(id) => SyncError::PageNotFound(id),
    StoreError::Internal(err) => SyncError::Internal(err),
  }
}

/// In-process transport over a shared coordinator. This is what embedded
/// callers and tests use; it exercises the exact same agent code paths as
/// the HTTP transport.
pub struct LocalTransport {
  coordinator: Arc<SyncCoordinator>,
}

impl LocalTransport {
  pub fn new(coordinator: Arc<SyncCoordinator>) -> Self {
    Self { coordinator }
  }
}

#[async_trait]
impl SyncTransport for LocalTransport {
  async fn create_page(&self, draft: PageDraft) -> Result<Page, SyncError> {
    self.coordinator.create_page(draft).await.map_err(store_error)
  }

  async fn fetch_page(&self, page_id: &str) -> Result<Page, SyncError> {
    self.coordinator.get_page(page_id).await.map_err(store_error)
  }

  async fn push_blocks(
    &self,
    page_id: &str,
    blocks: Vec<Block>,
    base: Revision,
  ) -> Result<WriteOutcome, SyncError> {
    self
      .coordinator
      .update_blocks(page_id, blocks, &base)
      .await
      .map_err(store_error)
  }

  async fn push_meta(
    &self,
    page_id: &str,
    meta: PageMeta,
    base: Revision,
  ) -> Result<WriteOutcome, SyncError> {
    self
      .coordinator
      .update_meta(page_id, meta, &base)
      .await
      .map_err(store_error)
  }

  async fn send_typing(&self, signal: TypingSignal) -> Result<(), SyncError> {
    self.coordinator.set_typing(signal);
    Ok(())
  }

  async fn send_presence(&self, signal: PresenceSignal) -> Result<(), SyncError> {
    if signal.is_online {
      self
        .coordinator
        .heartbeat(&signal.page_id, &signal.session_id, &signal.user_name);
    } else {
      self
        .coordinator
        .leave(&signal.page_id, &signal.session_id, &signal.user_name);
    }
    Ok(())
  }

  async fn subscribe(&self, page_id: &str) -> Result<EventStream, SyncError> {
    let receiver = self.coordinator.subscribe(page_id);
    // A lagged receiver missed committed events; surfacing it as a stream
    // error makes the agent reconnect and re-fetch canonical state, which
    // restores at-least-once for `page` events.
    let stream = BroadcastStream::new(receiver).map(|item| {
      item.map_err(|BroadcastStreamRecvError::Lagged(missed)| {
        tracing::warn!(missed, "event stream lagged");
        SyncError::StreamClosed
      })
    });
    Ok(Box::pin(stream))
  }
}
