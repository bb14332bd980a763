use crate::error::StoreError;
use crate::store::{DocumentStore, WriteOutcome};
use async_trait::async_trait;
use dashmap::DashMap;
use pagepad_entity::{Block, Clock, Page, PageDraft, PageMeta, Revision, SystemClock};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// In-memory document store. Each page lives behind its own async mutex so
/// concurrent CAS calls for one page serialize: the revision check and the
/// commit happen under the same lock, which makes "first committer wins"
/// exact rather than racy.
pub struct MemoryDocumentStore {
  clock: Arc<dyn Clock>,
  pages: DashMap<String, Arc<Mutex<Page>>>,
  revision_floor: AtomicI64,
}

impl Default for MemoryDocumentStore {
  fn default() -> Self {
    Self::new(Arc::new(SystemClock))
  }
}

impl MemoryDocumentStore {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    Self {
      clock,
      pages: DashMap::new(),
      revision_floor: AtomicI64::new(0),
    }
  }

  /// Mint a strictly monotonic revision token: wall-clock milliseconds with
  /// an atomic floor, so two commits inside the same millisecond still get
  /// distinct, ordered tokens.
  fn mint_revision(&self) -> Revision {
    let now_ms = self.clock.now().timestamp_millis();
    let mut prev = self.revision_floor.load(Ordering::SeqCst);
    loop {
      let next = now_ms.max(prev + 1);
      match self.revision_floor.compare_exchange(
        prev,
        next,
        Ordering::SeqCst,
        Ordering::SeqCst,
      ) {
        Ok(_) => return Revision::new(format!("{next:016x}")),
        Err(current) => prev = current,
      }
    }
  }

  fn row(&self, page_id: &str) -> Result<Arc<Mutex<Page>>, StoreError> {
    self
      .pages
      .get(page_id)
      .map(|row| row.value().clone())
      .ok_or_else(|| StoreError::PageNotFound(page_id.to_string()))
  }
}

/// Rewrite positions densely from array order and make sure every block
/// carries an id before it is persisted.
fn normalize_blocks(blocks: &mut [Block]) {
  for (index, block) in blocks.iter_mut().enumerate() {
    block.ensure_id();
    block.position = index as u32;
  }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
  async fn create(&self, draft: PageDraft) -> Result<Page, StoreError> {
    let id = draft.id_or_random();
    let mut blocks = draft.blocks;
    normalize_blocks(&mut blocks);
    let page = Page {
      id: id.clone(),
      title: draft.title,
      cover: None,
      published: false,
      dark_mode: false,
      cinematic: false,
      mood: None,
      bg_color: None,
      blocks,
      revision: self.mint_revision(),
    };

    match self.pages.entry(id) {
      dashmap::mapref::entry::Entry::Occupied(existing) => {
        // Create is idempotent on id: a re-sent create returns the stored
        // page instead of clobbering committed writes.
        let row = existing.get().clone();
        drop(existing);
        let stored = row.lock().await;
        tracing::debug!(page_id = %stored.id, "create hit existing page");
        Ok(stored.clone())
      },
      dashmap::mapref::entry::Entry::Vacant(slot) => {
        tracing::debug!(page_id = %page.id, revision = %page.revision, "page created");
        slot.insert(Arc::new(Mutex::new(page.clone())));
        Ok(page)
      },
    }
  }

  async fn get(&self, page_id: &str) -> Result<Page, StoreError> {
    let row = self.row(page_id)?;
    let page = row.lock().await;
    Ok(page.clone())
  }

  async fn update_blocks(
    &self,
    page_id: &str,
    mut blocks: Vec<Block>,
    base: &Revision,
  ) -> Result<WriteOutcome, StoreError> {
    let row = self.row(page_id)?;
    let mut page = row.lock().await;
    if page.revision != *base {
      tracing::trace!(
        page_id,
        base = %base,
        current = %page.revision,
        "blocks write lost the revision race"
      );
      return Ok(WriteOutcome::Conflict(page.clone()));
    }
    normalize_blocks(&mut blocks);
    page.blocks = blocks;
    page.revision = self.mint_revision();
    tracing::trace!(page_id, revision = %page.revision, "blocks write committed");
    Ok(WriteOutcome::Applied(page.clone()))
  }

  async fn update_meta(
    &self,
    page_id: &str,
    meta: PageMeta,
    base: &Revision,
  ) -> Result<WriteOutcome, StoreError> {
    let row = self.row(page_id)?;
    let mut page = row.lock().await;
    if page.revision != *base {
      tracing::trace!(
        page_id,
        base = %base,
        current = %page.revision,
        "meta write lost the revision race"
      );
      return Ok(WriteOutcome::Conflict(page.clone()));
    }
    meta.apply_to(&mut page);
    page.revision = self.mint_revision();
    tracing::trace!(page_id, revision = %page.revision, "meta write committed");
    Ok(WriteOutcome::Applied(page.clone()))
  }
}
