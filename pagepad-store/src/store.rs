use crate::error::StoreError;
use async_trait::async_trait;
use pagepad_entity::{Block, Page, PageDraft, PageMeta, Revision};

/// Result of a conditional write. A conflict is a modeled outcome, not an
/// error: the loser gets the current canonical page so it can reconcile
/// deterministically.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
  Applied(Page),
  Conflict(Page),
}

impl WriteOutcome {
  pub fn page(&self) -> &Page {
    match self {
      WriteOutcome::Applied(page) => page,
      WriteOutcome::Conflict(page) => page,
    }
  }

  pub fn into_page(self) -> Page {
    match self {
      WriteOutcome::Applied(page) => page,
      WriteOutcome::Conflict(page) => page,
    }
  }

  pub fn is_applied(&self) -> bool {
    matches!(self, WriteOutcome::Applied(_))
  }
}

/// Durable page storage with a compare-and-swap write primitive keyed by the
/// page revision. Writes to one page are linearizable: for any contended
/// revision value exactly one writer commits, every other caller observes
/// the new revision through a conflict outcome.
#[async_trait]
pub trait DocumentStore: Send + Sync {
  /// Persist a new page. Always succeeds; assigns the id when the draft has
  /// none. Re-creating an existing id returns the stored page unchanged so
  /// first-write creation stays race-safe.
  async fn create(&self, draft: PageDraft) -> Result<Page, StoreError>;

  async fn get(&self, page_id: &str) -> Result<Page, StoreError>;

  /// Replace the block list iff `base` matches the stored revision.
  /// Positions are rewritten densely 0..n-1 from array order before the
  /// page is persisted.
  async fn update_blocks(
    &self,
    page_id: &str,
    blocks: Vec<Block>,
    base: &Revision,
  ) -> Result<WriteOutcome, StoreError>;

  /// Apply the meta field set iff `base` matches the stored revision. Meta
  /// and block writes share one revision domain per page.
  async fn update_meta(
    &self,
    page_id: &str,
    meta: PageMeta,
    base: &Revision,
  ) -> Result<WriteOutcome, StoreError>;
}
