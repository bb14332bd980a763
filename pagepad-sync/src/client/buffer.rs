use chrono::{DateTime, Utc};
use pagepad_entity::{Block, Page, PageMeta};
use std::time::Duration;

/// One coalesced outgoing write.
#[derive(Debug, Clone)]
pub enum PendingWrite {
  Blocks(Vec<Block>),
  Meta(PageMeta),
}

impl PendingWrite {
  /// Whether a canonical snapshot already contains this payload. Used to
  /// short-circuit a retry when the page event for our own write arrives
  /// before the response does.
  pub fn reflected_in(&self, page: &Page) -> bool {
    match self {
      PendingWrite::Blocks(blocks) => {
        blocks.len() == page.blocks.len()
          && blocks.iter().zip(page.blocks.iter()).all(|(ours, theirs)| {
            // Positions are advisory on the way out; compare content only.
            ours.id == theirs.id && ours.ty == theirs.ty && ours.data == theirs.data
          })
      },
      PendingWrite::Meta(meta) => meta.reflected_in(page),
    }
  }
}

/// Pure pending-edit buffer: coalescing slots plus the last-edit timestamp.
/// The debounce decision is a question (`due`) asked with an explicit `now`,
/// so tests simulate the quiet window by moving a manual clock.
#[derive(Debug, Default)]
pub struct EditBuffer {
  blocks: Option<Vec<Block>>,
  meta: Option<PageMeta>,
  last_edit_at: Option<DateTime<Utc>>,
}

impl EditBuffer {
  /// A later block edit replaces the buffered list wholesale: the client
  /// always sends the full ordered list, so the newest array wins.
  pub fn edit_blocks(&mut self, blocks: Vec<Block>, now: DateTime<Utc>) {
    self.blocks = Some(blocks);
    self.last_edit_at = Some(now);
  }

  /// Meta edits coalesce field-wise: the newest value per field wins.
  pub fn edit_meta(&mut self, meta: PageMeta, now: DateTime<Utc>) {
    match &mut self.meta {
      Some(buffered) => buffered.merge(meta),
      None => self.meta = Some(meta),
    }
    self.last_edit_at = Some(now);
  }

  pub fn is_empty(&self) -> bool {
    self.blocks.is_none() && self.meta.is_none()
  }

  /// True once the debounce window after the last edit has elapsed.
  pub fn due(&self, now: DateTime<Utc>, debounce: Duration) -> bool {
    match self.last_edit_at {
      Some(last) if !self.is_empty() => {
        let quiet = now.signed_duration_since(last);
        quiet.num_milliseconds() >= debounce.as_millis() as i64
      },
      _ => false,
    }
  }

  /// Milliseconds until the buffer becomes due, if anything is pending.
  pub fn due_in_ms(&self, now: DateTime<Utc>, debounce: Duration) -> Option<u64> {
    let last = self.last_edit_at?;
    if self.is_empty() {
      return None;
    }
    let elapsed = now.signed_duration_since(last).num_milliseconds().max(0) as u64;
    Some((debounce.as_millis() as u64).saturating_sub(elapsed))
  }

  /// Hand out the next coalesced write. Blocks go first; a buffered meta
  /// edit stays queued and is resent after the current write completes.
  pub fn take_next(&mut self) -> Option<PendingWrite> {
    if let Some(blocks) = self.blocks.take() {
      return Some(PendingWrite::Blocks(blocks));
    }
    self.meta.take().map(PendingWrite::Meta)
  }

  /// Drop everything buffered. Used on conflict adoption: edits made before
  /// the conflict response are superseded by the canonical page.
  pub fn clear(&mut self) {
    self.blocks = None;
    self.meta = None;
    self.last_edit_at = None;
  }
}
