use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Opaque compare-and-swap token. A write is accepted only when the caller's
/// token matches the stored one exactly; the store mints a strictly greater
/// token on every accepted write.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
  pub fn new(token: impl Into<String>) -> Self {
    Self(token.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// The never-written token. A fresh client that has not created its page
  /// yet carries this until the first `create` response.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl Display for Revision {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// The closed set of block kinds. The sync layer never interprets the block
/// payload; the kind only scopes what `data` means to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
  Text,
  Heading,
  Todo,
  Bullet,
  Numbered,
  Quote,
  Code,
  Divider,
  Image,
  Callout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
  pub id: String,
  #[serde(rename = "type")]
  pub ty: BlockType,
  /// Dense index within the page. Client-sent values are advisory; the store
  /// rewrites positions from array order on every accepted write.
  pub position: u32,
  /// Opaque payload scoped to `ty`.
  pub data: serde_json::Value,
}

impl Block {
  pub fn new(ty: BlockType, data: serde_json::Value) -> Self {
    Self {
      id: nanoid!(10),
      ty,
      position: 0,
      data,
    }
  }

  pub fn with_id(id: impl Into<String>, ty: BlockType, data: serde_json::Value) -> Self {
    Self {
      id: id.into(),
      ty,
      position: 0,
      data,
    }
  }

  /// Blocks may arrive from a client before they were ever persisted; an
  /// empty id gets assigned here rather than being stored blank.
  pub fn ensure_id(&mut self) {
    if self.id.is_empty() {
      self.id = nanoid!(10);
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
  pub id: String,
  pub title: String,
  pub cover: Option<String>,
  pub published: bool,
  pub dark_mode: bool,
  pub cinematic: bool,
  pub mood: Option<String>,
  pub bg_color: Option<String>,
  pub blocks: Vec<Block>,
  pub revision: Revision,
}

impl Page {
  pub fn block(&self, block_id: &str) -> Option<&Block> {
    self.blocks.iter().find(|b| b.id == block_id)
  }
}

/// What a not-yet-persisted editor sends on first write. The store assigns
/// the id when the draft doesn't carry one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageDraft {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub blocks: Vec<Block>,
}

impl PageDraft {
  pub fn new(title: impl Into<String>) -> Self {
    Self {
      id: None,
      title: title.into(),
      blocks: Vec::new(),
    }
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    self.id = Some(id.into());
    self
  }

  pub fn with_blocks(mut self, blocks: Vec<Block>) -> Self {
    self.blocks = blocks;
    self
  }

  pub fn id_or_random(&self) -> String {
    match self.id.as_deref() {
      Some(id) if !id.is_empty() => id.to_string(),
      _ => Uuid::new_v4().to_string(),
    }
  }
}

/// The meta-write field set. `None` leaves the field untouched, so one meta
/// write only overwrites what it names. `published` is deliberately absent:
/// publishing is owned by an external surface, not by the sync layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cover: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dark_mode: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cinematic: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mood: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub bg_color: Option<String>,
}

impl PageMeta {
  pub fn is_empty(&self) -> bool {
    self.title.is_none()
      && self.cover.is_none()
      && self.dark_mode.is_none()
      && self.cinematic.is_none()
      && self.mood.is_none()
      && self.bg_color.is_none()
  }

  pub fn apply_to(&self, page: &mut Page) {
    if let Some(title) = &self.title {
      page.title = title.clone();
    }
    if let Some(cover) = &self.cover {
      page.cover = Some(cover.clone());
    }
    if let Some(dark_mode) = self.dark_mode {
      page.dark_mode = dark_mode;
    }
    if let Some(cinematic) = self.cinematic {
      page.cinematic = cinematic;
    }
    if let Some(mood) = &self.mood {
      page.mood = Some(mood.clone());
    }
    if let Some(bg_color) = &self.bg_color {
      page.bg_color = Some(bg_color.clone());
    }
  }

  /// Coalesce a later meta edit over this one. Fields the newer edit names
  /// win; fields it leaves out keep their buffered value.
  pub fn merge(&mut self, newer: PageMeta) {
    if newer.title.is_some() {
      self.title = newer.title;
    }
    if newer.cover.is_some() {
      self.cover = newer.cover;
    }
    if newer.dark_mode.is_some() {
      self.dark_mode = newer.dark_mode;
    }
    if newer.cinematic.is_some() {
      self.cinematic = newer.cinematic;
    }
    if newer.mood.is_some() {
      self.mood = newer.mood;
    }
    if newer.bg_color.is_some() {
      self.bg_color = newer.bg_color;
    }
  }

  /// True when every field this meta names already reads back from `page`.
  pub fn reflected_in(&self, page: &Page) -> bool {
    self.title.as_ref().map_or(true, |t| *t == page.title)
      && self.cover.as_ref().map_or(true, |c| Some(c) == page.cover.as_ref())
      && self.dark_mode.map_or(true, |d| d == page.dark_mode)
      && self.cinematic.map_or(true, |c| c == page.cinematic)
      && self.mood.as_ref().map_or(true, |m| Some(m) == page.mood.as_ref())
      && self
        .bg_color
        .as_ref()
        .map_or(true, |b| Some(b) == page.bg_color.as_ref())
  }
}
