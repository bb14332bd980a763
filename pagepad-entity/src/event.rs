use crate::page::Page;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Wire name of the canonical-snapshot event.
pub const PAGE_EVENT: &str = "page";
/// Wire name of the typing indicator event.
pub const TYPING_EVENT: &str = "typing";
/// Wire name of the presence event.
pub const PRESENCE_EVENT: &str = "presence";

/// Everything a viewer receives over the event stream for one page: either
/// the full canonical snapshot after a committed write, or an ephemeral
/// typing/presence signal that bypasses the document store entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PageEvent {
  Page(Box<Page>),
  Typing(TypingSignal),
  Presence(PresenceSignal),
}

impl PageEvent {
  pub fn snapshot(page: Page) -> Self {
    PageEvent::Page(Box::new(page))
  }

  pub fn page_id(&self) -> &str {
    match self {
      PageEvent::Page(page) => &page.id,
      PageEvent::Typing(signal) => &signal.page_id,
      PageEvent::Presence(signal) => &signal.page_id,
    }
  }

  /// The named-event label on the wire.
  pub fn name(&self) -> &'static str {
    match self {
      PageEvent::Page(_) => PAGE_EVENT,
      PageEvent::Typing(_) => TYPING_EVENT,
      PageEvent::Presence(_) => PRESENCE_EVENT,
    }
  }

  /// The JSON payload carried under the named event.
  pub fn payload(&self) -> serde_json::Value {
    match self {
      PageEvent::Page(page) => serde_json::json!({ "page": page }),
      PageEvent::Typing(signal) => {
        serde_json::to_value(signal).unwrap_or(serde_json::Value::Null)
      },
      PageEvent::Presence(signal) => {
        serde_json::to_value(signal).unwrap_or(serde_json::Value::Null)
      },
    }
  }
}

impl Display for PageEvent {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      PageEvent::Page(page) => f.write_fmt(format_args!(
        "page|id:{}|rev:{}|blocks:{}|",
        page.id,
        page.revision,
        page.blocks.len(),
      )),
      PageEvent::Typing(signal) => f.write_fmt(format_args!(
        "typing|page:{}|block:{}|session:{}|on:{}|",
        signal.page_id, signal.block_id, signal.session_id, signal.is_typing,
      )),
      PageEvent::Presence(signal) => f.write_fmt(format_args!(
        "presence|page:{}|session:{}|online:{}|",
        signal.page_id, signal.session_id, signal.is_online,
      )),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSignal {
  pub page_id: String,
  pub block_id: String,
  pub session_id: String,
  pub user_name: String,
  pub is_typing: bool,
}

impl TypingSignal {
  pub fn start(
    page_id: impl Into<String>,
    block_id: impl Into<String>,
    session_id: impl Into<String>,
    user_name: impl Into<String>,
  ) -> Self {
    Self {
      page_id: page_id.into(),
      block_id: block_id.into(),
      session_id: session_id.into(),
      user_name: user_name.into(),
      is_typing: true,
    }
  }

  pub fn stop(
    page_id: impl Into<String>,
    block_id: impl Into<String>,
    session_id: impl Into<String>,
    user_name: impl Into<String>,
  ) -> Self {
    Self {
      is_typing: false,
      ..Self::start(page_id, block_id, session_id, user_name)
    }
  }
}

impl From<TypingSignal> for PageEvent {
  fn from(value: TypingSignal) -> Self {
    PageEvent::Typing(value)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSignal {
  pub page_id: String,
  pub session_id: String,
  pub user_name: String,
  pub is_online: bool,
}

impl PresenceSignal {
  pub fn online(
    page_id: impl Into<String>,
    session_id: impl Into<String>,
    user_name: impl Into<String>,
  ) -> Self {
    Self {
      page_id: page_id.into(),
      session_id: session_id.into(),
      user_name: user_name.into(),
      is_online: true,
    }
  }

  pub fn offline(
    page_id: impl Into<String>,
    session_id: impl Into<String>,
    user_name: impl Into<String>,
  ) -> Self {
    Self {
      is_online: false,
      ..Self::online(page_id, session_id, user_name)
    }
  }
}

impl From<PresenceSignal> for PageEvent {
  fn from(value: PresenceSignal) -> Self {
    PageEvent::Presence(value)
  }
}
