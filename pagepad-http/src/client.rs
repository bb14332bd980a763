use async_trait::async_trait;
use futures_util::StreamExt;
use pagepad_entity::event::{PAGE_EVENT, PRESENCE_EVENT, TYPING_EVENT};
use pagepad_entity::{
  Block, Page, PageDraft, PageEvent, PageMeta, PresenceSignal, Revision, TypingSignal,
};
use pagepad_store::WriteOutcome;
use pagepad_sync::{EventStream, SyncError, SyncTransport};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::VecDeque;

#[derive(Debug, Deserialize)]
struct PageBody {
  page: Page,
}

/// `SyncTransport` over the HTTP surface: JSON writes against the REST
/// routes, SSE for the event stream. Status codes map onto the protocol:
/// 200 applied, 409 conflict-with-current-page, 404 unknown page.
pub struct HttpTransport {
  base_url: String,
  http: reqwest::Client,
}

impl HttpTransport {
  pub fn new(base_url: impl Into<String>) -> Self {
    let base_url = base_url.into().trim_end_matches('/').to_string();
    Self {
      base_url,
      http: reqwest::Client::new(),
    }
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base_url, path)
  }
}

fn transport_error(err: reqwest::Error) -> SyncError {
  SyncError::Transport(err.to_string())
}

async fn page_body(response: reqwest::Response) -> Result<Page, SyncError> {
  let body: PageBody = response.json().await.map_err(transport_error)?;
  Ok(body.page)
}

async fn write_outcome(
  page_id: &str,
  response: reqwest::Response,
) -> Result<WriteOutcome, SyncError> {
  match response.status() {
    StatusCode::OK => Ok(WriteOutcome::Applied(page_body(response).await?)),
    StatusCode::CONFLICT => Ok(WriteOutcome::Conflict(page_body(response).await?)),
    StatusCode::NOT_FOUND => Err(SyncError::PageNotFound(page_id.to_string())),
    StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
      let detail = response.text().await.unwrap_or_default();
      Err(SyncError::Validation(detail))
    },
    status => Err(SyncError::Transport(format!("unexpected status {status}"))),
  }
}

fn expect_ack(status: StatusCode) -> Result<(), SyncError> {
  if status.is_success() {
    Ok(())
  } else {
    Err(SyncError::Transport(format!("unexpected status {status}")))
  }
}

#[async_trait]
impl SyncTransport for HttpTransport {
  async fn create_page(&self, draft: PageDraft) -> Result<Page, SyncError> {
    let url = match draft.id.as_deref() {
      Some(id) if !id.is_empty() => self.url(&format!("/pages/{id}")),
      _ => self.url("/pages"),
    };
    let response = self
      .http
      .post(url)
      .json(&draft)
      .send()
      .await
      .map_err(transport_error)?;
    if !response.status().is_success() {
      return Err(SyncError::Transport(format!(
        "create failed with status {}",
        response.status()
      )));
    }
    page_body(response).await
  }

  async fn fetch_page(&self, page_id: &str) -> Result<Page, SyncError> {
    let response = self
      .http
      .get(self.url(&format!("/pages/{page_id}")))
      .send()
      .await
      .map_err(transport_error)?;
    match response.status() {
      StatusCode::OK => page_body(response).await,
      StatusCode::NOT_FOUND => Err(SyncError::PageNotFound(page_id.to_string())),
      status => Err(SyncError::Transport(format!("unexpected status {status}"))),
    }
  }

  async fn push_blocks(
    &self,
    page_id: &str,
    blocks: Vec<Block>,
    base: Revision,
  ) -> Result<WriteOutcome, SyncError> {
    let body = serde_json::json!({ "blocks": blocks, "base_revision": base });
    let response = self
      .http
      .put(self.url(&format!("/pages/{page_id}/blocks")))
      .json(&body)
      .send()
      .await
      .map_err(transport_error)?;
    write_outcome(page_id, response).await
  }

  async fn push_meta(
    &self,
    page_id: &str,
    meta: PageMeta,
    base: Revision,
  ) -> Result<WriteOutcome, SyncError> {
    let mut body = serde_json::to_value(&meta)?;
    body["base_revision"] = serde_json::to_value(&base)?;
    let response = self
      .http
      .put(self.url(&format!("/pages/{page_id}/meta")))
      .json(&body)
      .send()
      .await
      .map_err(transport_error)?;
    write_outcome(page_id, response).await
  }

  async fn send_typing(&self, signal: TypingSignal) -> Result<(), SyncError> {
    let body = serde_json::json!({
      "block_id": signal.block_id,
      "session_id": signal.session_id,
      "user_name": signal.user_name,
      "is_typing": signal.is_typing,
    });
    let response = self
      .http
      .post(self.url(&format!("/pages/{}/typing", signal.page_id)))
      .json(&body)
      .send()
      .await
      .map_err(transport_error)?;
    expect_ack(response.status())
  }

  async fn send_presence(&self, signal: PresenceSignal) -> Result<(), SyncError> {
    let body = serde_json::json!({
      "session_id": signal.session_id,
      "user_name": signal.user_name,
      "is_online": signal.is_online,
    });
    let response = self
      .http
      .post(self.url(&format!("/pages/{}/presence", signal.page_id)))
      .json(&body)
      .send()
      .await
      .map_err(transport_error)?;
    expect_ack(response.status())
  }

  async fn subscribe(&self, page_id: &str) -> Result<EventStream, SyncError> {
    let response = self
      .http
      .get(self.url(&format!("/pages/{page_id}/events")))
      .header("accept", "text/event-stream")
      .send()
      .await
      .map_err(transport_error)?;
    if !response.status().is_success() {
      return Err(SyncError::Transport(format!(
        "subscribe failed with status {}",
        response.status()
      )));
    }

    let bytes = Box::pin(response.bytes_stream());
    let stream = futures_util::stream::unfold(
      (bytes, SseDecoder::default(), VecDeque::new()),
      |(mut bytes, mut decoder, mut ready)| async move {
        loop {
          if let Some(event) = ready.pop_front() {
            return Some((Ok(event), (bytes, decoder, ready)));
          }
          match bytes.next().await {
            Some(Ok(chunk)) => {
              for (name, data) in decoder.feed(&chunk) {
                if let Some(event) = decode_event(&name, &data) {
                  ready.push_back(event);
                }
              }
            },
            Some(Err(err)) => {
              return Some((
                Err(SyncError::Transport(err.to_string())),
                (bytes, decoder, ready),
              ));
            },
            None => return None,
          }
        }
      },
    );
    Ok(Box::pin(stream))
  }
}

/// Incremental decoder for named SSE frames: `event:`/`data:` lines,
/// dispatched on the blank line. Comment lines (keep-alives) and fields we
/// don't use are skipped.
#[derive(Default)]
struct SseDecoder {
  buffer: Vec<u8>,
  event: Option<String>,
  data: String,
}

impl SseDecoder {
  fn feed(&mut self, chunk: &[u8]) -> Vec<(String, String)> {
    self.buffer.extend_from_slice(chunk);
    let mut frames = Vec::new();
    while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
      let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
      let line = String::from_utf8_lossy(&raw);
      let line = line.trim_end_matches(['\n', '\r']);

      if line.is_empty() {
        if let Some(name) = self.event.take() {
          if !self.data.is_empty() {
            frames.push((name, std::mem::take(&mut self.data)));
          }
        }
        self.data.clear();
        continue;
      }
      if let Some(rest) = line.strip_prefix("event:") {
        self.event = Some(rest.trim().to_string());
      } else if let Some(rest) = line.strip_prefix("data:") {
        if !self.data.is_empty() {
          self.data.push('\n');
        }
        self.data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
      }
    }
    frames
  }
}

fn decode_event(name: &str, data: &str) -> Option<PageEvent> {
  let decoded = match name {
    PAGE_EVENT => serde_json::from_str::<PageBody>(data).map(|body| PageEvent::snapshot(body.page)),
    TYPING_EVENT => serde_json::from_str::<TypingSignal>(data).map(PageEvent::Typing),
    PRESENCE_EVENT => serde_json::from_str::<PresenceSignal>(data).map(PageEvent::Presence),
    _ => return None,
  };
  match decoded {
    Ok(event) => Some(event),
    Err(err) => {
      tracing::warn!(?err, name, "skipping undecodable event");
      None
    },
  }
}
