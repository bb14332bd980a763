use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use pagepad_entity::{Block, Page, PageDraft, PageEvent, PageMeta, Revision, TypingSignal};
use pagepad_store::{StoreError, WriteOutcome};
use pagepad_sync::SyncCoordinator;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

#[derive(Clone)]
struct ApiState {
  coordinator: Arc<SyncCoordinator>,
}

/// The HTTP surface over one coordinator. Writes answer 200 with the new
/// canonical page or 409 with the current one; ephemeral signals ack with
/// 204; `/events` is a one-way SSE stream of named `page`/`typing`/
/// `presence` events.
pub fn router(coordinator: Arc<SyncCoordinator>) -> Router {
  Router::new()
    .route("/pages", post(create_page))
    .route("/pages/:page_id", post(create_page_with_id).get(get_page))
    .route("/pages/:page_id/blocks", put(update_blocks))
    .route("/pages/:page_id/meta", put(update_meta))
    .route("/pages/:page_id/typing", post(set_typing))
    .route("/pages/:page_id/presence", post(set_presence))
    .route("/pages/:page_id/events", get(events))
    .with_state(ApiState { coordinator })
}

#[derive(Debug, Serialize, Deserialize)]
struct PageBody {
  page: Page,
}

#[derive(Debug, Deserialize)]
struct UpdateBlocksBody {
  blocks: Vec<Block>,
  base_revision: Revision,
}

#[derive(Debug, Deserialize)]
struct UpdateMetaBody {
  #[serde(flatten)]
  meta: PageMeta,
  base_revision: Revision,
}

#[derive(Debug, Deserialize)]
struct TypingBody {
  block_id: String,
  session_id: String,
  user_name: String,
  is_typing: bool,
}

#[derive(Debug, Deserialize)]
struct PresenceBody {
  session_id: String,
  user_name: String,
  is_online: bool,
}

struct ApiError(StoreError);

impl From<StoreError> for ApiError {
  fn from(value: StoreError) -> Self {
    Self(value)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self.0 {
      StoreError::PageNotFound(id) => (StatusCode::NOT_FOUND, format!("page not found: {id}")),
      StoreError::Internal(err) => {
        tracing::error!(?err, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
      },
    };
    (status, Json(serde_json::json!({ "error": message }))).into_response()
  }
}

fn write_response(outcome: WriteOutcome) -> Response {
  match outcome {
    WriteOutcome::Applied(page) => (StatusCode::OK, Json(PageBody { page })).into_response(),
    WriteOutcome::Conflict(page) => {
      (StatusCode::CONFLICT, Json(PageBody { page })).into_response()
    },
  }
}

async fn create_page(
  State(state): State<ApiState>,
  Json(draft): Json<PageDraft>,
) -> Result<Json<PageBody>, ApiError> {
  let page = state.coordinator.create_page(draft).await?;
  Ok(Json(PageBody { page }))
}

async fn create_page_with_id(
  State(state): State<ApiState>,
  Path(page_id): Path<String>,
  Json(mut draft): Json<PageDraft>,
) -> Result<Json<PageBody>, ApiError> {
  draft.id = Some(page_id);
  let page = state.coordinator.create_page(draft).await?;
  Ok(Json(PageBody { page }))
}

async fn get_page(
  State(state): State<ApiState>,
  Path(page_id): Path<String>,
) -> Result<Json<PageBody>, ApiError> {
  let page = state.coordinator.get_page(&page_id).await?;
  Ok(Json(PageBody { page }))
}

async fn update_blocks(
  State(state): State<ApiState>,
  Path(page_id): Path<String>,
  Json(body): Json<UpdateBlocksBody>,
) -> Result<Response, ApiError> {
  let outcome = state
    .coordinator
    .update_blocks(&page_id, body.blocks, &body.base_revision)
    .await?;
  Ok(write_response(outcome))
}

async fn update_meta(
  State(state): State<ApiState>,
  Path(page_id): Path<String>,
  Json(body): Json<UpdateMetaBody>,
) -> Result<Response, ApiError> {
  let outcome = state
    .coordinator
    .update_meta(&page_id, body.meta, &body.base_revision)
    .await?;
  Ok(write_response(outcome))
}

async fn set_typing(
  State(state): State<ApiState>,
  Path(page_id): Path<String>,
  Json(body): Json<TypingBody>,
) -> StatusCode {
  let signal = if body.is_typing {
    TypingSignal::start(page_id, body.block_id, body.session_id, body.user_name)
  } else {
    TypingSignal::stop(page_id, body.block_id, body.session_id, body.user_name)
  };
  state.coordinator.set_typing(signal);
  StatusCode::NO_CONTENT
}

async fn set_presence(
  State(state): State<ApiState>,
  Path(page_id): Path<String>,
  Json(body): Json<PresenceBody>,
) -> StatusCode {
  if body.is_online {
    state
      .coordinator
      .heartbeat(&page_id, &body.session_id, &body.user_name);
  } else {
    state
      .coordinator
      .leave(&page_id, &body.session_id, &body.user_name);
  }
  StatusCode::NO_CONTENT
}

async fn events(
  State(state): State<ApiState>,
  Path(page_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
  let receiver = state.coordinator.subscribe(&page_id);
  tracing::debug!(%page_id, "viewer subscribed");
  let stream = event_stream(state.coordinator.clone(), page_id, receiver).map(Ok);
  Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Drain the broadcast receiver into SSE frames. A lagged receiver missed
/// committed events, so instead of silently skipping them the current
/// canonical snapshot is re-emitted. That keeps `page` delivery
/// at-least-once without unbounded buffering. The stream ends when the topic closes; the
/// receiver drops with the connection.
fn event_stream(
  coordinator: Arc<SyncCoordinator>,
  page_id: String,
  receiver: Receiver<PageEvent>,
) -> impl Stream<Item = Event> {
  futures_util::stream::unfold(receiver, move |mut receiver| {
    let coordinator = coordinator.clone();
    let page_id = page_id.clone();
    async move {
      loop {
        let event = match receiver.recv().await {
          Ok(event) => event,
          Err(RecvError::Lagged(missed)) => {
            tracing::warn!(%page_id, missed, "slow viewer lagged, resending snapshot");
            match coordinator.get_page(&page_id).await {
              Ok(page) => PageEvent::snapshot(page),
              Err(_) => continue,
            }
          },
          Err(RecvError::Closed) => return None,
        };
        match Event::default().event(event.name()).json_data(event.payload()) {
          Ok(frame) => return Some((frame, receiver)),
          Err(err) => {
            tracing::error!(?err, "failed to encode event, skipping");
            continue;
          },
        }
      }
    }
  })
}
