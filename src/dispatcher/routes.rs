//! Worker-facing endpoints: `POST /get_task` and `POST /put_result`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tracing::{debug, error, warn};

use super::broker::Dispatcher;
use super::types::{SubtaskResult, TaskRequest, TaskResponse, WorkResponse};
use crate::cipher::{self, BrokerKey};
use crate::error::DispatchError;
use crate::registry::HandlerRegistry;

/// Shared state for the worker-facing routes.
#[derive(Clone)]
pub struct BrokerState {
    pub dispatcher: Arc<Dispatcher>,
    pub key: Arc<BrokerKey>,
    pub handlers: Arc<HandlerRegistry>,
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, message.into()).into_response()
}

/// POST /get_task
///
/// Long-polls for work on the accepted handlers. The sealed key is opened
/// before polling so a bad request never consumes an item.
async fn get_task(
    State(state): State<BrokerState>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(e) => return bad_request(e.body_text()),
    };

    let key = match state.key.open(&request.cipher) {
        Ok(key) => key,
        Err(e) => {
            warn!("get_task: failed to open cipher: {e}");
            return bad_request(e.to_string());
        }
    };

    let accepts: Vec<String> = request
        .accepted_handlers()
        .into_iter()
        .filter(|h| state.handlers.contains(h))
        .collect();

    let subtask = match state.dispatcher.poll(&accepts, key.clone()).await {
        Ok(subtask) => subtask,
        Err(DispatchError::NoNewTasks) => return Json(TaskResponse::empty()).into_response(),
        Err(e) => {
            error!("get_task: poll failed: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let content = serde_json::to_string(&subtask)
        .map_err(DispatchError::from)
        .and_then(|json| cipher::encrypt(&json, &key).map_err(DispatchError::from));
    match content {
        Ok(content) => {
            debug!(task_id = subtask.id, handler = %subtask.handler, "Handed out subtask");
            Json(TaskResponse::with_content(content)).into_response()
        }
        Err(e) => {
            error!(task_id = subtask.id, "get_task: failed to encode subtask: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// POST /put_result
///
/// 200 on delivery, 410 if the submitter already gave up, 400 if the
/// content does not decrypt to a result.
async fn put_result(
    State(state): State<BrokerState>,
    payload: Result<Json<WorkResponse>, JsonRejection>,
) -> Response {
    let Json(work) = match payload {
        Ok(p) => p,
        Err(e) => return bad_request(e.body_text()),
    };

    let Some(key) = state.dispatcher.key_for(work.task_id) else {
        warn!(task_id = work.task_id, "put_result: task vanished");
        return StatusCode::GONE.into_response();
    };

    let plain = match cipher::decrypt(&work.content, &key) {
        Ok(plain) => plain,
        Err(e) => {
            warn!(task_id = work.task_id, "put_result: {e}");
            return bad_request(e.to_string());
        }
    };
    let result: SubtaskResult = match serde_json::from_str(&plain) {
        Ok(r) => r,
        Err(e) => return bad_request(e.to_string()),
    };

    match state.dispatcher.deliver(work.task_id, result) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(_) => {
            warn!(task_id = work.task_id, "put_result: task vanished");
            StatusCode::GONE.into_response()
        }
    }
}

/// Build the worker-facing routes.
pub fn task_routes(state: BrokerState) -> Router {
    Router::new()
        .route("/get_task", post(get_task))
        .route("/put_result", post(put_result))
        .with_state(state)
}
