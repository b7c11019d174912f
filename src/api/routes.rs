//! Task administration endpoints. Every route is `POST` with a JSON body.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::warn;

use super::ApiError;
use crate::error::ClientError;
use crate::task::{CourseData, Manager, Task, TaskData, UserData};

#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<Manager>,
}

#[derive(Debug, Deserialize)]
struct IdRequest {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct ListCoursesRequest {
    handle: String,
    user: UserData,
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

fn okay() -> Json<Value> {
    Json(json!({"okay": true}))
}

/// POST /list_task: every task with live stats; secrets blanked.
async fn list_task(State(state): State<ApiState>) -> Json<Vec<TaskData>> {
    let tasks = state.manager.list_task_data().await;
    Json(tasks.iter().map(TaskData::redacted).collect())
}

/// POST /create_task: store, build and start a task.
async fn create_task(
    State(state): State<ApiState>,
    payload: Result<Json<TaskData>, JsonRejection>,
) -> ApiResult<Value> {
    let data = body(payload)?;
    let (id, task) = state.manager.create_task(data).await?;
    task.start();
    Ok(Json(json!({"id": id})))
}

async fn with_task(
    state: &ApiState,
    payload: Result<Json<IdRequest>, JsonRejection>,
    action: fn(&Task),
) -> ApiResult<Value> {
    let IdRequest { id } = body(payload)?;
    let task = state.manager.get_task(id).await?;
    action(&task);
    Ok(okay())
}

async fn start_task(
    State(state): State<ApiState>,
    payload: Result<Json<IdRequest>, JsonRejection>,
) -> ApiResult<Value> {
    with_task(&state, payload, Task::start).await
}

async fn stop_task(
    State(state): State<ApiState>,
    payload: Result<Json<IdRequest>, JsonRejection>,
) -> ApiResult<Value> {
    with_task(&state, payload, Task::stop).await
}

async fn restart_task(
    State(state): State<ApiState>,
    payload: Result<Json<IdRequest>, JsonRejection>,
) -> ApiResult<Value> {
    with_task(&state, payload, Task::restart).await
}

async fn delete_task(
    State(state): State<ApiState>,
    payload: Result<Json<IdRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let IdRequest { id } = body(payload)?;
    state.manager.delete_task(id).await?;
    Ok(okay())
}

async fn for_all(state: &ApiState, action: fn(&Task)) -> Json<Value> {
    let tasks = state.manager.list_tasks().await;
    for task in &tasks {
        action(task);
    }
    Json(json!({"okay": true, "count": tasks.len()}))
}

async fn start_all(State(state): State<ApiState>) -> Json<Value> {
    for_all(&state, Task::start).await
}

async fn stop_all(State(state): State<ApiState>) -> Json<Value> {
    for_all(&state, Task::stop).await
}

async fn restart_all(State(state): State<ApiState>) -> Json<Value> {
    for_all(&state, Task::restart).await
}

/// POST /delete_all: stop and remove every task, halting at the first error.
async fn delete_all(State(state): State<ApiState>) -> ApiResult<Value> {
    let ids: Vec<i64> = state
        .manager
        .list_task_data()
        .await
        .iter()
        .map(|data| data.id)
        .collect();
    for id in &ids {
        state.manager.delete_task(*id).await?;
    }
    Ok(Json(json!({"okay": true, "count": ids.len()})))
}

/// POST /list_courses: ask the site which courses a user can pick.
async fn list_courses(
    State(state): State<ApiState>,
    payload: Result<Json<ListCoursesRequest>, JsonRejection>,
) -> ApiResult<Vec<CourseData>> {
    let req = body(payload)?;
    let handler = state
        .manager
        .handlers()
        .get(&req.handle)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let user = handler.make_user(&req.user.userid, &req.user.password);
    match user.list_courses().await {
        Ok(courses) => Ok(Json(courses)),
        Err(e @ ClientError::InvalidData(_)) => {
            warn!(handle = %req.handle, user = %req.user.userid, "list_courses got bad data: {e}");
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
        }
        Err(e) => {
            warn!(handle = %req.handle, user = %req.user.userid, "list_courses failed: {e}");
            Err(ApiError::new(StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Build the admin routes, optionally with permissive CORS.
pub fn api_routes(state: ApiState, cors: bool) -> Router {
    let router = Router::new()
        .route("/list_task", post(list_task))
        .route("/create_task", post(create_task))
        .route("/start_task", post(start_task))
        .route("/stop_task", post(stop_task))
        .route("/restart_task", post(restart_task))
        .route("/delete_task", post(delete_task))
        .route("/start_all", post(start_all))
        .route("/stop_all", post(stop_all))
        .route("/restart_all", post(restart_all))
        .route("/delete_all", post(delete_all))
        .route("/list_courses", post(list_courses))
        .route("/health", post(health).get(health))
        .with_state(state);

    if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use axum::response::Response;
    use tower::ServiceExt;

    use async_trait::async_trait;

    use super::*;
    use crate::task::manager::tests::{StubHandler, manager, task_data};
    use crate::task::{Course, LoginSession, SiteHandler, User};

    /// Handler whose users fail to list courses with a fixed error.
    struct BrokenSite(fn() -> ClientError);

    struct BrokenUser(fn() -> ClientError);

    #[async_trait]
    impl User for BrokenUser {
        fn name(&self) -> &str {
            "broken"
        }

        async fn login(&self) -> Result<LoginSession, ClientError> {
            Err((self.0)())
        }

        async fn list_courses(&self) -> Result<Vec<CourseData>, ClientError> {
            Err((self.0)())
        }
    }

    impl SiteHandler for BrokenSite {
        fn make_user(&self, _userid: &str, _password: &str) -> Arc<dyn User> {
            Arc::new(BrokenUser(self.0))
        }

        fn make_course(&self, name: &str, desc: &str, token: &str) -> Arc<dyn Course> {
            StubHandler.make_course(name, desc, token)
        }
    }

    fn app() -> (Router, Arc<Manager>) {
        let manager = Arc::new(manager());
        let router = api_routes(
            ApiState {
                manager: Arc::clone(&manager),
            },
            false,
        );
        (router, manager)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn create_list_stop_delete() {
        let (app, manager) = app();

        let resp = app
            .clone()
            .oneshot(post_json(
                "/create_task",
                serde_json::to_value(task_data("stub", "marisa")).unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let id = read_json(resp).await["id"].as_i64().unwrap();
        assert!(manager.get_task(id).await.unwrap().statistics().running);

        let resp = app
            .clone()
            .oneshot(post_json("/list_task", json!({})))
            .await
            .unwrap();
        let listed = read_json(resp).await;
        assert_eq!(listed[0]["user"]["userid"], "marisa");
        assert_eq!(listed[0]["user"]["password"], "");
        assert_eq!(listed[0]["courses"][0]["token"], "");
        assert_eq!(listed[0]["stat"]["running"], true);

        let resp = app
            .clone()
            .oneshot(post_json("/stop_task", json!({"id": id})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(read_json(resp).await, json!({"okay": true}));
        assert!(!manager.get_task(id).await.unwrap().statistics().running);

        let resp = app
            .clone()
            .oneshot(post_json("/delete_task", json!({"id": id})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(post_json("/start_task", json!({"id": id})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(read_json(resp).await["error"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn bulk_actions() {
        let (app, manager) = app();
        for userid in ["a", "b", "c"] {
            manager.create_task(task_data("stub", userid)).await.unwrap();
        }

        let resp = app
            .clone()
            .oneshot(post_json("/start_all", json!({})))
            .await
            .unwrap();
        assert_eq!(read_json(resp).await["count"], 3);
        for task in manager.list_tasks().await {
            assert!(task.statistics().running);
        }

        app.clone()
            .oneshot(post_json("/restart_all", json!({})))
            .await
            .unwrap();
        app.oneshot(post_json("/stop_all", json!({})))
            .await
            .unwrap();
        for task in manager.list_tasks().await {
            assert!(!task.statistics().running);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delete_all_removes_every_task() {
        let (app, manager) = app();
        let mut started = Vec::new();
        for userid in ["a", "b", "c"] {
            let (_, task) = manager.create_task(task_data("stub", userid)).await.unwrap();
            task.start();
            started.push(task);
        }

        let resp = app
            .clone()
            .oneshot(post_json("/delete_all", json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(read_json(resp).await, json!({"okay": true, "count": 3}));
        assert!(manager.list_tasks().await.is_empty());
        assert!(started.iter().all(|t| !t.statistics().running));

        let resp = app
            .oneshot(post_json("/delete_all", json!({})))
            .await
            .unwrap();
        assert_eq!(read_json(resp).await["count"], 0);
    }

    #[tokio::test]
    async fn list_courses_failures_map_to_status() {
        let (app, manager) = app();
        manager
            .handlers()
            .register("garbled", Arc::new(BrokenSite(|| ClientError::InvalidData(vec![]))))
            .unwrap();
        manager
            .handlers()
            .register("down", Arc::new(BrokenSite(|| ClientError::Domain("captcha failed".into()))))
            .unwrap();

        let resp = app
            .clone()
            .oneshot(post_json(
                "/list_courses",
                json!({"handle": "garbled", "user": {"userid": "u", "password": "p"}}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = app
            .oneshot(post_json(
                "/list_courses",
                json!({"handle": "down", "user": {"userid": "u", "password": "p"}}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(read_json(resp).await["error"], "captcha failed");
    }

    #[tokio::test]
    async fn bad_requests() {
        let (app, _) = app();

        let resp = app
            .clone()
            .oneshot(post_json("/create_task", serde_json::to_value(task_data("nope", "x")).unwrap()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .clone()
            .oneshot(post_json("/stop_task", json!({"identifier": 1})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(post_json(
                "/list_courses",
                json!({"handle": "nope", "user": {"userid": "u", "password": "p"}}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_courses_through_handler() {
        let (app, _) = app();
        let resp = app
            .oneshot(post_json(
                "/list_courses",
                json!({"handle": "stub", "user": {"userid": "u", "password": "p"}}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let courses = read_json(resp).await;
        assert_eq!(courses[0]["token"], "stub-token");
    }

    #[tokio::test]
    async fn health_answers() {
        let (app, _) = app();
        let resp = app
            .oneshot(post_json("/health", json!({})))
            .await
            .unwrap();
        assert_eq!(read_json(resp).await["status"], "ok");
    }
}
