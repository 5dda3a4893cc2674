//! HTTP surface for the task service.
//!
//! Reads return JSON documents. Writes redirect (303) to the page the browser
//! should land on next, matching a classic post/redirect/get form flow. Domain
//! failures carried as [`TaskError`] map to 404 / 400 / 422.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

use crate::error::TaskError;
use crate::form::{self, CategoryForm, TaskForm, TaskFormFields};
use crate::model::{Category, Priority, Status, Task, TaskDetail};
use crate::ops::{self, ListQuery, SortKey};
use crate::validate::today_utc;

#[derive(Clone)]
pub struct AppState {
    conn: Arc<Mutex<Connection>>,
}

impl AppState {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }
}

pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0.downcast_ref::<TaskError>() {
            Some(err @ TaskError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": err.to_string() }))).into_response()
            }
            Some(err @ TaskError::Rejected(_)) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() }))).into_response()
            }
            Some(TaskError::Invalid(errors)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "errors": errors })),
            )
                .into_response(),
            None => {
                log::error!("request failed: {:#}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}

/// Run blocking store work on the shared connection.
async fn with_conn<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let conn = Arc::clone(&state.conn);
    let result = tokio::task::spawn_blocking(move || {
        let conn = conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))?;
        f(&conn)
    })
    .await
    .context("database task panicked")?;
    Ok(result?)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub category_id: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub sort: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl ListParams {
    fn to_query(&self) -> Result<ListQuery> {
        Ok(ListQuery {
            category_id: present(&self.category_id)
                .map(|v| form::parse_id("category_id", v))
                .transpose()?
                .flatten(),
            status: present(&self.status).map(Status::parse).transpose()?,
            priority: present(&self.priority).map(Priority::parse).transpose()?,
            sort: present(&self.sort)
                .map(SortKey::parse)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

/// A task form body, either JSON (nested `subtasks`) or urlencoded parallel
/// fields as posted by a plain HTML form.
pub struct TaskSubmission(pub TaskForm);

impl<S> FromRequest<S> for TaskSubmission
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let urlencoded = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if urlencoded {
            let axum_extra::extract::Form(fields) =
                axum_extra::extract::Form::<TaskFormFields>::from_request(req, state)
                    .await
                    .map_err(IntoResponse::into_response)?;
            let form = fields
                .into_form()
                .map_err(|e| ApiError::from(e).into_response())?;
            Ok(Self(form))
        } else {
            let Json(form) = Json::<TaskForm>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(Self(form))
        }
    }
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let query = params.to_query()?;
    let tasks = with_conn(&state, move |conn| ops::list_tasks(conn, &query)).await?;
    Ok(Json(tasks))
}

async fn show_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TaskDetail>, ApiError> {
    let detail = with_conn(&state, move |conn| ops::get_task_detail(conn, id)).await?;
    Ok(Json(detail))
}

async fn edit_form(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TaskForm>, ApiError> {
    let form = with_conn(&state, move |conn| ops::edit_form(conn, id)).await?;
    Ok(Json(form))
}

async fn new_form() -> Json<TaskForm> {
    Json(ops::new_form(today_utc()))
}

async fn create_task(
    State(state): State<AppState>,
    TaskSubmission(form): TaskSubmission,
) -> Result<Redirect, ApiError> {
    let id = with_conn(&state, move |conn| ops::create_task(conn, &form, today_utc())).await?;
    log::info!("created task {id}");
    Ok(Redirect::to("/tasks"))
}

async fn edit_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    TaskSubmission(form): TaskSubmission,
) -> Result<Redirect, ApiError> {
    with_conn(&state, move |conn| ops::edit_task(conn, id, &form, today_utc())).await?;
    log::info!("updated task {id}");
    Ok(Redirect::to("/tasks"))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Redirect, ApiError> {
    with_conn(&state, move |conn| ops::delete_task(conn, id)).await?;
    log::info!("deleted task {id}");
    Ok(Redirect::to("/tasks"))
}

async fn start_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Redirect, ApiError> {
    with_conn(&state, move |conn| ops::start_task(conn, id)).await?;
    log::info!("task {id} in progress");
    Ok(Redirect::to(&format!("/tasks/{id}")))
}

async fn complete_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Redirect, ApiError> {
    with_conn(&state, move |conn| ops::complete_task(conn, id)).await?;
    log::info!("task {id} done");
    Ok(Redirect::to(&format!("/tasks/{id}")))
}

async fn reopen_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Redirect, ApiError> {
    with_conn(&state, move |conn| ops::reopen_task(conn, id)).await?;
    log::info!("task {id} reopened");
    Ok(Redirect::to(&format!("/tasks/{id}")))
}

async fn toggle_subtask(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Redirect, ApiError> {
    let task_id = with_conn(&state, move |conn| ops::toggle_subtask(conn, id)).await?;
    log::info!("toggled subtask {id} of task {task_id}");
    Ok(Redirect::to(&format!("/tasks/{task_id}")))
}

async fn list_categories(State(state): State<AppState>) -> Result<Json<Vec<Category>>, ApiError> {
    let categories = with_conn(&state, ops::list_categories).await?;
    Ok(Json(categories))
}

async fn create_category(
    State(state): State<AppState>,
    Form(form): Form<CategoryForm>,
) -> Result<Redirect, ApiError> {
    let id = with_conn(&state, move |conn| ops::add_category(conn, &form.name)).await?;
    log::info!("created category {id}");
    Ok(Redirect::to("/categories"))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/new", get(new_form))
        .route("/tasks/{id}", get(show_task).post(edit_task))
        .route("/tasks/{id}/edit", get(edit_form))
        .route("/tasks/{id}/delete", post(delete_task))
        .route("/tasks/{id}/start", post(start_task))
        .route("/tasks/{id}/complete", post(complete_task))
        .route("/tasks/{id}/reopen", post(reopen_task))
        .route("/subtasks/{id}/toggle", post(toggle_subtask))
        .route("/categories", get(list_categories).post(create_category))
        .with_state(state)
}

pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    log::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .await
        .context("server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use axum::http::Request;
    use axum::body::Body;
    use chrono::Duration;
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_app() -> (Router, AppState) {
        let state = AppState::new(db::open_memory().unwrap());
        (router(state.clone()), state)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Response {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(v) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(v.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();
        app.clone().oneshot(req).await.unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn location(resp: &Response) -> &str {
        resp.headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
    }

    fn seed(state: &AppState, title: &str, subtasks: &[&str]) -> i64 {
        let conn = state.conn.lock().unwrap();
        let form = TaskForm {
            title: title.to_string(),
            subtasks: subtasks
                .iter()
                .map(|t| crate::form::SubtaskForm::new(t))
                .collect(),
            ..TaskForm::default()
        };
        ops::create_task(&conn, &form, today_utc()).unwrap()
    }

    #[tokio::test]
    async fn create_redirects_and_lists() {
        let (app, _) = test_app();
        let resp = send(
            &app,
            "POST",
            "/tasks",
            Some(json!({
                "title": "Plan trip",
                "priority": "high",
                "subtasks": [{"title": "book hotel"}, {"title": " "}, {"title": "flights"}]
            })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/tasks");

        let resp = send(&app, "GET", "/tasks", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let tasks = body_json(resp).await;
        assert_eq!(tasks.as_array().unwrap().len(), 1);
        assert_eq!(tasks[0]["title"], "Plan trip");
        assert_eq!(tasks[0]["priority"], "high");
        assert_eq!(tasks[0]["subtask_count"], 2);
    }

    #[tokio::test]
    async fn past_due_date_is_unprocessable() {
        let (app, _) = test_app();
        let yesterday = today_utc() - Duration::days(1);
        let resp = send(
            &app,
            "POST",
            "/tasks",
            Some(json!({ "title": "late", "due_date": yesterday.to_string() })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(resp).await;
        assert_eq!(body["errors"][0]["field"], "due_date");
    }

    #[tokio::test]
    async fn detail_and_missing() {
        let (app, state) = test_app();
        let id = seed(&state, "t", &["a", "b"]);

        let resp = send(&app, "GET", &format!("/tasks/{id}"), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let detail = body_json(resp).await;
        assert_eq!(detail["title"], "t");
        assert_eq!(detail["subtasks"][1]["title"], "b");
        assert_eq!(detail["subtasks"][1]["sort_order"], 1);

        let resp = send(&app, "GET", "/tasks/999", None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn edit_round_trip_through_edit_form() {
        let (app, state) = test_app();
        let id = seed(&state, "t", &["first", "second"]);

        let resp = send(&app, "GET", &format!("/tasks/{id}/edit"), None).await;
        let mut form = body_json(resp).await;
        form["title"] = json!("renamed");
        let subtasks = form["subtasks"].as_array_mut().unwrap();
        subtasks.remove(0);
        subtasks.push(json!({ "title": "third" }));

        let resp = send(&app, "POST", &format!("/tasks/{id}"), Some(form)).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);

        let detail = body_json(send(&app, "GET", &format!("/tasks/{id}"), None).await).await;
        assert_eq!(detail["title"], "renamed");
        let titles: Vec<&str> = detail["subtasks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["second", "third"]);
    }

    #[tokio::test]
    async fn done_task_edit_is_bad_request() {
        let (app, state) = test_app();
        let id = seed(&state, "t", &[]);

        let resp = send(&app, "POST", &format!("/tasks/{id}/complete"), None).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), format!("/tasks/{id}"));

        let resp = send(&app, "GET", &format!("/tasks/{id}/edit"), None).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = send(&app, "POST", &format!("/tasks/{id}"), Some(json!({ "title": "x" }))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = send(&app, "POST", &format!("/tasks/{id}/reopen"), None).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn toggle_redirects_to_parent_and_hides_after_delete() {
        let (app, state) = test_app();
        let id = seed(&state, "t", &["a"]);
        let sub = ops::list_subtasks(&state.conn.lock().unwrap(), id).unwrap()[0].id;

        let resp = send(&app, "POST", &format!("/subtasks/{sub}/toggle"), None).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), format!("/tasks/{id}"));

        let resp = send(&app, "POST", &format!("/tasks/{id}/delete"), None).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);

        let resp = send(&app, "POST", &format!("/subtasks/{sub}/toggle"), None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = send(&app, "GET", &format!("/tasks/{id}"), None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let tasks = body_json(send(&app, "GET", "/tasks", None).await).await;
        assert!(tasks.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_filters_from_query_string() {
        let (app, state) = test_app();
        let a = seed(&state, "a", &[]);
        seed(&state, "b", &[]);
        send(&app, "POST", &format!("/tasks/{a}/start"), None).await;

        let tasks =
            body_json(send(&app, "GET", "/tasks?status=in_progress&sort=updated&priority=", None).await)
                .await;
        assert_eq!(tasks.as_array().unwrap().len(), 1);
        assert_eq!(tasks[0]["id"], a);

        let resp = send(&app, "GET", "/tasks?status=paused", None).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = send(&app, "GET", "/tasks?category_id=&status=&sort=", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await.as_array().unwrap().len(), 2);

        let resp = send(&app, "GET", "/tasks?category_id=abc", None).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(resp).await["errors"][0]["field"], "category_id");
    }

    async fn post_form(app: &Router, uri: &str, body: &str) -> Response {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap();
        app.clone().oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn urlencoded_create_and_edit() {
        let (app, _) = test_app();
        let resp = post_form(
            &app,
            "/tasks",
            "title=Trip&priority=high&subtask_id=&subtask_title=hotel\
             &subtask_id=&subtask_title=+&subtask_id=&subtask_title=flights&subtask_done=2",
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);

        let tasks = body_json(send(&app, "GET", "/tasks", None).await).await;
        let id = tasks[0]["id"].as_i64().unwrap();
        let detail = body_json(send(&app, "GET", &format!("/tasks/{id}"), None).await).await;
        assert_eq!(detail["title"], "Trip");
        assert_eq!(detail["priority"], "high");
        assert_eq!(detail["subtasks"].as_array().unwrap().len(), 2);
        assert_eq!(detail["subtasks"][0]["is_completed"], false);
        assert_eq!(detail["subtasks"][1]["title"], "flights");
        assert_eq!(detail["subtasks"][1]["is_completed"], true);
        assert_eq!(detail["subtasks"][1]["sort_order"], 1);

        let keep = detail["subtasks"][1]["id"].as_i64().unwrap();
        let resp = post_form(
            &app,
            &format!("/tasks/{id}"),
            &format!("title=Trip+2&subtask_id={keep}&subtask_title=flights"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let detail = body_json(send(&app, "GET", &format!("/tasks/{id}"), None).await).await;
        assert_eq!(detail["title"], "Trip 2");
        assert_eq!(detail["subtasks"][0]["id"], keep);
        assert_eq!(detail["subtasks"][0]["is_completed"], false);

        let resp = post_form(&app, "/tasks", "title=x&category_id=work").await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn new_form_defaults_due_to_tomorrow() {
        let (app, _) = test_app();
        let resp = send(&app, "GET", "/tasks/new", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let form = body_json(resp).await;
        let tomorrow = today_utc() + Duration::days(1);
        assert_eq!(form["due_date"], tomorrow.to_string());
        assert_eq!(form["status"], "open");
        assert_eq!(form["title"], "");
    }

    #[tokio::test]
    async fn categories_form_post() {
        let (app, _) = test_app();
        let req = Request::builder()
            .method("POST")
            .uri("/categories")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("name=Work"))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/categories");

        let categories = body_json(send(&app, "GET", "/categories", None).await).await;
        assert_eq!(categories[0]["name"], "Work");
    }
}
