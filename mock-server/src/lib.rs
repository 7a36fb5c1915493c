use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

const DEFAULT_LIMIT: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "TO_DO")]
    Todo,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "DONE")]
    Done,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct CreateTask {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<TaskStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksPage {
    pub data: Vec<Task>,
    pub total: u32,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

/// Tasks, newest first.
pub type Db = Arc<RwLock<Vec<Task>>>;

pub fn app() -> Router {
    app_with(Db::default())
}

/// Router over an existing store, so tests can seed or inspect it.
pub fn app_with(db: Db) -> Router {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{id}", get(get_task).patch(update_task).delete(delete_task))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn list_tasks(State(db): State<Db>, Query(query): Query<ListQuery>) -> Json<TasksPage> {
    let tasks = db.read().await;
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).max(1);
    let matching: Vec<&Task> = tasks
        .iter()
        .filter(|task| query.status.is_none_or(|status| task.status == status))
        .collect();
    let total = matching.len() as u32;
    let data = matching
        .into_iter()
        .skip((page - 1).saturating_mul(limit) as usize)
        .take(limit as usize)
        .cloned()
        .collect();
    Json(TasksPage {
        data,
        total,
        page,
        limit,
        total_pages: total.div_ceil(limit),
    })
}

async fn create_task(
    State(db): State<Db>,
    Json(input): Json<CreateTask>,
) -> Result<(StatusCode, Json<Task>), StatusCode> {
    if input.title.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let now = Utc::now();
    let task = Task {
        id: Uuid::new_v4().to_string(),
        title: input.title,
        description: input.description,
        status: TaskStatus::Todo,
        created_at: now,
        updated_at: now,
    };
    db.write().await.insert(0, task.clone());
    tracing::debug!(id = %task.id, "task created");
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(State(db): State<Db>, Path(id): Path<String>) -> Result<Json<Task>, StatusCode> {
    let tasks = db.read().await;
    tasks
        .iter()
        .find(|task| task.id == id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn update_task(
    State(db): State<Db>,
    Path(id): Path<String>,
    Json(input): Json<UpdateTask>,
) -> Result<Json<Task>, StatusCode> {
    if input.title.as_deref().is_some_and(|title| title.trim().is_empty()) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let mut tasks = db.write().await;
    let task = tasks.iter_mut().find(|task| task.id == id).ok_or(StatusCode::NOT_FOUND)?;
    if let Some(title) = input.title {
        task.title = title;
    }
    if let Some(description) = input.description {
        task.description = Some(description);
    }
    if let Some(status) = input.status {
        task.status = status;
    }
    task.updated_at = Utc::now().max(task.created_at);
    Ok(Json(task.clone()))
}

async fn delete_task(State(db): State<Db>, Path(id): Path<String>) -> Result<StatusCode, StatusCode> {
    let mut tasks = db.write().await;
    let position = tasks.iter().position(|task| task.id == id).ok_or(StatusCode::NOT_FOUND)?;
    tasks.remove(position);
    Ok(StatusCode::NO_CONTENT)
}
