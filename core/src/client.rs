//! Stateless HTTP request builder and response parser for the task API.
//!
//! # Design
//! `TaskClient` holds only a `base_url` and carries no mutable state between
//! calls. Each operation is split into a `build_*` method that produces an
//! `HttpRequest` and a `parse_*` method that consumes an `HttpResponse`.
//! The host executes the actual HTTP round-trip, keeping the core
//! deterministic and free of I/O dependencies. Errors are passed through
//! unchanged; callers interpret them via `ApiError`.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use url::form_urlencoded;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::types::{CreateTask, ListParams, Task, TaskId, TasksPage, UpdateTask};

/// Everything but RFC 3986 unreserved characters is escaped in an id segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Synchronous, stateless client for the task API.
#[derive(Debug, Clone)]
pub struct TaskClient {
    base_url: String,
}

impl TaskClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn build_list_tasks(&self, params: &ListParams) -> HttpRequest {
        let mut query = form_urlencoded::Serializer::new(String::new());
        if let Some(status) = params.status {
            query.append_pair("status", status.as_wire());
        }
        if let Some(page) = params.page {
            query.append_pair("page", &page.to_string());
        }
        if let Some(limit) = params.limit {
            query.append_pair("limit", &limit.to_string());
        }
        let query = query.finish();
        let path = if query.is_empty() {
            format!("{}/tasks", self.base_url)
        } else {
            format!("{}/tasks?{query}", self.base_url)
        };
        HttpRequest {
            method: HttpMethod::Get,
            path,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn build_get_task(&self, id: &TaskId) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            path: self.task_path(id),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn build_create_task(&self, input: &CreateTask) -> Result<HttpRequest, ApiError> {
        let body = serde_json::to_string(input).map_err(|e| ApiError::Serialization(e.to_string()))?;
        Ok(HttpRequest {
            method: HttpMethod::Post,
            path: format!("{}/tasks", self.base_url),
            headers: json_headers(),
            body: Some(body),
        })
    }

    pub fn build_update_task(&self, id: &TaskId, input: &UpdateTask) -> Result<HttpRequest, ApiError> {
        let body = serde_json::to_string(input).map_err(|e| ApiError::Serialization(e.to_string()))?;
        Ok(HttpRequest {
            method: HttpMethod::Patch,
            path: self.task_path(id),
            headers: json_headers(),
            body: Some(body),
        })
    }

    pub fn build_delete_task(&self, id: &TaskId) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Delete,
            path: self.task_path(id),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn parse_list_tasks(&self, response: HttpResponse) -> Result<TasksPage, ApiError> {
        check_status(&response)?;
        let page: TasksPage = decode(&response.body)?;
        if let Some(bad) = page.data.iter().find(|task| !task.is_consistent()) {
            return Err(inconsistent(bad));
        }
        Ok(page)
    }

    pub fn parse_get_task(&self, response: HttpResponse) -> Result<Task, ApiError> {
        parse_task(response)
    }

    pub fn parse_create_task(&self, response: HttpResponse) -> Result<Task, ApiError> {
        parse_task(response)
    }

    pub fn parse_update_task(&self, response: HttpResponse) -> Result<Task, ApiError> {
        parse_task(response)
    }

    /// Success carries no body; anything the server sends is ignored.
    pub fn parse_delete_task(&self, response: HttpResponse) -> Result<(), ApiError> {
        check_status(&response)?;
        Ok(())
    }

    fn task_path(&self, id: &TaskId) -> String {
        let segment = utf8_percent_encode(id.as_str(), PATH_SEGMENT);
        format!("{}/tasks/{segment}", self.base_url)
    }
}

fn json_headers() -> Vec<(String, String)> {
    vec![("content-type".to_string(), "application/json".to_string())]
}

fn parse_task(response: HttpResponse) -> Result<Task, ApiError> {
    check_status(&response)?;
    let task: Task = decode(&response.body)?;
    if !task.is_consistent() {
        return Err(inconsistent(&task));
    }
    Ok(task)
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::Deserialization(e.to_string()))
}

fn inconsistent(task: &Task) -> ApiError {
    ApiError::Deserialization(format!("task {} violates title/timestamp invariants", task.id))
}

/// Map non-success status codes to the appropriate `ApiError` variant.
fn check_status(response: &HttpResponse) -> Result<(), ApiError> {
    if response.is_success() {
        return Ok(());
    }
    if response.status == 404 {
        return Err(ApiError::NotFound);
    }
    Err(ApiError::Server {
        status: response.status,
        body: response.body.clone(),
    })
}
