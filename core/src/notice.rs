//! User-facing notices.

use std::time::Duration;

use crate::error::ApiError;

/// How long a success notice stays up.
pub const DEFAULT_AUTO_CLOSE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    /// Failures on list and detail views offer a retry.
    pub retryable: bool,
}

impl Notice {
    pub fn task_created(title: &str) -> Self {
        Self::success(format!("Your task \"{title}\" has been created successfully."))
    }

    pub fn task_updated(title: &str) -> Self {
        Self::success(format!("Your task \"{title}\" has been updated successfully."))
    }

    pub fn task_deleted(title: &str) -> Self {
        Self::success(format!("Your task \"{title}\" has been deleted."))
    }

    pub fn create_failed() -> Self {
        Self::failure("Failed to create task. Please try again.", false)
    }

    pub fn update_failed() -> Self {
        Self::failure("Failed to update task. Please try again.", false)
    }

    pub fn delete_failed() -> Self {
        Self::failure("Failed to delete task. Please try again.", false)
    }

    pub fn tasks_load_failed() -> Self {
        Self::failure("Failed to load tasks. Please check your connection and try again.", true)
    }

    /// A missing task and a failed load read differently on the edit page.
    pub fn task_load_failed(error: &ApiError) -> Self {
        match error {
            ApiError::NotFound => Self::failure("Task not found.", false),
            _ => Self::failure(
                "Failed to load task. The task may not exist or there was a connection error.",
                true,
            ),
        }
    }

    /// Confirmation prompt shown before a delete.
    pub fn confirm_delete(title: &str) -> String {
        format!("Are you sure you want to delete \"{title}\"? This action cannot be undone.")
    }

    fn success(message: String) -> Self {
        Self {
            kind: NoticeKind::Success,
            message,
            retryable: false,
        }
    }

    fn failure(message: &str, retryable: bool) -> Self {
        Self {
            kind: NoticeKind::Failure,
            message: message.to_string(),
            retryable,
        }
    }
}
