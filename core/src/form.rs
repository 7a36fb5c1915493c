//! Field-level validation for the create and edit forms.
//!
//! Validation runs before any request is built, so a rejected form never
//! reaches the cache or the network.

use std::fmt;

use thiserror::Error;

use crate::types::{CreateTask, Task, TaskStatus, UpdateTask};

pub const TITLE_MAX_CHARS: usize = 200;
pub const DESCRIPTION_MAX_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Description,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Title => f.write_str("title"),
            Field::Description => f.write_str("description"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: Field,
    pub message: &'static str,
}

/// Every violated constraint of a submitted form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid task form: {}", summary(.errors))]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn message_for(&self, field: Field) -> Option<&'static str> {
        self.errors.iter().find(|e| e.field == field).map(|e| e.message)
    }
}

fn summary(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Raw form input. An empty description means "no description".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskForm {
    pub title: String,
    pub description: String,
    pub status: Option<TaskStatus>,
}

impl TaskForm {
    /// Prefilled edit form for an existing task.
    pub fn from_task(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone().unwrap_or_default(),
            status: Some(task.status),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = Vec::new();
        if self.title.trim().is_empty() {
            errors.push(FieldError {
                field: Field::Title,
                message: "Title is required",
            });
        } else if self.title.chars().count() > TITLE_MAX_CHARS {
            errors.push(FieldError {
                field: Field::Title,
                message: "Title must be less than 200 characters",
            });
        }
        if self.description.chars().count() > DESCRIPTION_MAX_CHARS {
            errors.push(FieldError {
                field: Field::Description,
                message: "Description must be less than 1000 characters",
            });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors { errors })
        }
    }

    pub fn to_create(&self) -> Result<CreateTask, ValidationErrors> {
        self.validate()?;
        Ok(CreateTask {
            title: self.title.clone(),
            description: non_empty(&self.description),
        })
    }

    /// Edit submissions always send the title and status; an empty
    /// description is omitted and leaves the stored one untouched.
    pub fn to_update(&self) -> Result<UpdateTask, ValidationErrors> {
        self.validate()?;
        Ok(UpdateTask {
            title: Some(self.title.clone()),
            description: non_empty(&self.description),
            status: self.status,
        })
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Validate a create payload that did not come through a `TaskForm`.
pub fn validate_create(input: &CreateTask) -> Result<(), ValidationErrors> {
    TaskForm {
        title: input.title.clone(),
        description: input.description.clone().unwrap_or_default(),
        status: None,
    }
    .validate()
}

/// Validate only the fields an update actually carries.
pub fn validate_update(input: &UpdateTask) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();
    if let Some(title) = &input.title {
        let form = TaskForm {
            title: title.clone(),
            ..TaskForm::default()
        };
        if let Err(e) = form.validate() {
            errors.extend(e.errors);
        }
    }
    if let Some(description) = &input.description {
        if description.chars().count() > DESCRIPTION_MAX_CHARS {
            errors.push(FieldError {
                field: Field::Description,
                message: "Description must be less than 1000 characters",
            });
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors { errors })
    }
}
