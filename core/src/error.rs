//! Error types for the task API client.
//!
//! # Design
//! `NotFound` gets a dedicated variant because callers distinguish "the task
//! does not exist" from "the server failed." All other non-2xx responses land
//! in `Server` with the raw status code and body. `Network` is never produced
//! by the core itself; hosts use it for connection failures and timeouts.
//!
//! `ApiError` is `Clone` because cache entries keep the last fetch error.

use thiserror::Error;

/// Errors returned by `TaskClient` parse methods and host transports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The request never produced a response (connection refused, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The server returned 404; the requested task does not exist.
    #[error("resource not found")]
    NotFound,

    /// The server returned a non-2xx status other than 404.
    #[error("HTTP {status}: {body}")]
    Server { status: u16, body: String },

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl ApiError {
    /// Whether a generic transport retry may help: network failures and 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
