//! Async host for the taskboard core.
//!
//! # Overview
//! The core builds requests and keeps the query cache but never performs
//! I/O. This crate supplies the rest: a reqwest `Transport`, a `TaskStore`
//! that drives the cache from tokio tasks (sharing one request between
//! concurrent readers, applying and rolling back optimistic writes), a
//! `ListSession` for the list page, cancellable timers behind self-closing
//! notices, and configuration from the environment.

pub mod config;
pub mod notice;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod transport;

pub use config::{Config, ConfigError};
pub use notice::NoticeBoard;
pub use scheduler::ScheduledCallback;
pub use session::{ListPage, ListSession};
pub use store::{Observer, StoreError, TaskStore};
pub use transport::{HttpTransport, Retrying, Transport};

use taskboard_core::TaskClient;

/// The production stack: reqwest with read retries, configured from `config`.
pub fn connect(config: &Config) -> Result<TaskStore<Retrying<HttpTransport>>, taskboard_core::ApiError> {
    let transport = Retrying::new(HttpTransport::new(config.timeout)?, config.retries);
    Ok(TaskStore::new(TaskClient::new(&config.api_url), transport, config.cache))
}
