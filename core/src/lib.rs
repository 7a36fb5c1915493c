//! Synchronous client core for the task service.
//!
//! # Overview
//! Builds `HttpRequest` values and parses `HttpResponse` values without
//! touching the network (host-does-IO pattern), and keeps the client-side
//! query cache that lists, filters and optimistic edits are served from.
//!
//! # Design
//! - `TaskClient` is stateless; it holds only `base_url`.
//! - Each operation is split into `build_*` (produces request) and
//!   `parse_*` (consumes response), so the I/O boundary is explicit.
//! - `QueryCache` is a plain state machine driven with explicit instants.
//!   It hands out fetch tickets instead of fetching, so at-most-one-in-flight,
//!   staleness, rollback and eviction are all testable without a runtime.
//! - `ListView` and `PageWindow` hold the list page's filter, paging and
//!   control layout.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod cache;
pub mod client;
pub mod error;
pub mod form;
pub mod http;
pub mod notice;
pub mod pagination;
pub mod patch;
pub mod query;
pub mod types;
pub mod view;

pub use cache::{
    CacheConfig, CacheEntry, FetchResolution, FetchStatus, FetchTicket, MutationId, MutationStatus, QueryCache,
    ReadOutcome,
};
pub use client::TaskClient;
pub use error::ApiError;
pub use form::{TaskForm, ValidationErrors};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use notice::{Notice, NoticeKind};
pub use pagination::{ItemRange, PageWindow};
pub use patch::OptimisticPatch;
pub use query::{QueryData, QueryKey, ResourceKind};
pub use types::{CreateTask, ListParams, Task, TaskId, TaskStatus, TasksPage, UpdateTask};
pub use view::{ListView, PageSize, StatusFilter, ViewError};
