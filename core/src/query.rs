//! Cache addressing: which result set a cache entry holds.

use std::collections::BTreeMap;
use std::fmt;

use crate::types::{ListParams, Task, TaskId, TaskStatus, TasksPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// A page of the task list.
    TaskList,
    /// A single task, as loaded by the edit page.
    Task,
}

/// Identity of one cacheable result set.
///
/// Filters live in an ordered map, so two keys built from the same filters in
/// a different order compare and hash equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    pub kind: ResourceKind,
    pub filters: BTreeMap<String, String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl QueryKey {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            filters: BTreeMap::new(),
            page: None,
            page_size: None,
        }
    }

    pub fn with_filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(name.into(), value.into());
        self
    }

    pub fn task_list(params: &ListParams) -> Self {
        let mut key = Self::new(ResourceKind::TaskList);
        if let Some(status) = params.status {
            key = key.with_filter("status", status.as_wire());
        }
        key.page = params.page;
        key.page_size = params.limit;
        key
    }

    pub fn task(id: &TaskId) -> Self {
        Self::new(ResourceKind::Task).with_filter("id", id.as_str())
    }

    pub fn is_task_list(&self) -> bool {
        self.kind == ResourceKind::TaskList
    }

    /// Status filter of a list key; `None` means all statuses.
    pub fn status(&self) -> Option<TaskStatus> {
        self.filters.get("status").and_then(|s| s.parse().ok())
    }

    pub fn task_id(&self) -> Option<TaskId> {
        match self.kind {
            ResourceKind::Task => self.filters.get("id").map(|id| TaskId::new(id.as_str())),
            ResourceKind::TaskList => None,
        }
    }

    /// Request parameters for a list key.
    pub fn list_params(&self) -> Option<ListParams> {
        self.is_task_list().then(|| ListParams {
            status: self.status(),
            page: self.page,
            limit: self.page_size,
        })
    }

    /// Whether a list key would show `task` given its status filter.
    pub fn admits(&self, task: &Task) -> bool {
        self.is_task_list() && self.status().is_none_or(|status| status == task.status)
    }

    /// First page of a list, or an unpaginated list.
    pub fn is_first_page(&self) -> bool {
        self.page.is_none_or(|page| page <= 1)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ResourceKind::TaskList => f.write_str("tasks")?,
            ResourceKind::Task => f.write_str("task")?,
        }
        for (name, value) in &self.filters {
            write!(f, " {name}={value}")?;
        }
        if let Some(page) = self.page {
            write!(f, " page={page}")?;
        }
        if let Some(size) = self.page_size {
            write!(f, " limit={size}")?;
        }
        Ok(())
    }
}

/// Data held by a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryData {
    TaskPage(TasksPage),
    Task(Task),
}

impl QueryData {
    pub fn as_page(&self) -> Option<&TasksPage> {
        match self {
            QueryData::TaskPage(page) => Some(page),
            QueryData::Task(_) => None,
        }
    }

    pub fn as_task(&self) -> Option<&Task> {
        match self {
            QueryData::Task(task) => Some(task),
            QueryData::TaskPage(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn filter_order_does_not_matter() {
        let a = QueryKey::new(ResourceKind::TaskList)
            .with_filter("status", "DONE")
            .with_filter("owner", "me");
        let b = QueryKey::new(ResourceKind::TaskList)
            .with_filter("owner", "me")
            .with_filter("status", "DONE");
        assert_eq!(a, b);
        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn every_component_participates_in_equality() {
        let base = ListParams {
            status: Some(TaskStatus::Todo),
            page: Some(1),
            limit: Some(6),
        };
        let key = QueryKey::task_list(&base);
        assert_ne!(key, QueryKey::task_list(&ListParams { page: Some(2), ..base }));
        assert_ne!(key, QueryKey::task_list(&ListParams { limit: Some(12), ..base }));
        assert_ne!(key, QueryKey::task_list(&ListParams { status: None, ..base }));
        assert_eq!(key, QueryKey::task_list(&base));
    }

    #[test]
    fn list_key_round_trips_params() {
        let params = ListParams {
            status: Some(TaskStatus::InProgress),
            page: Some(3),
            limit: Some(24),
        };
        assert_eq!(QueryKey::task_list(&params).list_params(), Some(params));
        assert_eq!(QueryKey::task(&TaskId::new("9")).list_params(), None);
    }

    #[test]
    fn detail_key_exposes_id() {
        let key = QueryKey::task(&TaskId::new("9"));
        assert_eq!(key.task_id(), Some(TaskId::new("9")));
        assert_eq!(key.to_string(), "task id=9");
    }
}
