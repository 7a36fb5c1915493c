//! Optimistic patches as plain data.
//!
//! A patch is a pure function of `(key, previous data)`; the cache applies it
//! and keeps the previous data as a snapshot, so rolling back never replays
//! anything.

use chrono::{DateTime, Utc};

use crate::query::{QueryData, QueryKey};
use crate::types::{Task, TaskId, TasksPage, UpdateTask};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimisticPatch {
    /// Prepend a not-yet-confirmed task to first pages that would show it.
    Insert(Task),
    /// Drop a task from every list page holding it.
    Remove(TaskId),
    /// Apply field changes to a task wherever it is cached. A list whose
    /// status filter no longer admits the task drops it.
    Update {
        id: TaskId,
        changes: UpdateTask,
        at: DateTime<Utc>,
    },
}

impl OptimisticPatch {
    /// Next data for `key`, or `None` when the patch does not affect it.
    pub fn apply(&self, key: &QueryKey, previous: &QueryData) -> Option<QueryData> {
        match (self, previous) {
            (OptimisticPatch::Insert(task), QueryData::TaskPage(page)) => {
                if !key.admits(task) || !key.is_first_page() {
                    return None;
                }
                Some(QueryData::TaskPage(insert(page, task)))
            }
            (OptimisticPatch::Remove(id), QueryData::TaskPage(page)) => {
                let mut next = page.clone();
                next.data.retain(|task| &task.id != id);
                if next.data.len() == page.data.len() {
                    return None;
                }
                let total = page.total.saturating_sub(1);
                Some(QueryData::TaskPage(next.with_total(total)))
            }
            (OptimisticPatch::Update { id, changes, at }, QueryData::TaskPage(page)) => {
                let position = page.data.iter().position(|task| &task.id == id)?;
                let updated = changes.apply_to(&page.data[position], *at);
                let mut next = page.clone();
                if key.admits(&updated) {
                    next.data[position] = updated;
                    return Some(QueryData::TaskPage(next));
                }
                // Moved out of this filter.
                next.data.remove(position);
                let total = page.total.saturating_sub(1);
                Some(QueryData::TaskPage(next.with_total(total)))
            }
            (OptimisticPatch::Update { id, changes, at }, QueryData::Task(task)) if &task.id == id => {
                Some(QueryData::Task(changes.apply_to(task, *at)))
            }
            _ => None,
        }
    }
}

fn insert(page: &TasksPage, task: &Task) -> TasksPage {
    let mut next = page.clone();
    next.data.insert(0, task.clone());
    if next.limit > 0 {
        next.data.truncate(next.limit as usize);
    }
    let total = page.total.saturating_add(1);
    next.with_total(total)
}
