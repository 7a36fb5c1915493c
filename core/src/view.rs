//! List page state: status filter, page and page size.
//!
//! Every transition returns the key the page should read next.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::query::QueryKey;
use crate::types::{ListParams, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ViewError {
    #[error("page numbers start at 1")]
    InvalidPage,
    #[error("page size {0} is not one of 6, 12, 24, 48")]
    InvalidPageSize(u32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StatusFilter {
    #[default]
    All,
    Todo,
    InProgress,
    Done,
}

impl StatusFilter {
    pub const OPTIONS: [StatusFilter; 4] = [
        StatusFilter::All,
        StatusFilter::Todo,
        StatusFilter::InProgress,
        StatusFilter::Done,
    ];

    pub fn status(self) -> Option<TaskStatus> {
        match self {
            StatusFilter::All => None,
            StatusFilter::Todo => Some(TaskStatus::Todo),
            StatusFilter::InProgress => Some(TaskStatus::InProgress),
            StatusFilter::Done => Some(TaskStatus::Done),
        }
    }

    pub fn label(self) -> &'static str {
        match self.status() {
            None => "All Tasks",
            Some(status) => status.label(),
        }
    }
}

impl From<Option<TaskStatus>> for StatusFilter {
    fn from(status: Option<TaskStatus>) -> Self {
        match status {
            None => StatusFilter::All,
            Some(TaskStatus::Todo) => StatusFilter::Todo,
            Some(TaskStatus::InProgress) => StatusFilter::InProgress,
            Some(TaskStatus::Done) => StatusFilter::Done,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.eq_ignore_ascii_case("all") {
            return Ok(StatusFilter::All);
        }
        value.parse::<TaskStatus>().map(|status| Some(status).into())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PageSize {
    #[default]
    Six,
    Twelve,
    TwentyFour,
    FortyEight,
}

impl PageSize {
    pub const OPTIONS: [PageSize; 4] = [PageSize::Six, PageSize::Twelve, PageSize::TwentyFour, PageSize::FortyEight];

    pub fn get(self) -> u32 {
        match self {
            PageSize::Six => 6,
            PageSize::Twelve => 12,
            PageSize::TwentyFour => 24,
            PageSize::FortyEight => 48,
        }
    }
}

impl TryFrom<u32> for PageSize {
    type Error = ViewError;

    fn try_from(size: u32) -> Result<Self, Self::Error> {
        PageSize::OPTIONS
            .into_iter()
            .find(|option| option.get() == size)
            .ok_or(ViewError::InvalidPageSize(size))
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListView {
    status_filter: StatusFilter,
    page: u32,
    page_size: PageSize,
}

impl Default for ListView {
    fn default() -> Self {
        Self {
            status_filter: StatusFilter::All,
            page: 1,
            page_size: PageSize::default(),
        }
    }
}

impl ListView {
    pub fn new(status_filter: StatusFilter, page_size: PageSize) -> Self {
        Self {
            status_filter,
            page: 1,
            page_size,
        }
    }

    pub fn status_filter(&self) -> StatusFilter {
        self.status_filter
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> PageSize {
        self.page_size
    }

    pub fn params(&self) -> ListParams {
        ListParams {
            status: self.status_filter.status(),
            page: Some(self.page),
            limit: Some(self.page_size.get()),
        }
    }

    pub fn active_key(&self) -> QueryKey {
        QueryKey::task_list(&self.params())
    }

    /// Whether a response for `key` may still be shown.
    pub fn is_active(&self, key: &QueryKey) -> bool {
        &self.active_key() == key
    }

    /// Changing the filter changes the result set, so the page resets.
    pub fn set_status_filter(&mut self, filter: StatusFilter) -> QueryKey {
        self.status_filter = filter;
        self.page = 1;
        self.active_key()
    }

    pub fn set_page_size(&mut self, size: PageSize) -> QueryKey {
        self.page_size = size;
        self.page = 1;
        self.active_key()
    }

    pub fn set_page(&mut self, page: u32) -> Result<QueryKey, ViewError> {
        if page == 0 {
            return Err(ViewError::InvalidPage);
        }
        self.page = page;
        Ok(self.active_key())
    }

    /// Pull the page back inside `[1, total_pages]` after the result set
    /// shrank. Returns the new key when the page moved.
    pub fn clamp_to(&mut self, total_pages: u32) -> Option<QueryKey> {
        let last = total_pages.max(1);
        if self.page <= last {
            return None;
        }
        self.page = last;
        Some(self.active_key())
    }
}
