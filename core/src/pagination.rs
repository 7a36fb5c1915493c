//! Pagination windowing for the list page controls.

use std::ops::RangeInclusive;

pub const MAX_VISIBLE_PAGES: u32 = 5;

/// Which page controls to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageWindow {
    pub current: u32,
    pub total_pages: u32,
    pub start: u32,
    pub end: u32,
    /// Jump-to-first button ("1") before the window.
    pub show_first: bool,
    /// Ellipsis between "1" and the window.
    pub leading_ellipsis: bool,
    pub trailing_ellipsis: bool,
    /// Jump-to-last button after the window.
    pub show_last: bool,
}

impl PageWindow {
    /// Window of at most five pages centred on `current`, shifted left near
    /// the end. `None` when there is nothing to paginate. A `current`
    /// outside `[1, total_pages]` is clamped first.
    pub fn compute(current: u32, total_pages: u32) -> Option<Self> {
        if total_pages <= 1 {
            return None;
        }
        let current = current.clamp(1, total_pages);
        let mut start = current.saturating_sub(MAX_VISIBLE_PAGES / 2).max(1);
        let end = start.saturating_add(MAX_VISIBLE_PAGES - 1).min(total_pages);
        if end - start + 1 < MAX_VISIBLE_PAGES {
            start = end.saturating_sub(MAX_VISIBLE_PAGES - 1).max(1);
        }
        Some(Self {
            current,
            total_pages,
            start,
            end,
            show_first: start > 1,
            leading_ellipsis: start > 2,
            trailing_ellipsis: end.saturating_add(1) < total_pages,
            show_last: end < total_pages,
        })
    }

    pub fn pages(&self) -> RangeInclusive<u32> {
        self.start..=self.end
    }

    pub fn has_previous(&self) -> bool {
        self.current > 1
    }

    pub fn has_next(&self) -> bool {
        self.current < self.total_pages
    }

    /// Text rendering, e.g. `‹ 1 … 8 9 [10] 11 12 … 20 ›`.
    pub fn render(&self) -> String {
        let mut parts = Vec::new();
        if self.has_previous() {
            parts.push("‹".to_string());
        }
        if self.show_first {
            parts.push("1".to_string());
        }
        if self.leading_ellipsis {
            parts.push("…".to_string());
        }
        for page in self.pages() {
            if page == self.current {
                parts.push(format!("[{page}]"));
            } else {
                parts.push(page.to_string());
            }
        }
        if self.trailing_ellipsis {
            parts.push("…".to_string());
        }
        if self.show_last {
            parts.push(self.total_pages.to_string());
        }
        if self.has_next() {
            parts.push("›".to_string());
        }
        parts.join(" ")
    }
}

/// One-based item positions shown on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRange {
    pub first: u32,
    pub last: u32,
    pub total: u32,
}

impl ItemRange {
    /// `None` for an empty result set or a page past the end.
    pub fn compute(page: u32, page_size: u32, total: u32) -> Option<Self> {
        if total == 0 || page == 0 || page_size == 0 {
            return None;
        }
        let first = (page - 1).checked_mul(page_size)?.checked_add(1)?;
        if first > total {
            return None;
        }
        let last = page.saturating_mul(page_size).min(total);
        Some(Self { first, last, total })
    }

    pub fn describe(&self) -> String {
        format!("Showing {} to {} of {} results", self.first, self.last, self.total)
    }
}
