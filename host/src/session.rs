//! The task list page: view state plus the store it reads from.
//!
//! Filter and paging changes can land while a list request is in flight.
//! `load` only commits a response whose key is still the view's active key,
//! so a slow reply for an old page never overwrites the page on screen.
//! Until the new key has data, `snapshot` keeps serving the last page that
//! was loaded, flagged as `previous`.

use std::sync::Arc;

use parking_lot::Mutex;
use taskboard_core::{
    ItemRange, ListView, PageSize, PageWindow, QueryData, QueryKey, StatusFilter, TasksPage, ViewError,
};
use tracing::debug;

use crate::store::{Observer, StoreError, TaskStore};
use crate::transport::Transport;

/// A loaded page together with the controls derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPage {
    pub view: ListView,
    pub tasks: TasksPage,
    pub window: Option<PageWindow>,
    pub range: Option<ItemRange>,
    /// A background refetch of this page is running.
    pub refreshing: bool,
    /// Data of an earlier view, shown while the active key loads. `view`
    /// then describes that earlier view.
    pub previous: bool,
}

impl ListPage {
    fn new(view: ListView, tasks: TasksPage, refreshing: bool) -> Self {
        Self {
            window: PageWindow::compute(view.page(), tasks.total_pages),
            range: ItemRange::compute(view.page(), view.page_size().get(), tasks.total),
            view,
            tasks,
            refreshing,
            previous: false,
        }
    }
}

pub struct ListSession<T> {
    store: TaskStore<T>,
    view: Arc<Mutex<ListView>>,
    observer: Mutex<Option<Observer<T>>>,
    last: Mutex<Option<ListPage>>,
}

impl<T: Transport> ListSession<T> {
    pub fn new(store: TaskStore<T>, view: ListView) -> Self {
        Self {
            store,
            view: Arc::new(Mutex::new(view)),
            observer: Mutex::new(None),
            last: Mutex::new(None),
        }
    }

    pub fn view(&self) -> ListView {
        *self.view.lock()
    }

    pub fn set_status_filter(&self, filter: StatusFilter) -> QueryKey {
        self.view.lock().set_status_filter(filter)
    }

    pub fn set_page_size(&self, size: PageSize) -> QueryKey {
        self.view.lock().set_page_size(size)
    }

    pub fn set_page(&self, page: u32) -> Result<QueryKey, ViewError> {
        self.view.lock().set_page(page)
    }

    /// Load the active page. Returns `Ok(None)` when the view moved on
    /// before the response arrived; the response is then dropped.
    ///
    /// A page past the end (after deletions, say) moves the view back to
    /// the last page and loads that instead.
    pub async fn load(&self) -> Result<Option<ListPage>, StoreError> {
        loop {
            let view = self.view();
            let key = view.active_key();
            self.watch(&key);

            let active = Arc::clone(&self.view);
            let entry = self.store.read_if(&key, move |key| active.lock().is_active(key)).await;
            if !self.view.lock().is_active(&key) {
                debug!(key = %key, "view changed during load, dropping page");
                return Ok(None);
            }

            let refreshing = entry.is_fetching;
            let tasks = match (entry.data.as_ref().and_then(|data| data.as_page()), entry.error) {
                (Some(page), _) => page.clone(),
                (None, Some(error)) => return Err(error.into()),
                (None, None) => return Err(StoreError::Unavailable(key)),
            };
            if let Some(clamped) = self.view.lock().clamp_to(tasks.total_pages) {
                debug!(key = %clamped, "page out of range, clamping");
                continue;
            }
            let page = ListPage::new(view, tasks, refreshing);
            *self.last.lock() = Some(page.clone());
            return Ok(Some(page));
        }
    }

    /// What to render right now, without waiting. Cached data for the
    /// active key wins; otherwise the last loaded page is kept on screen.
    pub fn snapshot(&self) -> Option<ListPage> {
        let view = self.view();
        let entry = self.store.peek(&view.active_key());
        let fetching = entry.as_ref().is_some_and(|entry| entry.is_fetching);
        if let Some(tasks) = entry.as_ref().and_then(|entry| entry.data.as_ref()).and_then(QueryData::as_page) {
            return Some(ListPage::new(view, tasks.clone(), fetching));
        }
        let mut page = self.last.lock().clone()?;
        page.previous = true;
        page.refreshing = fetching;
        Some(page)
    }

    /// Mark every list stale and refetch the one on screen.
    pub fn refresh(&self) -> Vec<QueryKey> {
        self.store.invalidate(QueryKey::is_task_list)
    }

    fn watch(&self, key: &QueryKey) {
        let mut observer = self.observer.lock();
        if observer.as_ref().is_some_and(|current| current.key() == key) {
            return;
        }
        *observer = Some(self.store.observe(key));
    }
}
