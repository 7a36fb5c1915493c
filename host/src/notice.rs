//! The notice on screen, with success notices closing themselves.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use taskboard_core::notice::DEFAULT_AUTO_CLOSE;
use taskboard_core::{Notice, NoticeKind};
use tracing::debug;

use crate::scheduler::ScheduledCallback;

/// Holds at most one notice. Showing a success notice arms a timer that
/// closes it; a newer notice, `close` or dropping the board cancels that
/// timer, so it never clears a notice it did not open.
pub struct NoticeBoard {
    current: Arc<Mutex<Option<Notice>>>,
    timer: Mutex<Option<ScheduledCallback>>,
    delay: Duration,
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::new(DEFAULT_AUTO_CLOSE)
    }
}

impl NoticeBoard {
    pub fn new(delay: Duration) -> Self {
        Self {
            current: Arc::new(Mutex::new(None)),
            timer: Mutex::new(None),
            delay,
        }
    }

    /// Replace the current notice. Failures stay until closed.
    pub fn show(&self, notice: Notice) {
        let mut timer = self.timer.lock();
        if let Some(previous) = timer.take() {
            previous.cancel();
        }
        let auto_close = notice.kind == NoticeKind::Success;
        *self.current.lock() = Some(notice);
        if auto_close {
            let current = Arc::clone(&self.current);
            *timer = Some(ScheduledCallback::after(self.delay, move || {
                debug!("notice closed automatically");
                current.lock().take();
            }));
        }
    }

    pub fn current(&self) -> Option<Notice> {
        self.current.lock().clone()
    }

    pub fn close(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.cancel();
        }
        self.current.lock().take();
    }
}
