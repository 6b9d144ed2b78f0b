//! The caller-facing handle returned from [`super::Manager::load`].

use tokio::task::JoinHandle;

/// Wraps the task driving one `load()` call. Cancellation is idempotent and
/// cancels whichever phase (cache lookup or download) is currently active.
///
/// Unlike [`crate::downloader::DownloadToken`], dropping a `LoadHandle`
/// without calling `cancel()` does *not* abort the in-flight load — it
/// detaches, matching `tokio::task::JoinHandle`'s own drop semantics. Callers
/// that want cancel-on-drop should call `cancel()` explicitly (e.g. from
/// their own `Drop` impl).
pub struct LoadHandle {
    task: Option<JoinHandle<()>>,
    cancelled: bool,
}

impl LoadHandle {
    pub(super) fn new(task: JoinHandle<()>) -> Self {
        Self {
            task: Some(task),
            cancelled: false,
        }
    }

    /// A handle for a `load()` call that completed synchronously (e.g. an
    /// immediate `InvalidUrl`/`Blacklisted` error) without spawning a task.
    pub(super) fn already_finished() -> Self {
        Self {
            task: None,
            cancelled: true,
        }
    }

    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}
