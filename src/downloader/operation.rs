//! The per-URL download state machine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::HeaderMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::image_data::CachedImage;

use super::options::DownloaderOptions;
use super::token::DownloadToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Created,
    Running,
    Receiving,
    Completed,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Failed | OperationState::Cancelled
        )
    }
}

/// One event in an operation's lifecycle, broadcast to every subscriber.
#[derive(Clone)]
pub enum DownloadUpdate {
    Progress {
        received: u64,
        expected: Option<u64>,
    },
    /// A partial decode, only emitted when [`DownloaderOptions::progressive`]
    /// is set.
    Partial(CachedImage),
    Finished(Result<Finished, Arc<Error>>),
}

#[derive(Clone)]
pub struct Finished {
    pub image: CachedImage,
    pub bytes: Arc<[u8]>,
    /// Response headers from the fetch, so callers that honor transport-level
    /// cache policy (see [`crate::manager::Manager`]'s `RefreshCached`
    /// handling) can derive freshness from them.
    pub headers: HeaderMap,
}

struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<DownloadUpdate>,
}

struct Inner {
    state: OperationState,
    subscribers: Vec<Subscriber>,
    task: Option<JoinHandle<()>>,
}

/// Tracks one in-flight (or queued) download for a single URL. Multiple
/// [`DownloadToken`]s may be attached to the same operation when requests for
/// the same URL coalesce.
pub struct Operation {
    url: String,
    options: DownloaderOptions,
    inner: Mutex<Inner>,
    started: AtomicBool,
}

impl Operation {
    pub fn new(url: String, options: DownloaderOptions) -> Arc<Self> {
        Arc::new(Self {
            url,
            options,
            inner: Mutex::new(Inner {
                state: OperationState::Created,
                subscribers: Vec::new(),
                task: None,
            }),
            started: AtomicBool::new(false),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn options(&self) -> &DownloaderOptions {
        &self.options
    }

    pub fn state(&self) -> OperationState {
        self.inner.lock().state
    }

    pub fn subscribe(self: &Arc<Self>) -> (DownloadToken, mpsc::UnboundedReceiver<DownloadUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = DownloadToken::new(Arc::clone(self));
        self.inner.lock().subscribers.push(Subscriber {
            id: token.id(),
            sender: tx,
        });
        (token, rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Called once the dispatcher has handed this operation its execution
    /// task, so cancellation can abort it.
    pub(super) fn attach_task(&self, task: JoinHandle<()>) {
        let mut inner = self.inner.lock();
        inner.task = Some(task);
        inner.state = OperationState::Running;
    }

    pub(super) fn mark_started(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    pub fn set_receiving(&self) {
        let mut inner = self.inner.lock();
        if !inner.state.is_terminal() {
            inner.state = OperationState::Receiving;
        }
    }

    pub fn emit_progress(&self, received: u64, expected: Option<u64>) {
        self.broadcast(DownloadUpdate::Progress { received, expected });
    }

    pub fn emit_partial(&self, image: CachedImage) {
        if self.options.progressive {
            self.broadcast(DownloadUpdate::Partial(image));
        }
    }

    pub fn finish(&self, result: Result<Finished, Error>) {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return;
        }
        inner.state = match &result {
            Ok(_) => OperationState::Completed,
            Err(Error::Cancelled) => OperationState::Cancelled,
            Err(_) => OperationState::Failed,
        };
        drop(inner);
        self.broadcast(DownloadUpdate::Finished(result.map_err(Arc::new)));
    }

    fn broadcast(&self, update: DownloadUpdate) {
        let inner = self.inner.lock();
        for sub in &inner.subscribers {
            let _ = sub.sender.send(update.clone());
        }
    }

    /// Removes `subscriber_id`'s callback pair. If it was the last one, the
    /// operation transitions to `Cancelled` and its execution task is
    /// aborted.
    pub fn cancel_subscriber(&self, subscriber_id: u64) {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|s| s.id != subscriber_id);
        if inner.subscribers.is_empty() && !inner.state.is_terminal() {
            inner.state = OperationState::Cancelled;
            if let Some(task) = inner.task.take() {
                task.abort();
            }
        }
    }
}
