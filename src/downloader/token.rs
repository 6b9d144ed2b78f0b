//! Per-subscriber handle returned from [`super::Downloader::subscribe`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::operation::Operation;

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one subscriber's subscription to one [`Operation`]. Dropping or
/// explicitly cancelling the token removes its callback pair from the
/// operation; when the last token for an operation goes away the operation's
/// underlying transport task is cancelled too.
pub struct DownloadToken {
    id: u64,
    operation: Arc<Operation>,
    cancelled: bool,
}

impl DownloadToken {
    pub(super) fn new(operation: Arc<Operation>) -> Self {
        Self {
            id: NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed),
            operation,
            cancelled: false,
        }
    }

    pub(super) fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &str {
        self.operation.url()
    }

    /// Cancels this subscription. Idempotent.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.operation.cancel_subscriber(self.id);
    }
}

impl Drop for DownloadToken {
    fn drop(&mut self) {
        self.cancel();
    }
}
