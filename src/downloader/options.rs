//! Per-request flags accepted by [`super::Downloader::subscribe`].

use http::HeaderMap;

/// Relative priority of a download within its [`super::Downloader`]'s queue.
/// High-priority requests always take precedence over low-priority ones,
/// regardless of the downloader's [`ExecutionOrder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    High,
    #[default]
    Default,
    Low,
}

/// Queueing discipline within a priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionOrder {
    #[default]
    Fifo,
    Lifo,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DownloaderOptions {
    pub priority: Priority,
    /// Global headers plus the per-URL `headers_filter` result, resolved by
    /// the caller (typically [`crate::manager::Manager`]) before the request
    /// reaches the [`super::Downloader`].
    pub headers: HeaderMap,
    /// Decode and emit partial images as bytes stream in.
    pub progressive: bool,
    /// Downscale very large images after a full (non-progressive) decode.
    pub scale_down_large_images: bool,
    /// Honor the transport-layer HTTP cache instead of bypassing it.
    pub use_transport_cache: bool,
    pub handle_cookies: bool,
    pub allow_invalid_ssl_certificates: bool,
    /// Ask the host runtime for an extended execution window; cancel if it
    /// expires before the download completes.
    pub continue_in_background: bool,
}

impl DownloaderOptions {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_progressive(mut self, progressive: bool) -> Self {
        // Progressive downloads disable the post-hoc scale-down pass: partial
        // decodes are emitted as-is.
        self.progressive = progressive;
        if progressive {
            self.scale_down_large_images = false;
        }
        self
    }
}
