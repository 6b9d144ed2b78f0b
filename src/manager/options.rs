//! Per-call flags accepted by [`super::Manager::load`].

use http::HeaderMap;

use crate::downloader::{DownloaderOptions, Priority};

/// Manager-level request flags, translated into [`DownloaderOptions`] for the
/// underlying fetch and otherwise consulted directly by [`super::Manager::load`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ManagerOptions {
    /// Skip the `FailedUrlSet` check and issue the fetch regardless.
    pub retry_failed: bool,
    pub priority: Priority,
    /// Store only to the memory cache; never persist to disk.
    pub cache_memory_only: bool,
    pub progressive_download: bool,
    pub scale_down_large_images: bool,
    /// Deliver the cached image immediately, then still issue a fetch so the
    /// transport-layer cache can revalidate it.
    pub refresh_cached: bool,
    pub continue_in_background: bool,
    pub handle_cookies: bool,
    pub allow_invalid_ssl_certificates: bool,
    /// Advisory, observable by the caller only; this crate does not act on it.
    pub delay_placeholder: bool,
    /// Advisory, observable by the caller only; this crate does not act on it.
    pub avoid_auto_set_image: bool,
    /// Advisory, observable by the caller only; this crate does not act on it.
    pub transform_animated_image: bool,
}

impl ManagerOptions {
    pub fn with_retry_failed(mut self, retry_failed: bool) -> Self {
        self.retry_failed = retry_failed;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_refresh_cached(mut self, refresh_cached: bool) -> Self {
        self.refresh_cached = refresh_cached;
        self
    }

    pub fn with_cache_memory_only(mut self, cache_memory_only: bool) -> Self {
        self.cache_memory_only = cache_memory_only;
        self
    }

    pub fn with_progressive_download(mut self, progressive: bool) -> Self {
        self.progressive_download = progressive;
        if progressive {
            self.scale_down_large_images = false;
        }
        self
    }

    /// Translates these manager-level flags into [`DownloaderOptions`],
    /// folding in `headers` — the global header map plus whatever the
    /// Manager's `headers_filter` hook rewrote it to for this URL.
    pub(super) fn to_downloader_options(&self, headers: HeaderMap) -> DownloaderOptions {
        DownloaderOptions {
            priority: self.priority,
            headers,
            progressive: self.progressive_download,
            scale_down_large_images: self.scale_down_large_images && !self.progressive_download,
            use_transport_cache: self.refresh_cached,
            handle_cookies: self.handle_cookies,
            allow_invalid_ssl_certificates: self.allow_invalid_ssl_certificates,
            continue_in_background: self.continue_in_background,
        }
    }
}
