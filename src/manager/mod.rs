//! Top-level `load(url)` orchestration: cache lookup, download coalescing,
//! and failed-url memoization, composed behind one async-friendly API.

pub mod failed_url_set;
pub mod handle;
pub mod options;
#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::sync::Arc;

use http::HeaderMap;
use once_cell::sync::OnceCell;
use tokio::sync::mpsc;

use crate::cache::{CacheSource, LayeredCache};
use crate::config::CacheConfig;
use crate::decode::{DefaultDecoder, Decoder};
use crate::downloader::operation::DownloadUpdate;
use crate::downloader::Downloader;
use crate::error::Error;
use crate::http::{HttpClient, ReqwestHttpClient};
use crate::http_cache;
use crate::image_data::CachedImage;
use crate::key::{default_key_filter, CacheKey, KeyFilter};

pub use handle::LoadHandle;
pub use options::ManagerOptions;

/// Where a delivered image ultimately came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Memory,
    Disk,
    Network,
}

impl From<CacheSource> for LoadSource {
    fn from(source: CacheSource) -> Self {
        match source {
            CacheSource::Memory => LoadSource::Memory,
            CacheSource::Disk => LoadSource::Disk,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadResult {
    pub image: CachedImage,
    pub source: LoadSource,
}

/// One event delivered on a [`Manager::load`] subscription.
pub enum LoadUpdate {
    Progress {
        received: u64,
        expected: Option<u64>,
    },
    /// Either a progressive partial decode, or the immediately-delivered
    /// cached image under `RefreshCached` while the revalidation fetch is
    /// still running. Never cached by the Manager itself.
    Partial(CachedImage),
    Finished(Result<LoadResult, Arc<Error>>),
}

type ShouldDownloadHook = dyn Fn(&str) -> bool + Send + Sync;
type TransformHook = dyn Fn(CachedImage, &str) -> CachedImage + Send + Sync;
/// Rewrites the global header map for a specific URL before a request is
/// built, e.g. to attach a per-host auth header.
type HeadersFilterHook = dyn Fn(&str, HeaderMap) -> HeaderMap + Send + Sync;

/// Composes a [`LayeredCache`] and a [`Downloader`] into the single
/// `load(url)` entry point described by this crate's top-level design.
pub struct Manager {
    cache: Arc<LayeredCache>,
    downloader: Arc<Downloader>,
    failed_urls: failed_url_set::FailedUrlSet,
    key_filter: Arc<KeyFilter>,
    should_download: Option<Arc<ShouldDownloadHook>>,
    transform: Option<Arc<TransformHook>>,
    global_headers: HeaderMap,
    headers_filter: Option<Arc<HeadersFilterHook>>,
}

static SHARED: OnceCell<Arc<Manager>> = OnceCell::new();

impl Manager {
    pub fn new(cache: Arc<LayeredCache>, downloader: Arc<Downloader>) -> Self {
        Self {
            cache,
            downloader,
            failed_urls: failed_url_set::FailedUrlSet::new(),
            key_filter: Arc::new(default_key_filter),
            should_download: None,
            transform: None,
            global_headers: HeaderMap::new(),
            headers_filter: None,
        }
    }

    pub fn with_key_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str) -> CacheKey + Send + Sync + 'static,
    {
        self.key_filter = Arc::new(filter);
        self
    }

    pub fn with_should_download<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.should_download = Some(Arc::new(hook));
        self
    }

    pub fn with_transform<F>(mut self, hook: F) -> Self
    where
        F: Fn(CachedImage, &str) -> CachedImage + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(hook));
        self
    }

    /// Sets the header map merged into every request before `headers_filter`
    /// (if any) gets a chance to rewrite it for a specific URL.
    pub fn with_global_headers(mut self, headers: HeaderMap) -> Self {
        self.global_headers = headers;
        self
    }

    pub fn with_headers_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str, HeaderMap) -> HeaderMap + Send + Sync + 'static,
    {
        self.headers_filter = Some(Arc::new(filter));
        self
    }

    pub fn cache(&self) -> &Arc<LayeredCache> {
        &self.cache
    }

    pub fn failed_urls(&self) -> &failed_url_set::FailedUrlSet {
        &self.failed_urls
    }

    fn resolve_headers(&self, url: &str) -> HeaderMap {
        let base = self.global_headers.clone();
        match &self.headers_filter {
            Some(filter) => filter(url, base),
            None => base,
        }
    }

    /// Persists a freshness policy derived from a completed fetch's response
    /// headers, so a later `RefreshCached` load can skip re-fetching while
    /// the response is still fresh. Best-effort: failures are logged, not
    /// surfaced, since the load itself already succeeded.
    async fn store_transport_policy(&self, key: &CacheKey, url: &str, headers: &HeaderMap) {
        let Some(policy) = http_cache::policy_for_response(url, http::StatusCode::OK, headers) else {
            return;
        };
        let Some(bytes) = http_cache::encode(&policy) else {
            return;
        };
        if let Err(err) = self.cache.disk().write(key, crate::cache::POLICY_EXT, &bytes).await {
            tracing::warn!(%key, error = %err, "failed to persist transport cache policy");
        }
    }

    /// Initializes the process-wide default `Manager`. Must be called before
    /// [`Manager::shared`]; never implicitly initialized on first use, so a
    /// host always chooses its own cache root and config.
    pub fn init_defaults(namespace_dir: PathBuf, config: CacheConfig) -> &'static Arc<Manager> {
        SHARED.get_or_init(|| {
            let decoder: Arc<dyn Decoder> = Arc::new(DefaultDecoder);
            let cache = Arc::new(LayeredCache::new(namespace_dir, config, Arc::clone(&decoder)));
            let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::default());
            let downloader = Arc::new(Downloader::new(http, decoder, 4));
            Arc::new(Manager::new(cache, downloader))
        })
    }

    /// The process-wide default `Manager`. Panics if [`Manager::init_defaults`]
    /// has not been called yet.
    pub fn shared() -> &'static Arc<Manager> {
        SHARED
            .get()
            .expect("Manager::init_defaults must be called before Manager::shared")
    }

    /// Loads `url`, consulting the cache first and falling back to a
    /// (possibly coalesced) download. Returns immediately; progress and the
    /// terminal result arrive on the returned channel.
    pub fn load(
        self: &Arc<Self>,
        url: impl Into<String>,
        options: ManagerOptions,
    ) -> (LoadHandle, mpsc::UnboundedReceiver<LoadUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let url = url.into();

        if url.trim().is_empty() {
            let _ = tx.send(LoadUpdate::Finished(Err(Arc::new(Error::InvalidUrl(url)))));
            return (LoadHandle::already_finished(), rx);
        }

        let key = (self.key_filter)(&url);
        if self.failed_urls.contains(&key) && !options.retry_failed {
            tracing::debug!(%key, "url is blacklisted, skipping load");
            let _ = tx.send(LoadUpdate::Finished(Err(Arc::new(Error::Blacklisted(url)))));
            return (LoadHandle::already_finished(), rx);
        }

        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            manager.run_load(url, key, options, tx).await;
        });

        (LoadHandle::new(task), rx)
    }

    async fn run_load(
        self: Arc<Self>,
        url: String,
        key: CacheKey,
        options: ManagerOptions,
        tx: mpsc::UnboundedSender<LoadUpdate>,
    ) {
        let cached = match self.cache.query(&key).await {
            Ok(hit) => hit,
            Err(err) => {
                tracing::warn!(%key, error = %err, "cache query failed, treating as a miss");
                None
            }
        };

        if let Some((image, source)) = &cached {
            if !options.refresh_cached {
                let _ = tx.send(LoadUpdate::Finished(Ok(LoadResult {
                    image: image.clone(),
                    source: (*source).into(),
                })));
                return;
            }

            // RefreshCached still honors the transport cache: if the stored
            // response's own freshness policy says it isn't stale yet, skip
            // the re-fetch entirely instead of hitting the network.
            let policy = self
                .cache
                .disk()
                .read(&key, crate::cache::POLICY_EXT)
                .await
                .ok()
                .flatten()
                .and_then(|bytes| http_cache::decode(&bytes));
            if matches!(&policy, Some(policy) if http_cache::is_fresh(policy)) {
                tracing::debug!(%key, "cached response still fresh, skipping refresh re-fetch");
                let _ = tx.send(LoadUpdate::Finished(Ok(LoadResult {
                    image: image.clone(),
                    source: (*source).into(),
                })));
                return;
            }

            let _ = tx.send(LoadUpdate::Partial(image.clone()));
        }

        if let Some(hook) = &self.should_download {
            if !hook(&url) {
                match cached {
                    Some((image, source)) => {
                        let _ = tx.send(LoadUpdate::Finished(Ok(LoadResult {
                            image,
                            source: source.into(),
                        })));
                    }
                    None => {
                        let _ = tx.send(LoadUpdate::Finished(Err(Arc::new(
                            Error::NoImageAvailable(url),
                        ))));
                    }
                }
                return;
            }
        }

        let headers = self.resolve_headers(&url);
        let downloader_options = options.to_downloader_options(headers);
        let (_token, mut rx) = self.downloader.subscribe(url.clone(), downloader_options);

        while let Some(update) = rx.recv().await {
            match update {
                DownloadUpdate::Progress { received, expected } => {
                    let _ = tx.send(LoadUpdate::Progress { received, expected });
                }
                DownloadUpdate::Partial(image) => {
                    let _ = tx.send(LoadUpdate::Partial(image));
                }
                DownloadUpdate::Finished(Ok(finished)) => {
                    let image = match &self.transform {
                        Some(transform) => transform(finished.image, &url),
                        None => finished.image,
                    };
                    if let Err(err) = self
                        .cache
                        .store(&key, image.clone(), !options.cache_memory_only)
                        .await
                    {
                        tracing::warn!(%key, error = %err, "failed to store downloaded image in cache");
                    }
                    if options.refresh_cached {
                        self.store_transport_policy(&key, &url, &finished.headers).await;
                    }
                    self.failed_urls.remove(&key);
                    let _ = tx.send(LoadUpdate::Finished(Ok(LoadResult {
                        image,
                        source: LoadSource::Network,
                    })));
                    return;
                }
                DownloadUpdate::Finished(Err(err)) => {
                    if err.enters_failed_url_set() {
                        self.failed_urls.insert(&key);
                    }
                    let _ = tx.send(LoadUpdate::Finished(Err(err)));
                    return;
                }
            }
        }
    }
}
