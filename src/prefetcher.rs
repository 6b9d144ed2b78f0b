//! A thin driver over [`Manager`] for warming the cache ahead of need.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::downloader::Priority;
use crate::manager::{LoadHandle, Manager, ManagerOptions};

/// Issues low-priority [`Manager::load`] calls for a batch of URLs purely for
/// their caching side effect. Has no caching or decoding logic of its own —
/// the `Manager` it wraps does all the real work.
pub struct Prefetcher {
    manager: Arc<Manager>,
    in_flight: Mutex<Vec<LoadHandle>>,
}

impl Prefetcher {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self {
            manager,
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Starts a load for each URL with `LowPriority` and no observer; any
    /// previously tracked, still-running prefetches remain tracked too.
    pub fn prefetch(&self, urls: impl IntoIterator<Item = String>) {
        let options = ManagerOptions::default().with_priority(Priority::Low);
        let mut in_flight = self.in_flight.lock();
        for url in urls {
            let (handle, mut rx) = self.manager.load(url, options.clone());
            tokio::spawn(async move { while rx.recv().await.is_some() {} });
            in_flight.push(handle);
        }
    }

    /// Cancels every outstanding prefetch `LoadHandle`.
    pub fn stop(&self) {
        let mut in_flight = self.in_flight.lock();
        for handle in in_flight.iter_mut() {
            handle.cancel();
        }
        in_flight.clear();
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LayeredCache;
    use crate::config::CacheConfig;
    use crate::decode::{DefaultDecoder, Decoder};
    use crate::downloader::Downloader;
    use crate::http::{HttpClient, ReqwestHttpClient};

    fn test_manager(root: std::path::PathBuf) -> Arc<Manager> {
        let decoder: Arc<dyn Decoder> = Arc::new(DefaultDecoder);
        let cache = Arc::new(LayeredCache::new(root, CacheConfig::default(), Arc::clone(&decoder)));
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::default());
        let downloader = Arc::new(Downloader::new(http, decoder, 4));
        Arc::new(Manager::new(cache, downloader))
    }

    #[tokio::test]
    async fn stop_cancels_every_tracked_handle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path().to_path_buf());
        let prefetcher = Prefetcher::new(manager);

        prefetcher.prefetch(vec![
            "http://127.0.0.1:1/a.png".to_string(),
            "http://127.0.0.1:1/b.png".to_string(),
        ]);
        assert_eq!(prefetcher.in_flight_count(), 2);

        prefetcher.stop();
        assert_eq!(prefetcher.in_flight_count(), 0);
    }
}
