//! Filesystem blob store: one file per cache entry, named by content-hash
//! digest of its key, with atomic write-then-rename and background
//! age/size-bounded expiration.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tempfile::NamedTempFile;

use crate::config::CacheConfig;
use crate::key::CacheKey;
use crate::metrics::{histogram, HistTag};

/// A single-directory, file-per-entry disk cache with an ordered list of
/// read-only fallback paths (for host-bundled pre-seeded images).
pub struct DiskCache {
    primary: PathBuf,
    fallback_paths: Vec<PathBuf>,
    max_age: Duration,
    max_size: u64,
    disable_cloud_backup: bool,
}

impl DiskCache {
    pub fn new(namespace_dir: PathBuf, config: &CacheConfig) -> Self {
        Self {
            primary: namespace_dir,
            fallback_paths: Vec::new(),
            max_age: config.max_cache_age(),
            max_size: config.max_cache_size_bytes,
            disable_cloud_backup: config.should_disable_cloud_backup,
        }
    }

    /// Registers an additional read-only search path, consulted after the
    /// primary path and after any previously-added fallback, in order.
    pub fn add_fallback_path(&mut self, path: PathBuf) {
        self.fallback_paths.push(path);
    }

    fn primary_path_for(&self, key: &CacheKey, ext: &str) -> PathBuf {
        self.primary.join(format!("{}.{ext}", key.digest_hex()))
    }

    /// Cheap existence check against the primary path only; a real `read`
    /// also searches the fallback paths.
    pub async fn contains(&self, key: &CacheKey, ext: &str) -> bool {
        tokio::fs::metadata(self.primary_path_for(key, ext))
            .await
            .is_ok()
    }

    pub async fn read(&self, key: &CacheKey, ext: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let primary = self.primary_path_for(key, ext);
        if let Some(bytes) = read_file(&primary).await? {
            touch(&primary).await;
            return Ok(Some(bytes));
        }

        for fallback_dir in &self.fallback_paths {
            let path = fallback_dir.join(format!("{}.{ext}", key.digest_hex()));
            if let Some(bytes) = read_file(&path).await? {
                return Ok(Some(bytes));
            }
        }

        Ok(None)
    }

    /// Writes `bytes` so that it is atomic from a concurrent reader's
    /// perspective: the content lands in a temp file in the same directory
    /// first, then is renamed into place.
    pub async fn write(&self, key: &CacheKey, ext: &str, bytes: &[u8]) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.primary).await?;
        let dest = self.primary_path_for(key, ext);
        let dir = self.primary.clone();
        let bytes = bytes.to_vec();
        let disable_cloud_backup = self.disable_cloud_backup;

        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            std::io::Write::write_all(&mut tmp, &bytes)?;
            tmp.as_file().sync_all()?;
            if disable_cloud_backup {
                apply_no_backup_hint(tmp.path());
            }
            tmp.persist(&dest)?;
            Ok(())
        })
        .await??;

        Ok(())
    }

    pub async fn remove(&self, key: &CacheKey, ext: &str) -> anyhow::Result<()> {
        let path = self.primary_path_for(key, ext);
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        match tokio::fs::remove_dir_all(&self.primary).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn total_size(&self) -> anyhow::Result<u64> {
        Ok(entries(&self.primary).await?.into_iter().map(|e| e.size).sum())
    }

    pub async fn file_count(&self) -> anyhow::Result<usize> {
        Ok(entries(&self.primary).await?.len())
    }

    /// Two-pass expiration:
    /// 1. Delete any file older than `max_age`.
    /// 2. If the remaining total still exceeds `max_size`, delete oldest-first
    ///    until the total is at most half of `max_size`.
    pub async fn expire(&self) -> anyhow::Result<ExpireReport> {
        let start = Instant::now();
        let mut report = ExpireReport::default();
        let mut remaining = entries(&self.primary).await?;
        let now = SystemTime::now();

        remaining.retain(|entry| {
            let age = now.duration_since(entry.mtime).unwrap_or(Duration::ZERO);
            let expired = age > self.max_age;
            if expired {
                report.aged_out.push(entry.path.clone());
            }
            !expired
        });

        for path in &report.aged_out {
            let _ = tokio::fs::remove_file(path).await;
        }

        if self.max_size > 0 {
            let mut total: u64 = remaining.iter().map(|e| e.size).sum();
            if total > self.max_size {
                remaining.sort_by_key(|e| e.mtime);
                let target = self.max_size / 2;
                for entry in remaining {
                    if total <= target {
                        break;
                    }
                    if tokio::fs::remove_file(&entry.path).await.is_ok() {
                        total -= entry.size;
                        report.size_evicted.push(entry.path);
                    }
                }
            }
        }

        histogram!(HistTag::DiskExpireDuration).record(start.elapsed());
        tracing::debug!(
            aged_out = report.aged_out.len(),
            size_evicted = report.size_evicted.len(),
            "disk cache expiration pass complete",
        );
        Ok(report)
    }
}

#[derive(Default, Debug)]
pub struct ExpireReport {
    pub aged_out: Vec<PathBuf>,
    pub size_evicted: Vec<PathBuf>,
}

struct Entry {
    path: PathBuf,
    size: u64,
    mtime: SystemTime,
}

async fn entries(dir: &Path) -> anyhow::Result<Vec<Entry>> {
    let mut out = Vec::new();
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(err) => return Err(err.into()),
    };

    while let Some(entry) = read_dir.next_entry().await? {
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        out.push(Entry {
            path: entry.path(),
            size: meta.len(),
            mtime: meta.modified()?,
        });
    }
    Ok(out)
}

async fn read_file(path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn touch(path: &Path) {
    let now = std::time::SystemTime::now();
    if let Ok(file) = tokio::fs::File::open(path).await {
        let _ = file.set_modified(now).await;
    }
}

#[cfg(unix)]
fn apply_no_backup_hint(_path: &Path) {
    // No portable POSIX equivalent to the "do not back up" file flag; this is
    // a platform-specific hint that hosts on Windows/macOS can override by
    // swapping in their own `Decoder`/`DiskCache` wiring.
}

#[cfg(not(unix))]
fn apply_no_backup_hint(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(max_age_secs: u64, max_size: u64) -> CacheConfig {
        CacheConfig {
            max_cache_age_secs: max_age_secs,
            max_cache_size_bytes: max_size,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().to_owned(), &CacheConfig::default());
        let key = CacheKey::new("https://example.com/a.png");
        cache.write(&key, "png", b"hello").await.unwrap();
        let bytes = cache.read(&key, "png").await.unwrap();
        assert_eq!(bytes, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn missing_entry_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().to_owned(), &CacheConfig::default());
        let key = CacheKey::new("nope");
        assert_eq!(cache.read(&key, "png").await.unwrap(), None);
    }

    #[tokio::test]
    async fn falls_back_to_read_only_path() {
        let primary = tempfile::tempdir().unwrap();
        let fallback = tempfile::tempdir().unwrap();
        let key = CacheKey::new("https://example.com/seed.png");
        let fallback_path = fallback.path().join(format!("{}.png", key.digest_hex()));
        tokio::fs::write(&fallback_path, b"seeded").await.unwrap();

        let mut cache = DiskCache::new(primary.path().to_owned(), &CacheConfig::default());
        cache.add_fallback_path(fallback.path().to_owned());

        let bytes = cache.read(&key, "png").await.unwrap();
        assert_eq!(bytes, Some(b"seeded".to_vec()));
    }

    #[tokio::test]
    async fn remove_deletes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().to_owned(), &CacheConfig::default());
        let key = CacheKey::new("a");
        cache.write(&key, "png", b"hello").await.unwrap();
        cache.remove(&key, "png").await.unwrap();
        assert_eq!(cache.read(&key, "png").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expire_deletes_entries_older_than_max_age() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().to_owned(), &config(0, 0));
        let key = CacheKey::new("old");
        cache.write(&key, "png", b"hello").await.unwrap();

        let report = cache.expire().await.unwrap();
        assert_eq!(report.aged_out.len(), 1);
        assert_eq!(cache.read(&key, "png").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expire_evicts_oldest_first_down_to_half_max_size() {
        let dir = tempfile::tempdir().unwrap();
        // max_age large enough to not trigger age-based expiry
        let cache = DiskCache::new(dir.path().to_owned(), &config(u64::MAX, 15));
        for (name, payload) in [("a", b"aaaaa"), ("b", b"bbbbb"), ("c", b"ccccc")] {
            cache
                .write(&CacheKey::new(name), "bin", payload)
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        cache.expire().await.unwrap();
        let total = cache.total_size().await.unwrap();
        assert!(total <= 15 / 2, "total {total} should be <= max_size/2");
        // the earliest-written entry should be the one evicted
        assert_eq!(cache.read(&CacheKey::new("a"), "bin").await.unwrap(), None);
    }
}
