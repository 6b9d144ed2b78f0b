//! The two-tier cache façade: a bounded [`memory::MemoryCache`] backed by an
//! unbounded-but-aged [`disk::DiskCache`], sharing one key space.

pub mod disk;
pub mod memory;
#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::CacheConfig;
use crate::decode::Decoder;
use crate::format::Format;
use crate::image_data::CachedImage;
use crate::key::CacheKey;

use disk::DiskCache;
use memory::MemoryCache;

/// Where a successful [`LayeredCache::query`] result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Memory,
    Disk,
}

/// On-disk entries are stored as `<original bytes><1-byte format tag>`. A
/// footer (rather than a header) is used so indexing the tag byte doesn't
/// require shifting the bulk of the image bytes first.
fn encode_blob(bytes: &[u8], format: Format) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 1);
    out.extend_from_slice(bytes);
    out.push(format_tag(format));
    out
}

fn decode_blob(blob: &[u8]) -> Option<(&[u8], Format)> {
    let (&tag, rest) = blob.split_last()?;
    Some((rest, format_from_tag(tag)))
}

fn format_tag(format: Format) -> u8 {
    match format {
        Format::Jpeg => 0,
        Format::Png => 1,
        Format::Gif => 2,
        Format::Tiff => 3,
        Format::Webp => 4,
        Format::Undefined => 255,
    }
}

fn format_from_tag(tag: u8) -> Format {
    match tag {
        0 => Format::Jpeg,
        1 => Format::Png,
        2 => Format::Gif,
        3 => Format::Tiff,
        4 => Format::Webp,
        _ => Format::Undefined,
    }
}

/// Every primary disk-cache entry uses this extension; format is recovered
/// from the stored blob's footer tag instead of the filename.
const PRIMARY_EXT: &str = "img";

/// Sidecar extension for the serialized transport-cache freshness policy a
/// `RefreshCached` load persists alongside an entry (see
/// [`crate::manager::Manager`] and [`crate::http_cache`]).
pub(crate) const POLICY_EXT: &str = "policy";

pub struct LayeredCache {
    memory: MemoryCache,
    disk: DiskCache,
    decoder: Arc<dyn Decoder>,
    config: CacheConfig,
}

impl LayeredCache {
    pub fn new(namespace_dir: PathBuf, config: CacheConfig, decoder: Arc<dyn Decoder>) -> Self {
        Self {
            memory: MemoryCache::new(&config),
            disk: DiskCache::new(namespace_dir, &config),
            decoder,
            config,
        }
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn disk(&self) -> &DiskCache {
        &self.disk
    }

    pub fn add_fallback_path(&mut self, path: PathBuf) {
        self.disk.add_fallback_path(path);
    }

    /// Memory hit completes without touching disk. Memory miss reads from
    /// disk, decodes, repopulates memory, and reports `CacheSource::Disk`.
    /// Absence on both layers returns `Ok(None)`.
    pub async fn query(&self, key: &CacheKey) -> anyhow::Result<Option<(CachedImage, CacheSource)>> {
        if let Some(image) = self.memory.get(key) {
            tracing::debug!(%key, "memory cache hit");
            return Ok(Some((image, CacheSource::Memory)));
        }

        let Some(blob) = self.disk.read(key, PRIMARY_EXT).await? else {
            tracing::debug!(%key, "cache miss");
            return Ok(None);
        };

        let Some((bytes, _format)) = decode_blob(&blob) else {
            tracing::warn!(%key, "corrupt disk cache entry, treating as a miss");
            return Ok(None);
        };

        let decoder = Arc::clone(&self.decoder);
        let scale_down = self.config.should_decompress_images;
        let bytes = bytes.to_vec();
        let image = tokio::task::spawn_blocking(move || decoder.decode(&bytes, scale_down)).await??;
        let image = if self.config.should_decompress_images {
            self.decoder.force_decode(image)
        } else {
            image
        };

        self.memory.put(key.clone(), image.clone());
        tracing::debug!(%key, "disk cache hit");
        Ok(Some((image, CacheSource::Disk)))
    }

    /// Always updates memory; when `to_disk` is set, also persists bytes to
    /// the disk layer (verbatim original bytes if available, else a re-encode
    /// of the decoded pixels).
    pub async fn store(
        &self,
        key: &CacheKey,
        image: CachedImage,
        to_disk: bool,
    ) -> anyhow::Result<()> {
        self.memory.put(key.clone(), image.clone());

        if to_disk {
            let (bytes, format) = image.encode_for_disk()?;
            let blob = encode_blob(&bytes, format);
            self.disk.write(key, PRIMARY_EXT, &blob).await?;
        }

        Ok(())
    }

    pub async fn remove(&self, key: &CacheKey) -> anyhow::Result<()> {
        self.memory.remove(key);
        self.disk.remove(key, PRIMARY_EXT).await?;
        self.disk.remove(key, POLICY_EXT).await?;
        Ok(())
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        self.memory.clear();
        self.disk.clear().await?;
        Ok(())
    }

    /// Runs the disk layer's age/size bounded expiration pass. Intended to be
    /// driven by a background interval task (see [`crate::manager::Manager`]).
    pub async fn expire(&self) -> anyhow::Result<disk::ExpireReport> {
        self.disk.expire().await
    }
}
