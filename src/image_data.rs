//! The in-memory representation of a decoded image.

use std::sync::Arc;

use crate::format::Format;

/// A decoded image held in the memory cache.
///
/// The decoded RGBA8 pixel buffer is kept compressed with a fast block codec
/// while it sits in memory cache, so a large cache of decoded images doesn't
/// multiply the resident set by the raw pixel size. The original encoded
/// bytes are kept alongside so formats like animated GIF round-trip losslessly
/// when written back out to disk instead of being re-encoded from the
/// (first-frame-only) decoded pixels.
#[derive(Clone)]
pub struct CachedImage {
    lz4_blob: Vec<u8>,
    dimensions: (u32, u32),
    format: Format,
    original_bytes: Option<Arc<[u8]>>,
}

impl CachedImage {
    pub fn from_rgba8(rgba: &[u8], dimensions: (u32, u32), format: Format) -> anyhow::Result<Self> {
        Self::from_rgba8_with_original(rgba, dimensions, format, None)
    }

    pub fn from_rgba8_with_original(
        rgba: &[u8],
        dimensions: (u32, u32),
        format: Format,
        original_bytes: Option<Arc<[u8]>>,
    ) -> anyhow::Result<Self> {
        let lz4_blob = crate::decode::lz4_compress(rgba)?;
        Ok(Self {
            lz4_blob,
            dimensions,
            format,
            original_bytes,
        })
    }

    /// Decompresses and returns the raw RGBA8 pixel buffer.
    pub fn to_rgba8(&self) -> Vec<u8> {
        crate::decode::lz4_decompress(&self.lz4_blob, self.rgba_byte_size())
            .expect("size matches and decompression is in-memory")
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn original_bytes(&self) -> Option<&[u8]> {
        self.original_bytes.as_deref()
    }

    /// The memory-cost unit this crate accounts against `max_memory_cost`:
    /// total pixel count, not byte count, so caches stay predictable across
    /// pixel formats.
    pub fn pixel_cost(&self) -> u64 {
        let (w, h) = self.dimensions;
        u64::from(w) * u64::from(h)
    }

    fn rgba_byte_size(&self) -> usize {
        let (w, h) = self.dimensions;
        w as usize * h as usize * 4
    }

    /// Bytes to persist to disk: the original encoded bytes if present,
    /// otherwise a re-encode of the decoded pixels.
    pub fn encode_for_disk(&self) -> anyhow::Result<(Vec<u8>, Format)> {
        if let Some(original) = &self.original_bytes {
            return Ok((original.to_vec(), self.format));
        }
        crate::decode::encode_rgba8(&self.to_rgba8(), self.dimensions)
    }
}

impl PartialEq for CachedImage {
    fn eq(&self, other: &Self) -> bool {
        self.dimensions == other.dimensions
            && self.format == other.format
            && self.to_rgba8() == other.to_rgba8()
    }
}

impl std::fmt::Debug for CachedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedImage")
            .field("dimensions", &self.dimensions)
            .field("format", &self.format)
            .field("lz4_blob_len", &self.lz4_blob.len())
            .field("has_original_bytes", &self.original_bytes.is_some())
            .finish()
    }
}
