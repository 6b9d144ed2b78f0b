//! The `Decoder` capability and its default, in-process implementation.
//!
//! The default decoder turns encoded bytes into an 8-bit RGBA buffer and
//! compresses it down to an lz4 blob for storage in [`crate::image_data::CachedImage`].
//! Host applications that want a GPU-backed decoder implement [`Decoder`]
//! themselves.

use std::cmp;
use std::io::{self, Read};
use std::time::Instant;

use image::{ColorType, GenericImageView, ImageDecoder, ImageFormat};
use lz4_flex::frame::{BlockSize, FrameDecoder, FrameEncoder, FrameInfo};

use crate::format::{self, Format};
use crate::image_data::CachedImage;
use crate::metrics::{histogram, HistTag};

/// Memory budget (in raw RGBA bytes) above which [`Decoder::scale_down_large`]
/// tiles/downscales an image instead of keeping it at full resolution.
pub const SCALE_DOWN_BUDGET_BYTES: u64 = 60 * 1024 * 1024;

pub fn lz4_compress(rgba: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut frame_info = FrameInfo::new();
    frame_info.block_size = BlockSize::Max256KB;
    let mut enc = FrameEncoder::with_frame_info(frame_info, Vec::with_capacity(8 * 1024));
    io::copy(&mut io::Cursor::new(rgba), &mut enc)?;
    let mut blob = enc.finish()?;
    blob.shrink_to_fit();
    Ok(blob)
}

pub fn lz4_decompress(blob: &[u8], size: usize) -> anyhow::Result<Vec<u8>> {
    let mut dec = FrameDecoder::new(io::Cursor::new(blob));
    let mut out = Vec::with_capacity(size);
    io::copy(&mut dec, &mut out)?;
    out.truncate(size);
    Ok(out)
}

/// Encodes an RGBA8 buffer back to bytes for disk storage, choosing PNG when
/// the buffer has any non-opaque pixel and JPEG otherwise.
pub fn encode_rgba8(rgba: &[u8], dimensions: (u32, u32)) -> anyhow::Result<(Vec<u8>, Format)> {
    let has_alpha = rgba.chunks_exact(4).any(|px| px[3] != 255);
    let (w, h) = dimensions;
    let mut out = Vec::new();
    if has_alpha {
        let img: image::RgbaImage = image::ImageBuffer::from_raw(w, h, rgba.to_vec())
            .ok_or_else(|| anyhow::anyhow!("rgba buffer doesn't match dimensions"))?;
        img.write_to(&mut io::Cursor::new(&mut out), ImageFormat::Png)?;
        Ok((out, Format::Png))
    } else {
        let img: image::RgbaImage = image::ImageBuffer::from_raw(w, h, rgba.to_vec())
            .ok_or_else(|| anyhow::anyhow!("rgba buffer doesn't match dimensions"))?;
        image::DynamicImage::ImageRgba8(img)
            .to_rgb8()
            .write_to(&mut io::Cursor::new(&mut out), ImageFormat::Jpeg)?;
        Ok((out, Format::Jpeg))
    }
}

/// Capability for turning encoded bytes into [`CachedImage`]s. Implemented by
/// [`DefaultDecoder`]; hosts may substitute their own (e.g. a GPU-backed one).
pub trait Decoder: Send + Sync {
    fn decode(&self, bytes: &[u8], scale_down: bool) -> anyhow::Result<CachedImage>;

    /// Attempts to decode a partial, still-growing byte buffer. Returns
    /// `None` when not enough data has arrived yet to produce any image.
    fn decode_progressive(
        &self,
        accumulated: &[u8],
        expected_total: Option<u64>,
    ) -> Option<CachedImage>;

    /// Pre-rasterizes the image so on-screen presentation needs no further
    /// decode work. For this crate's own compressed-in-memory representation
    /// this is a no-op: the pixels are already decoded, just compressed.
    fn force_decode(&self, image: CachedImage) -> CachedImage {
        image
    }

    fn scale_down_large(&self, image: CachedImage) -> anyhow::Result<CachedImage>;
}

/// The default, `image`-crate-backed [`Decoder`].
#[derive(Default)]
pub struct DefaultDecoder;

impl Decoder for DefaultDecoder {
    fn decode(&self, bytes: &[u8], scale_down: bool) -> anyhow::Result<CachedImage> {
        let detected = format::detect_format(bytes);
        let (rgba, dimensions) = decode_and_compress_to_rgba(bytes)?;
        let image = CachedImage::from_rgba8_with_original(
            &rgba,
            dimensions,
            detected,
            Some(bytes.to_vec().into()),
        )?;
        if scale_down {
            self.scale_down_large(image)
        } else {
            Ok(image)
        }
    }

    fn decode_progressive(
        &self,
        accumulated: &[u8],
        _expected_total: Option<u64>,
    ) -> Option<CachedImage> {
        let detected = format::detect_format(accumulated);
        if detected == Format::Undefined {
            return None;
        }
        let (rgba, dimensions) = decode_and_compress_to_rgba(accumulated).ok()?;
        CachedImage::from_rgba8(&rgba, dimensions, detected).ok()
    }

    fn scale_down_large(&self, image: CachedImage) -> anyhow::Result<CachedImage> {
        let (w, h) = image.dimensions();
        let raw_bytes = u64::from(w) * u64::from(h) * 4;
        if raw_bytes <= SCALE_DOWN_BUDGET_BYTES {
            return Ok(image);
        }

        let scale = (SCALE_DOWN_BUDGET_BYTES as f64 / raw_bytes as f64).sqrt();
        let new_w = ((w as f64) * scale).max(1.0) as u32;
        let new_h = ((h as f64) * scale).max(1.0) as u32;

        let rgba = image.to_rgba8();
        let buf: image::RgbaImage = image::ImageBuffer::from_raw(w, h, rgba)
            .ok_or_else(|| anyhow::anyhow!("rgba buffer doesn't match its own dimensions"))?;
        let resized = image::imageops::resize(
            &buf,
            new_w,
            new_h,
            image::imageops::FilterType::Triangle,
        );

        CachedImage::from_rgba8(resized.as_raw(), (new_w, new_h), image.format())
    }
}

/// Decodes `contents` to a raw RGBA8 buffer, streaming for PNG/JPEG where
/// possible and falling back to `image::load_from_memory` otherwise.
fn decode_and_compress_to_rgba(contents: &[u8]) -> anyhow::Result<(Vec<u8>, (u32, u32))> {
    let start = Instant::now();
    let result = decode_and_compress_to_rgba_inner(contents);
    histogram!(HistTag::DecodeDuration).record(start.elapsed());
    result
}

fn decode_and_compress_to_rgba_inner(contents: &[u8]) -> anyhow::Result<(Vec<u8>, (u32, u32))> {
    let maybe_streamed = match image::guess_format(contents) {
        Ok(ImageFormat::Png) => {
            let dec = image::codecs::png::PngDecoder::new(io::Cursor::new(contents))?;
            stream_decode(dec)
        }
        Ok(ImageFormat::Jpeg) => {
            let dec = image::codecs::jpeg::JpegDecoder::new(io::Cursor::new(contents))?;
            stream_decode(dec)
        }
        _ => None,
    };

    match maybe_streamed {
        Some(streamed) => Ok(streamed),
        None => fallback_decode(contents),
    }
}

fn stream_decode<Dec>(dec: Dec) -> Option<(Vec<u8>, (u32, u32))>
where
    Dec: ImageDecoder,
{
    let total_size = dec.total_bytes();
    let dimensions = dec.dimensions();
    let start = Instant::now();

    let mut adapter = Rgba8Adapter::new(dec)?;
    let mut raw = Vec::with_capacity(total_size as usize);
    adapter.read_to_end(&mut raw).ok()?;
    tracing::debug!(
        bytes = raw.len(),
        elapsed = ?start.elapsed(),
        "streaming decode to rgba8",
    );
    Some((raw, dimensions))
}

fn fallback_decode(contents: &[u8]) -> anyhow::Result<(Vec<u8>, (u32, u32))> {
    let image = image::load_from_memory(contents)?;
    let dimensions = image.dimensions();
    let rgba = image.into_rgba8().into_raw();
    Ok((rgba, dimensions))
}

/// Streaming RGB8 -> RGBA8 adapter. Already-RGBA8 decoders are passed through
/// untouched; RGB8 decoders get a synthesized `u8::MAX` alpha channel woven in
/// as the bytes stream by, so decoding never needs the whole image resident
/// at once just to add an alpha channel.
enum Rgba8Adapter {
    Rgba8(Box<dyn Read>),
    Rgb8 {
        source: Box<dyn Read>,
        scratch: Vec<u8>,
    },
}

impl Rgba8Adapter {
    fn new<Dec: ImageDecoder>(dec: Dec) -> Option<Self> {
        let adapter = match dec.color_type() {
            ColorType::Rgba8 => Self::Rgba8(Box::new(dec.into_reader().ok()?)),
            ColorType::Rgb8 => Self::Rgb8 {
                source: Box::new(dec.into_reader().ok()?),
                scratch: Vec::new(),
            },
            _ => return None,
        };
        Some(adapter)
    }
}

impl Read for Rgba8Adapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Rgba8(inner) => inner.read(buf),
            // [r1, g1, b1, r2, g2, b2, ...] => [r1, g1, b1, MAX, r2, g2, b2, MAX, ...]
            //
            // 1. Copy any left-over bytes from the scratch buffer into `buf`
            // 2. Refill the scratch buffer from the underlying source
            // 3. Walk the scratch buffer backwards, shifting each pixel into its
            //    final 4-byte position and filling in the alpha byte
            // 4. Copy the transformed bytes into the remainder of `buf`
            // 5. Trim the scratch buffer down to whatever's left over
            Self::Rgb8 { source, scratch } => {
                if scratch.len() > buf.len() {
                    buf.copy_from_slice(&scratch[..buf.len()]);
                    scratch.copy_within(buf.len().., 0);
                    scratch.truncate(scratch.len() - buf.len());
                    return Ok(buf.len());
                }

                let (left, right) = buf.split_at_mut(scratch.len());
                left.copy_from_slice(scratch);

                let num_pixels = right.len() / 3 + 1;
                scratch.resize(num_pixels * 4, 0);
                let n = source.read(&mut scratch[..num_pixels * 3])?;
                if n == 0 {
                    scratch.clear();
                    return Ok(left.len());
                }

                let bytes_transformed = n * 4 / 3;
                let mut rgb_end = n - 1;
                let mut rgba_end = bytes_transformed - 1;
                loop {
                    scratch[rgba_end] = u8::MAX;
                    scratch[rgba_end - 1] = scratch[rgb_end];
                    scratch[rgba_end - 2] = scratch[rgb_end - 1];
                    scratch[rgba_end - 3] = scratch[rgb_end - 2];

                    rgba_end = match rgba_end.checked_sub(4) {
                        Some(n) => n,
                        None => break,
                    };
                    rgb_end -= 3;
                }

                right.copy_from_slice(&scratch[..right.len()]);
                scratch.copy_within(right.len().., 0);
                scratch.truncate(scratch.len() - right.len());

                Ok(left.len() + cmp::min(right.len(), bytes_transformed))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_png() -> Vec<u8> {
        let img = image::RgbaImage::from_fn(4, 4, |x, y| {
            image::Rgba([x as u8 * 60, y as u8 * 60, 128, 255])
        });
        let mut bytes = Vec::new();
        img.write_to(&mut io::Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn round_trips_through_lz4() {
        let rgba = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        let blob = lz4_compress(&rgba).unwrap();
        let out = lz4_decompress(&blob, rgba.len()).unwrap();
        assert_eq!(out, rgba);
    }

    #[test]
    fn default_decoder_decodes_png() {
        let png = tiny_png();
        let decoder = DefaultDecoder;
        let image = decoder.decode(&png, false).unwrap();
        assert_eq!(image.dimensions(), (4, 4));
        assert_eq!(image.format(), Format::Png);
    }

    #[test]
    fn scale_down_noop_under_budget() {
        let png = tiny_png();
        let decoder = DefaultDecoder;
        let image = decoder.decode(&png, false).unwrap();
        let scaled = decoder.scale_down_large(image.clone()).unwrap();
        assert_eq!(scaled.dimensions(), image.dimensions());
    }

    #[test]
    fn force_decode_is_identity_for_already_decoded_images() {
        let png = tiny_png();
        let decoder = DefaultDecoder;
        let image = decoder.decode(&png, false).unwrap();
        let forced = decoder.force_decode(image.clone());
        assert_eq!(forced, image);
    }
}
