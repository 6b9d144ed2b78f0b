//! Synthetic sample images for tests, generated in-process instead of relying
//! on bundled asset files.

use ::image::{ImageFormat, Rgb, Rgba};

/// A small opaque PNG (no alpha channel's worth of variation, but still a
/// valid RGBA8 source).
pub fn png_rgba8(width: u32, height: u32) -> Vec<u8> {
    let img = ::image::RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 31) as u8, (y * 17) as u8, 128, 255])
    });
    encode(&::image::DynamicImage::ImageRgba8(img), ImageFormat::Png)
}

/// A PNG with a genuinely varying alpha channel.
pub fn png_with_alpha(width: u32, height: u32) -> Vec<u8> {
    let img = ::image::RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 31) as u8, (y * 17) as u8, 128, (x + y) as u8])
    });
    encode(&::image::DynamicImage::ImageRgba8(img), ImageFormat::Png)
}

pub fn jpeg_rgb8(width: u32, height: u32) -> Vec<u8> {
    let img = ::image::RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 31) as u8, (y * 17) as u8, 128])
    });
    encode(&::image::DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
}

pub fn gif_rgba8(width: u32, height: u32) -> Vec<u8> {
    let img = ::image::RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 31) as u8, (y * 17) as u8, 128, 255])
    });
    encode(&::image::DynamicImage::ImageRgba8(img), ImageFormat::Gif)
}

pub fn tiff_rgb8(width: u32, height: u32) -> Vec<u8> {
    let img = ::image::RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 31) as u8, (y * 17) as u8, 128])
    });
    encode(&::image::DynamicImage::ImageRgb8(img), ImageFormat::Tiff)
}

fn encode(img: &::image::DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), format)
        .expect("encoding a freshly generated sample image never fails");
    bytes
}
