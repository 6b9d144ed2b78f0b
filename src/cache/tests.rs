use std::sync::Arc;

use super::*;
use crate::decode::DefaultDecoder;

fn tiny_png_bytes() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(3, 3, image::Rgba([10, 20, 30, 255]));
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn cache_in(dir: &std::path::Path) -> LayeredCache {
    LayeredCache::new(
        dir.to_owned(),
        CacheConfig::default(),
        Arc::new(DefaultDecoder),
    )
}

#[tokio::test]
async fn miss_then_store_then_memory_hit() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_in(dir.path());
    let key = CacheKey::new("https://example.com/a.png");

    assert!(cache.query(&key).await.unwrap().is_none());

    let decoder = DefaultDecoder;
    let image = decoder.decode(&tiny_png_bytes(), false).unwrap();
    cache.store(&key, image.clone(), true).await.unwrap();

    let (hit, source) = cache.query(&key).await.unwrap().unwrap();
    assert_eq!(source, CacheSource::Memory);
    assert_eq!(hit, image);
}

#[tokio::test]
async fn disk_hit_repopulates_memory() {
    let dir = tempfile::tempdir().unwrap();
    let key = CacheKey::new("https://example.com/b.png");

    let decoder = DefaultDecoder;
    let image = decoder.decode(&tiny_png_bytes(), false).unwrap();
    {
        let writer_cache = cache_in(dir.path());
        writer_cache.store(&key, image.clone(), true).await.unwrap();
    }

    // Fresh cache instance: memory is empty, so this must come from disk.
    let reader_cache = cache_in(dir.path());
    let (hit, source) = reader_cache.query(&key).await.unwrap().unwrap();
    assert_eq!(source, CacheSource::Disk);
    assert_eq!(hit, image);

    // And now it's promoted into memory.
    let (hit_again, source_again) = reader_cache.query(&key).await.unwrap().unwrap();
    assert_eq!(source_again, CacheSource::Memory);
    assert_eq!(hit_again, image);
}

#[tokio::test]
async fn memory_only_store_never_hits_disk() {
    let dir = tempfile::tempdir().unwrap();
    let key = CacheKey::new("https://example.com/c.png");

    let decoder = DefaultDecoder;
    let image = decoder.decode(&tiny_png_bytes(), false).unwrap();
    {
        let writer_cache = cache_in(dir.path());
        writer_cache.store(&key, image, false).await.unwrap();
    }

    let reader_cache = cache_in(dir.path());
    assert!(reader_cache.query(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn remove_clears_both_layers() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_in(dir.path());
    let key = CacheKey::new("https://example.com/d.png");

    let decoder = DefaultDecoder;
    let image = decoder.decode(&tiny_png_bytes(), false).unwrap();
    cache.store(&key, image, true).await.unwrap();
    cache.remove(&key).await.unwrap();

    assert!(cache.query(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn corrupt_disk_entry_is_treated_as_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let key = CacheKey::new("https://example.com/e.png");

    {
        let cache = cache_in(dir.path());
        let decoder = DefaultDecoder;
        let image = decoder.decode(&tiny_png_bytes(), false).unwrap();
        cache.store(&key, image, true).await.unwrap();
    }

    // Truncate the stored blob down to nothing, simulating corruption.
    let path = dir.path().join(format!("{}.img", key.digest_hex()));
    tokio::fs::write(&path, b"").await.unwrap();

    let cache = cache_in(dir.path());
    assert!(cache.query(&key).await.unwrap().is_none());
}
