use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::cache::LayeredCache;
use crate::config::CacheConfig;
use crate::decode::{DefaultDecoder, Decoder};
use crate::downloader::Downloader;
use crate::http::{HttpClient, ReqwestHttpClient};

use super::{LoadSource, LoadUpdate, Manager, ManagerOptions};

fn tiny_png_bytes() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([5, 6, 7, 255]));
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn test_manager(root: std::path::PathBuf) -> Arc<Manager> {
    let decoder: Arc<dyn Decoder> = Arc::new(DefaultDecoder);
    let cache = Arc::new(LayeredCache::new(root, CacheConfig::default(), Arc::clone(&decoder)));
    let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::default());
    let downloader = Arc::new(Downloader::new(http, decoder, 4));
    Arc::new(Manager::new(cache, downloader))
}

async fn await_finish(mut rx: tokio::sync::mpsc::UnboundedReceiver<LoadUpdate>) -> LoadUpdate {
    loop {
        match rx.recv().await {
            Some(update @ LoadUpdate::Finished(_)) => return update,
            Some(_) => continue,
            None => panic!("channel closed before a Finished update arrived"),
        }
    }
}

#[tokio::test]
async fn s1_cache_miss_single_fetch_then_memory_hit() {
    let dir = tempdir().unwrap();
    let server = MockServer::start().await;
    let png = tiny_png_bytes();
    Mock::given(method("GET"))
        .and(path("/a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let manager = test_manager(dir.path().to_path_buf());
    let url = format!("{}/a.png", server.uri());

    let (_handle, rx) = manager.load(url.clone(), ManagerOptions::default());
    match await_finish(rx).await {
        LoadUpdate::Finished(Ok(result)) => {
            assert_eq!(result.source, LoadSource::Network);
            assert_eq!(result.image.dimensions(), (2, 2));
        }
        LoadUpdate::Finished(Err(err)) => panic!("expected success, got {err}"),
        _ => unreachable!(),
    }

    // S2: a second load for the same URL must hit memory, no new request.
    let (_handle2, rx2) = manager.load(url, ManagerOptions::default());
    match await_finish(rx2).await {
        LoadUpdate::Finished(Ok(result)) => assert_eq!(result.source, LoadSource::Memory),
        LoadUpdate::Finished(Err(err)) => panic!("expected success, got {err}"),
        _ => unreachable!(),
    }

    server.verify().await;
}

#[tokio::test]
async fn s3_cache_hit_disk_after_memory_is_cleared() {
    let dir = tempdir().unwrap();
    let server = MockServer::start().await;
    let png = tiny_png_bytes();
    Mock::given(method("GET"))
        .and(path("/b.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png))
        .mount(&server)
        .await;

    let manager = test_manager(dir.path().to_path_buf());
    let url = format!("{}/b.png", server.uri());

    let (_handle, rx) = manager.load(url.clone(), ManagerOptions::default());
    await_finish(rx).await;

    manager.cache().memory().clear();

    let (_handle2, rx2) = manager.load(url, ManagerOptions::default());
    match await_finish(rx2).await {
        LoadUpdate::Finished(Ok(result)) => assert_eq!(result.source, LoadSource::Disk),
        LoadUpdate::Finished(Err(err)) => panic!("expected success, got {err}"),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn s4_five_concurrent_loads_coalesce_into_one_fetch() {
    let dir = tempdir().unwrap();
    let server = MockServer::start().await;
    let png = tiny_png_bytes();
    Mock::given(method("GET"))
        .and(path("/c.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png).set_delay(Duration::from_millis(30)))
        .expect(1)
        .mount(&server)
        .await;

    let manager = test_manager(dir.path().to_path_buf());
    let url = format!("{}/c.png", server.uri());

    let mut handles = Vec::new();
    let mut receivers = Vec::new();
    for _ in 0..5 {
        let (handle, rx) = manager.load(url.clone(), ManagerOptions::default());
        handles.push(handle);
        receivers.push(rx);
    }

    let success_count = Arc::new(AtomicUsize::new(0));
    let mut joins = Vec::new();
    for rx in receivers {
        let success_count = Arc::clone(&success_count);
        joins.push(tokio::spawn(async move {
            if let LoadUpdate::Finished(Ok(_)) = await_finish(rx).await {
                success_count.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for join in joins {
        join.await.unwrap();
    }

    assert_eq!(success_count.load(Ordering::SeqCst), 5);
    server.verify().await;
}

#[tokio::test]
async fn s5_cancelling_the_only_subscriber_does_not_deliver_a_result() {
    let dir = tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(tiny_png_bytes()).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let manager = test_manager(dir.path().to_path_buf());
    let url = format!("{}/slow.png", server.uri());

    let (mut handle, mut rx) = manager.load(url, ManagerOptions::default());
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();

    let result = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    match result {
        Ok(Some(_)) => panic!("expected no further updates after cancellation"),
        Ok(None) => {}
        Err(_) => {}
    }
}

#[tokio::test]
async fn s6_blacklist_then_retry() {
    let dir = tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let manager = test_manager(dir.path().to_path_buf());
    let url = format!("{}/missing.png", server.uri());

    let (_handle, rx) = manager.load(url.clone(), ManagerOptions::default());
    match await_finish(rx).await {
        LoadUpdate::Finished(Err(_)) => {}
        _ => panic!("expected the 404 to surface as an error"),
    }

    // Without RetryFailed the blacklist short-circuits before any network call.
    let (_handle2, rx2) = manager.load(url.clone(), ManagerOptions::default());
    match await_finish(rx2).await {
        LoadUpdate::Finished(Err(err)) => {
            assert!(matches!(&*err, crate::error::Error::Blacklisted(_)));
        }
        _ => panic!("expected a blacklisted error"),
    }

    // With RetryFailed, it issues a network request again (and fails again).
    let (_handle3, rx3) = manager.load(url, ManagerOptions::default().with_retry_failed(true));
    match await_finish(rx3).await {
        LoadUpdate::Finished(Err(err)) => {
            assert!(!matches!(&*err, crate::error::Error::Blacklisted(_)));
        }
        _ => panic!("expected a non-blacklisted error from the retried fetch"),
    }
}

#[tokio::test]
async fn headers_filter_rewrites_the_global_header_map_per_url() {
    let dir = tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth.png"))
        .and(header("authorization", "Bearer seed-token"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(tiny_png_bytes()))
        .expect(1)
        .mount(&server)
        .await;

    let mut global_headers = http::HeaderMap::new();
    global_headers.insert("authorization", "Bearer seed-token".parse().unwrap());

    let decoder: Arc<dyn Decoder> = Arc::new(DefaultDecoder);
    let cache = Arc::new(LayeredCache::new(
        dir.path().to_path_buf(),
        CacheConfig::default(),
        Arc::clone(&decoder),
    ));
    let http_client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::default());
    let downloader = Arc::new(Downloader::new(http_client, decoder, 4));
    let manager = Arc::new(
        Manager::new(cache, downloader)
            .with_global_headers(global_headers)
            .with_headers_filter(|url, headers| {
                // Only attach the bearer token to our own host; real filters
                // would branch on url to decide per-destination credentials.
                assert!(url.contains("/auth.png"));
                headers
            }),
    );
    let url = format!("{}/auth.png", server.uri());

    let (_handle, rx) = manager.load(url, ManagerOptions::default());
    match await_finish(rx).await {
        LoadUpdate::Finished(Ok(_)) => {}
        LoadUpdate::Finished(Err(err)) => panic!("expected success, got {err}"),
        _ => unreachable!(),
    }
    server.verify().await;
}

#[tokio::test]
async fn refresh_cached_skips_refetch_while_still_fresh() {
    let dir = tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fresh.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(tiny_png_bytes())
                .insert_header("cache-control", "max-age=3600"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let manager = test_manager(dir.path().to_path_buf());
    let url = format!("{}/fresh.png", server.uri());

    let (_handle, rx) = manager.load(url.clone(), ManagerOptions::default().with_refresh_cached(true));
    await_finish(rx).await;

    // The stored freshness policy says this response is good for an hour, so
    // a second RefreshCached load must not issue a second request.
    let (_handle2, rx2) = manager.load(url, ManagerOptions::default().with_refresh_cached(true));
    match await_finish(rx2).await {
        LoadUpdate::Finished(Ok(result)) => assert_eq!(result.source, LoadSource::Memory),
        LoadUpdate::Finished(Err(err)) => panic!("expected success, got {err}"),
        _ => unreachable!(),
    }
    server.verify().await;
}

#[tokio::test]
async fn empty_url_fails_immediately_without_touching_cache_or_downloader() {
    let dir = tempdir().unwrap();
    let manager = test_manager(dir.path().to_path_buf());
    let (handle, rx) = manager.load("", ManagerOptions::default());
    assert!(handle.is_cancelled());
    match await_finish(rx).await {
        LoadUpdate::Finished(Err(err)) => {
            assert!(matches!(&*err, crate::error::Error::InvalidUrl(_)));
        }
        _ => panic!("expected an invalid-url error"),
    }
}
