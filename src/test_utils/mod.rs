//! Test-only helpers: log init, scratch directories, synthetic sample images,
//! and a mock HTTP file server. Gated behind `#[cfg(test)]` in `lib.rs` since
//! nothing outside this crate's own test suite needs it.

pub mod image;
pub mod log;
pub mod temp;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub struct File {
    pub url_path: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl File {
    pub fn new(url_path: &str, mime: &str, bytes: &[u8]) -> Self {
        Self {
            url_path: url_path.to_owned(),
            mime: mime.to_owned(),
            bytes: bytes.to_owned(),
        }
    }
}

/// Spins up a mock HTTP server serving `files` by path, so downloader/manager
/// tests can exercise real network requests without external services.
pub async fn mock_file_server(files: Vec<File>) -> MockServer {
    let server = MockServer::start().await;
    for file in files {
        Mock::given(method("GET"))
            .and(path(file.url_path.clone()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(file.bytes)
                    .insert_header("content-type", file.mime.as_str()),
            )
            .mount(&server)
            .await;
    }
    server
}
