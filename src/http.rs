//! The `HttpClient` capability and its default `reqwest`-backed implementation.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use http::HeaderMap;

use crate::error::{Error, TransportError};

/// Default per-request timeout, matching the rest of this crate's conventions.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

const DESCRIPTIVE_USER_AGENT: &str =
    concat!("remote-image-cache/", env!("CARGO_PKG_VERSION"));

pub struct HttpRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub allow_invalid_certs: bool,
    pub handle_cookies: bool,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
            allow_invalid_certs: false,
            handle_cookies: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, Error>> + Send>>;

pub struct HttpResponseStream {
    pub status: u16,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

/// Capability for fetching remote bytes, with a streamed body so the
/// downloader can emit progress and progressive partial decodes as bytes
/// arrive. Implemented by [`ReqwestHttpClient`]; hosts may substitute their
/// own transport.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponseStream, Error>;
}

/// The default [`HttpClient`], backed by `reqwest`. Keeps two long-lived
/// clients around (with and without a cookie jar) so `HandleCookies` can be
/// toggled per request without rebuilding a client on every fetch.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    client_with_cookies: reqwest::Client,
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        let build = |cookie_store: bool| {
            reqwest::Client::builder()
                .user_agent(DESCRIPTIVE_USER_AGENT)
                .cookie_store(cookie_store)
                .build()
                .expect("default reqwest client config is valid")
        };
        Self {
            client: build(false),
            client_with_cookies: build(true),
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponseStream, Error> {
        tracing::debug!(url = %request.url, "fetching remote image");

        let client = if request.allow_invalid_certs {
            reqwest::Client::builder()
                .user_agent(DESCRIPTIVE_USER_AGENT)
                .danger_accept_invalid_certs(true)
                .cookie_store(request.handle_cookies)
                .timeout(request.timeout)
                .build()
                .map_err(|err| Error::Transport(TransportError::Other(err.into())))?
        } else if request.handle_cookies {
            self.client_with_cookies.clone()
        } else {
            self.client.clone()
        };

        let resp = client
            .get(&request.url)
            .headers(request.headers)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Transport(TransportError::BadResponseStatus(
                status.as_u16(),
            )));
        }

        let headers = resp.headers().clone();
        let content_length = resp.content_length();
        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(classify_reqwest_error));

        Ok(HttpResponseStream {
            status: status.as_u16(),
            headers,
            content_length,
            body: Box::pin(body),
        })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Transport(TransportError::Timeout)
    } else if err.is_connect() {
        Error::Transport(TransportError::ConnectionLost)
    } else {
        Error::Transport(TransportError::Other(err.into()))
    }
}
