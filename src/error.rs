//! Crate-wide error taxonomy.
//!
//! Internal plumbing (disk walks, the decode adapter, config loading) uses
//! `anyhow::Result` with `.context(...)`. This module is the boundary where a
//! failure actually needs a classification: does it enter the failed-url set,
//! does it get surfaced to a completion callback, does it get logged and
//! swallowed. Hand-rolled `Display`/`Error` impls instead of a derive macro,
//! matching the rest of this crate's domain error enums.

use std::fmt;

/// The public error type returned from [`crate::manager::Manager::load`] and
/// the cache/downloader APIs it composes.
#[derive(Debug)]
pub enum Error {
    /// The URL was empty or failed to parse.
    InvalidUrl(String),
    /// The URL is in the failed-url set and the caller didn't ask to retry it.
    Blacklisted(String),
    /// A network-layer failure reported by the `HttpClient`.
    Transport(TransportError),
    /// The response body could not be decoded as an image.
    Decode(anyhow::Error),
    /// The operation was cancelled by its subscriber.
    Cancelled,
    /// A filesystem failure in the disk cache.
    DiskIo(std::io::Error),
    /// The `should_download` delegate hook declined the download and no
    /// cached image existed to fall back to.
    NoImageAvailable(String),
}

/// Subcategories of transport failure, since whether one of these enters the
/// failed-url set depends on which kind it is (see
/// [`Error::enters_failed_url_set`]).
#[derive(Debug)]
pub enum TransportError {
    Timeout,
    ConnectionLost,
    Offline,
    BadResponseStatus(u16),
    Tls(anyhow::Error),
    Other(anyhow::Error),
}

impl Error {
    /// Whether this error, if returned from a download attempt, should cause
    /// the URL to be memoized in the failed-url set.
    pub fn enters_failed_url_set(&self) -> bool {
        match self {
            Error::Transport(TransportError::Timeout)
            | Error::Transport(TransportError::ConnectionLost)
            | Error::Transport(TransportError::Offline)
            | Error::Cancelled => false,
            Error::Transport(_) | Error::Decode(_) => true,
            Error::InvalidUrl(_)
            | Error::Blacklisted(_)
            | Error::DiskIo(_)
            | Error::NoImageAvailable(_) => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidUrl(url) => write!(f, "invalid url: {url}"),
            Error::Blacklisted(url) => {
                write!(f, "url previously failed and is blacklisted: {url}")
            }
            Error::Transport(err) => write!(f, "transport error: {err}"),
            Error::Decode(err) => write!(f, "failed to decode image: {err}"),
            Error::Cancelled => write!(f, "operation was cancelled"),
            Error::DiskIo(err) => write!(f, "disk cache io error: {err}"),
            Error::NoImageAvailable(url) => {
                write!(f, "download declined and no cached image exists for: {url}")
            }
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "request timed out"),
            TransportError::ConnectionLost => write!(f, "connection lost"),
            TransportError::Offline => write!(f, "network is offline"),
            TransportError::BadResponseStatus(code) => write!(f, "bad response status: {code}"),
            TransportError::Tls(err) => write!(f, "tls error: {err}"),
            TransportError::Other(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Decode(err) => err.source(),
            Error::DiskIo(err) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::DiskIo(err)
    }
}
