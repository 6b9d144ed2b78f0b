//! Transport-level freshness tracking backing `RefreshCached`, via
//! `http-cache-semantics`. This only answers "is the previously-stored
//! response still fresh enough to skip a re-fetch" — it does not attempt
//! conditional (`If-None-Match`/304) revalidation.

use std::time::SystemTime;

use http::{HeaderMap, Request, Response, StatusCode};
use http_cache_semantics::CachePolicy;

/// Builds a cache policy for a completed `GET` response, to be persisted
/// alongside the cached image so a later `RefreshCached` load can judge
/// freshness without re-fetching.
pub fn policy_for_response(url: &str, status: StatusCode, headers: &HeaderMap) -> Option<CachePolicy> {
    let request = Request::builder().method("GET").uri(url).body(()).ok()?;
    let mut response = Response::builder().status(status).body(()).ok()?;
    *response.headers_mut() = headers.clone();

    let (req_parts, _) = request.into_parts();
    let (res_parts, _) = response.into_parts();
    Some(CachePolicy::new(&req_parts, &res_parts))
}

pub fn is_fresh(policy: &CachePolicy) -> bool {
    !policy.is_stale(SystemTime::now())
}

pub fn encode(policy: &CachePolicy) -> Option<Vec<u8>> {
    bincode::serialize(policy).ok()
}

pub fn decode(bytes: &[u8]) -> Option<CachePolicy> {
    bincode::deserialize(bytes).ok()
}
