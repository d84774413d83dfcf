//! Emoji content fetching.
//!
//! Image bytes and their lengths are cached by locator. Content never
//! changes under a given URL, so entries only leave the cache by eviction.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use moka::future::Cache;
use std::sync::Arc;

use super::transport::{ApiRequest, HttpTransport};
use crate::emoji::ContentLocator;
use crate::vfs::{VfsError, VfsResult};

const CONTENT_CAPACITY: u64 = 200;
const LENGTH_CAPACITY: u64 = 20_000;

/// Fetches emoji image bytes from http(s) or inline `data:` URLs.
pub struct ContentFetcher {
    transport: Arc<dyn HttpTransport>,
    content: Cache<String, Bytes>,
    lengths: Cache<String, u64>,
}

impl ContentFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            content: Cache::builder().max_capacity(CONTENT_CAPACITY).build(),
            lengths: Cache::builder().max_capacity(LENGTH_CAPACITY).build(),
        }
    }

    /// The full content behind `locator`.
    pub async fn bytes(&self, locator: &ContentLocator) -> VfsResult<Bytes> {
        self.content
            .try_get_with(locator.as_str().to_string(), self.fetch(locator))
            .await
            .map_err(|e| (*e).clone())
    }

    /// Content length without downloading, where the server allows it.
    pub async fn content_length(&self, locator: &ContentLocator) -> VfsResult<u64> {
        let key = locator.as_str().to_string();
        if let Some(content) = self.content.get(&key).await {
            return Ok(content.len() as u64);
        }
        self.lengths
            .try_get_with(key, self.head_length(locator))
            .await
            .map_err(|e| (*e).clone())
    }

    async fn fetch(&self, locator: &ContentLocator) -> VfsResult<Bytes> {
        if locator.is_data() {
            return decode_data_url(locator.as_str());
        }
        tracing::debug!(url = %locator.as_str(), "fetching content");
        let response = self
            .transport
            .send(ApiRequest::get(locator.as_str()))
            .await?;
        if !response.is_success() {
            return Err(VfsError::upstream(response.status, response.text()));
        }
        Ok(response.body)
    }

    async fn head_length(&self, locator: &ContentLocator) -> VfsResult<u64> {
        if locator.is_data() {
            return data_url_length(locator.as_str());
        }
        let response = self
            .transport
            .send(ApiRequest::head(locator.as_str()))
            .await?;
        let advertised = response
            .is_success()
            .then(|| response.header("content-length"))
            .flatten()
            .and_then(|v| v.trim().parse::<u64>().ok());
        match advertised {
            Some(len) => Ok(len),
            None => Ok(self.bytes(locator).await?.len() as u64),
        }
    }
}

/// Split a `data:` URL into (is-base64, payload).
fn split_data_url(url: &str) -> VfsResult<(bool, &str)> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| VfsError::invalid_argument("not a data: URL"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| VfsError::invalid_argument("data: URL has no payload"))?;
    Ok((meta.ends_with(";base64"), payload))
}

/// Decode the payload of a `data:` URL.
pub fn decode_data_url(url: &str) -> VfsResult<Bytes> {
    let (is_base64, payload) = split_data_url(url)?;
    if !is_base64 {
        return Ok(Bytes::copy_from_slice(payload.as_bytes()));
    }
    BASE64
        .decode(payload.trim())
        .map(Bytes::from)
        .map_err(|e| VfsError::invalid_argument(format!("bad base64 in data: URL: {}", e)))
}

/// Decoded length of a `data:` URL, computed without decoding.
pub fn data_url_length(url: &str) -> VfsResult<u64> {
    let (is_base64, payload) = split_data_url(url)?;
    if !is_base64 {
        return Ok(payload.len() as u64);
    }
    let payload = payload.trim();
    let padding = payload.bytes().rev().take_while(|b| *b == b'=').count();
    Ok((3 * payload.len() / 4).saturating_sub(padding) as u64)
}
