//! Rate-limit-aware API client.
//!
//! Remembers, per request target, the earliest time it may be called
//! again. Rate-limited responses are retried after sleeping; every other
//! failure is surfaced as [`VfsError::Upstream`] and not retried.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::transport::{ApiRequest, ApiResponse, HttpTransport};
use crate::vfs::{VfsError, VfsResult};

/// Backoff used when a rate-limited response carries no usable hint.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

/// Longest wait honored from a hint header.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// How a backend announces rate limits.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    /// Header carrying the backoff in (possibly fractional) seconds.
    pub hint_header: &'static str,
    /// Backoff when the header is missing or unparsable.
    pub default_backoff: Duration,
}

/// Extra success check applied to 2xx bodies (e.g. an `ok: false` envelope).
pub type BodyCheck = fn(&ApiResponse) -> VfsResult<()>;

/// HTTP client for one backend account.
///
/// Requests block while their target is inside a backoff window. Retries
/// are unbounded: the upstream always lifts the limit eventually, so a
/// rate-limited call is slow rather than failed.
pub struct RateLimitedClient {
    label: &'static str,
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    authorization: Option<String>,
    policy: RateLimitPolicy,
    body_check: Option<BodyCheck>,
    /// Request target → earliest time it may be retried.
    retry_after: Mutex<HashMap<String, Instant>>,
}

impl std::fmt::Debug for RateLimitedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedClient")
            .field("label", &self.label)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl RateLimitedClient {
    pub fn new(
        label: &'static str,
        transport: Arc<dyn HttpTransport>,
        base_url: impl Into<String>,
        policy: RateLimitPolicy,
    ) -> Self {
        Self {
            label,
            transport,
            base_url: base_url.into(),
            authorization: None,
            policy,
            body_check: None,
            retry_after: Mutex::new(HashMap::new()),
        }
    }

    /// Send `value` as the `Authorization` header on every request built here.
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    /// Reject 2xx responses that fail `check`.
    pub fn with_body_check(mut self, check: BodyCheck) -> Self {
        self.body_check = Some(check);
        self
    }

    /// Point subsequent requests at a different API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for an API endpoint.
    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn authorize(&self, request: ApiRequest) -> ApiRequest {
        match &self.authorization {
            Some(value) => request.with_header("Authorization", value.clone()),
            None => request,
        }
    }

    pub fn get(&self, endpoint: &str) -> ApiRequest {
        self.authorize(ApiRequest::get(self.url(endpoint)))
    }

    pub fn post(&self, endpoint: &str) -> ApiRequest {
        self.authorize(ApiRequest::post(self.url(endpoint)))
    }

    pub fn delete(&self, endpoint: &str) -> ApiRequest {
        self.authorize(ApiRequest::delete(self.url(endpoint)))
    }

    /// Issue a request, waiting out and retrying rate limits.
    pub async fn request(&self, request: ApiRequest) -> VfsResult<ApiResponse> {
        let target = request.url.clone();
        loop {
            self.wait_for(&target).await;

            let response = self.transport.send(request.clone()).await?;

            if response.is_rate_limited() {
                let backoff = self.backoff_hint(&response);
                let now = Instant::now();
                let deadline = now
                    .checked_add(backoff)
                    .or_else(|| now.checked_add(self.policy.default_backoff));
                if let Some(deadline) = deadline {
                    self.retry_after.lock().insert(target.clone(), deadline);
                }
                tracing::warn!(
                    api = self.label,
                    url = %target,
                    retry_in = ?backoff,
                    "rate limited; retrying"
                );
                continue;
            }

            if !response.is_success() {
                tracing::error!(
                    api = self.label,
                    method = ?request.method,
                    url = %target,
                    status = response.status,
                    "request failed"
                );
                return Err(VfsError::upstream(response.status, response.text()));
            }

            if let Some(check) = self.body_check {
                check(&response)?;
            }

            tracing::debug!(
                api = self.label,
                method = ?request.method,
                url = %target,
                status = response.status,
                body = %response.text(),
                "response"
            );
            return Ok(response);
        }
    }

    /// Issue a request and decode its JSON body.
    pub async fn request_json<T: DeserializeOwned>(&self, request: ApiRequest) -> VfsResult<T> {
        self.request(request).await?.json()
    }

    /// Fetch every page of a paginated listing.
    ///
    /// Pages are numbered from 1 and the server-reported `paging.pages`
    /// decides whether another page exists. A response without paging
    /// information is a single page.
    pub async fn request_all_pages<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        paged_key: &str,
    ) -> VfsResult<Vec<T>> {
        let mut items = Vec::new();
        let mut page: u64 = 1;
        loop {
            let body: Value = self
                .request_json(request.clone().with_query("page", page))
                .await?;

            let batch = body.get(paged_key).cloned().ok_or_else(|| {
                VfsError::other(format!("response is missing `{}`", paged_key))
            })?;
            let batch: Vec<T> = serde_json::from_value(batch)
                .map_err(|e| VfsError::other(format!("malformed `{}`: {}", paged_key, e)))?;
            items.extend(batch);

            let pages = body
                .pointer("/paging/pages")
                .and_then(Value::as_u64)
                .unwrap_or(page);
            let has_more = page < pages;
            if !has_more {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    async fn wait_for(&self, target: &str) {
        let deadline = self.retry_after.lock().get(target).copied();
        if let Some(deadline) = deadline {
            if deadline > Instant::now() {
                tracing::debug!(api = self.label, url = %target, "waiting out rate limit");
                tokio::time::sleep_until(deadline).await;
            }
        }
    }

    fn backoff_hint(&self, response: &ApiResponse) -> Duration {
        response
            .header(self.policy.hint_header)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .and_then(|secs| match Duration::try_from_secs_f64(secs) {
                Ok(backoff) => Some(backoff),
                // Finite but out of range: as long as we are willing to wait.
                Err(_) if secs.is_finite() && secs > 0.0 => Some(MAX_BACKOFF),
                Err(_) => None,
            })
            .map(|backoff| backoff.min(MAX_BACKOFF))
            .unwrap_or(self.policy.default_backoff)
    }
}
