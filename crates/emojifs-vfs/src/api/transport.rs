//! HTTP transport seam.
//!
//! Backends speak in [`ApiRequest`]/[`ApiResponse`] values; the
//! [`HttpTransport`] trait turns them into real traffic. Production uses
//! [`ReqwestTransport`]; tests script responses with `MockTransport`.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

use crate::vfs::{VfsError, VfsResult};

/// User-Agent sent with every request.
pub const USER_AGENT: &str = concat!(
    "emojifs/",
    env!("CARGO_PKG_VERSION"),
    " (+",
    env!("CARGO_PKG_REPOSITORY"),
    ")"
);

/// Default HTTP timeout.
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Delete,
}

/// A file attached to a multipart body.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: String,
    pub filename: String,
    pub mime: String,
    pub data: Bytes,
}

/// Request body.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
    Multipart {
        fields: Vec<(String, String)>,
        file: FilePart,
    },
}

/// One HTTP request. Cheap to clone, so retries can re-send it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::Head, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a query parameter, replacing any previous value for `name`.
    pub fn with_query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        let name = name.into();
        self.query.retain(|(k, _)| *k != name);
        self.query.push((name, value.to_string()));
        self
    }

    /// URL-encoded form body.
    pub fn with_form<K: Into<String>, V: Into<String>>(
        mut self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.body = RequestBody::Form(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// JSON body.
    pub fn with_json(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    /// Multipart body with text fields and one file.
    pub fn with_multipart<K: Into<String>, V: Into<String>>(
        mut self,
        fields: impl IntoIterator<Item = (K, V)>,
        file: FilePart,
    ) -> Self {
        self.body = RequestBody::Multipart {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            file,
        };
        self
    }

    /// Look up a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// One HTTP response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Header names are lowercase.
    headers: HashMap<String, String>,
    pub body: Bytes,
}

impl ApiResponse {
    /// Create a response with no headers.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// 200 with a JSON body.
    pub fn json_ok(value: serde_json::Value) -> Self {
        Self::new(200, value.to_string())
    }

    /// Add a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Look up a header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    /// Body as (lossy) text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> VfsResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| VfsError::other(format!("malformed response body: {}", e)))
    }
}

/// Sends requests somewhere.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> VfsResult<ApiResponse>;
}

/// Transport backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> VfsResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(VfsError::transport)?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> VfsResult<ApiResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };
        tracing::trace!(method = ?request.method, url = %request.url, "http request");

        let mut builder = self.http.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Form(pairs) => builder.form(&pairs),
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart { fields, file } => {
                let part = reqwest::multipart::Part::bytes(file.data.to_vec())
                    .file_name(file.filename)
                    .mime_str(&file.mime)
                    .map_err(VfsError::transport)?;
                let form = fields
                    .into_iter()
                    .fold(reqwest::multipart::Form::new(), |form, (k, v)| form.text(k, v))
                    .part(file.field, part);
                builder.multipart(form)
            }
        };

        let response = builder.send().await.map_err(VfsError::transport)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(VfsError::transport)?;
        tracing::trace!(status, bytes = body.len(), "http response");

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

/// Scripted transport for tests.
#[cfg(any(test, feature = "test-mock"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct Route {
        method: Method,
        url_suffix: String,
        responses: VecDeque<ApiResponse>,
    }

    /// Answers requests from per-route response queues.
    ///
    /// Routes match on method and URL suffix (query excluded). Queued
    /// responses are consumed in order; the last one repeats forever.
    /// Unrouted requests get a 404.
    #[derive(Default)]
    pub struct MockTransport {
        routes: Mutex<Vec<Route>>,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a response for `method` requests whose URL ends with `url_suffix`.
        pub fn on(&self, method: Method, url_suffix: &str, response: ApiResponse) -> &Self {
            let mut routes = self.routes.lock();
            match routes
                .iter_mut()
                .find(|r| r.method == method && r.url_suffix == url_suffix)
            {
                Some(route) => route.responses.push_back(response),
                None => routes.push(Route {
                    method,
                    url_suffix: url_suffix.to_string(),
                    responses: VecDeque::from([response]),
                }),
            }
            self
        }

        /// Every request seen so far.
        pub fn requests(&self) -> Vec<ApiRequest> {
            self.requests.lock().clone()
        }

        /// Number of requests seen for a route.
        pub fn count(&self, method: Method, url_suffix: &str) -> usize {
            self.requests
                .lock()
                .iter()
                .filter(|r| r.method == method && r.url.ends_with(url_suffix))
                .count()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn send(&self, request: ApiRequest) -> VfsResult<ApiResponse> {
            self.requests.lock().push(request.clone());
            let mut routes = self.routes.lock();
            let route = routes
                .iter_mut()
                .find(|r| r.method == request.method && request.url.ends_with(&r.url_suffix));
            let Some(route) = route else {
                return Ok(ApiResponse::new(404, format!("no route for {}", request.url)));
            };
            let response = if route.responses.len() > 1 {
                route.responses.pop_front()
            } else {
                route.responses.front().cloned()
            };
            Ok(response.unwrap_or_else(|| ApiResponse::new(404, "exhausted")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;

    #[test]
    fn test_user_agent() {
        assert!(USER_AGENT.starts_with("emojifs/"));
    }

    #[test]
    fn test_with_query_replaces() {
        let req = ApiRequest::get("https://x/api")
            .with_query("page", 1)
            .with_query("page", 2);
        assert_eq!(req.query.len(), 1);
        assert_eq!(req.query_param("page"), Some("2"));
    }

    #[test]
    fn test_response_helpers() {
        let resp = ApiResponse::new(429, "{}").with_header("Retry-After", "3");
        assert!(resp.is_rate_limited());
        assert!(!resp.is_success());
        assert_eq!(resp.header("retry-after"), Some("3"));
        assert_eq!(resp.header("RETRY-AFTER"), Some("3"));
    }

    #[tokio::test]
    async fn test_mock_queue_then_repeat() {
        let mock = MockTransport::new();
        mock.on(Method::Get, "/a", ApiResponse::new(500, "first"))
            .on(Method::Get, "/a", ApiResponse::new(200, "rest"));

        let mut bodies = Vec::new();
        for _ in 0..3 {
            bodies.push(mock.send(ApiRequest::get("http://h/a")).await.unwrap().text());
        }
        assert_eq!(bodies, vec!["first", "rest", "rest"]);
        assert_eq!(mock.count(Method::Get, "/a"), 3);

        let missing = mock.send(ApiRequest::post("http://h/a")).await.unwrap();
        assert_eq!(missing.status, 404);
    }
}
