//! Remote API plumbing shared by the backends.

pub mod client;
pub mod content;
pub mod transport;

pub use client::{BodyCheck, DEFAULT_BACKOFF, MAX_BACKOFF, RateLimitPolicy, RateLimitedClient};
pub use content::ContentFetcher;
pub use transport::{
    ApiRequest, ApiResponse, FilePart, HttpTransport, Method, RequestBody, ReqwestTransport,
    USER_AGENT,
};
