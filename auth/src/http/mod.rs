//! HTTP client building with middleware.

mod client;
mod retry;

pub use client::{authorize, ClientBuilder, HttpClient, HttpClientConfig, FINGERPRINT_HEADER};
pub use retry::TransientRetryPolicy;
