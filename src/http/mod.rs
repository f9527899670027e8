//! HTTP client pipeline.
//!
//! A request flows through [`ApiClient`], which resolves a bearer token,
//! dispatches through an [`HttpTransport`] and retries transient failures.
//! Every failure is surfaced as an [`ApiError`].

pub mod client;
pub mod error;
pub mod navigator;
pub mod pending;
pub mod retry;
pub mod transport;

pub use client::{ApiClient, ApiResponse};
pub use error::ApiError;
pub use navigator::{MemoryNavigator, Navigator};
pub use pending::{ApiRequestTracker, ApiRequestType};
pub use retry::RetryPolicy;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
