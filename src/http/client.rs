//! Request pipeline: bearer injection, retries, cancellation and
//! auth-failure handling around an [`HttpTransport`].

use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::ApiError;
use super::navigator::Navigator;
use super::retry::{execute_with_retry, RetryPolicy};
use super::transport::{HttpRequest, HttpResponse, HttpTransport, Method};
use crate::auth::token_manager::TokenManager;
use crate::config::Config;

/// Endpoints that are called without a bearer token.
pub const AUTH_ENDPOINTS: [&str; 6] = [
    "/auth/login/",
    "/auth/signup/",
    "/auth/password/reset/",
    "/auth/password/otp/",
    "/auth/token/refresh/",
    "/auth/token/verify/",
];

/// Whether `path` targets one of [`AUTH_ENDPOINTS`].
pub fn is_auth_endpoint(path: &str) -> bool {
    AUTH_ENDPOINTS.iter().any(|endpoint| path.contains(endpoint))
}

/// A decoded 2xx response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub data: T,
}

pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenManager>,
    navigator: Arc<dyn Navigator>,
    policy: RetryPolicy,
    login_path: String,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenManager>,
        navigator: Arc<dyn Navigator>,
        config: &Config,
    ) -> Self {
        Self {
            transport,
            tokens,
            navigator,
            policy: RetryPolicy::new(config.api.retry_attempts, config.api.retry_delay),
            login_path: config.login_path.clone(),
        }
    }

    pub fn token_manager(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, ApiError> {
        self.request(HttpRequest::new(Method::Get, path), None).await
    }

    pub async fn get_with_cancel<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse<T>, ApiError> {
        self.request(HttpRequest::new(Method::Get, path), Some(cancel))
            .await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(with_json(Method::Post, path, body)?, None).await
    }

    pub async fn post_with_cancel<T, B>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(with_json(Method::Post, path, body)?, Some(cancel))
            .await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(with_json(Method::Put, path, body)?, None).await
    }

    pub async fn put_with_cancel<T, B>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(with_json(Method::Put, path, body)?, Some(cancel))
            .await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(with_json(Method::Patch, path, body)?, None).await
    }

    pub async fn patch_with_cancel<T, B>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(with_json(Method::Patch, path, body)?, Some(cancel))
            .await
    }

    /// DELETE, optionally carrying a JSON body.
    pub async fn delete<T, B>(&self, path: &str, body: Option<&B>) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = match body {
            Some(body) => with_json(Method::Delete, path, body)?,
            None => HttpRequest::new(Method::Delete, path),
        };
        self.request(request, None).await
    }

    pub async fn delete_with_cancel<T, B>(
        &self,
        path: &str,
        body: Option<&B>,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = match body {
            Some(body) => with_json(Method::Delete, path, body)?,
            None => HttpRequest::new(Method::Delete, path),
        };
        self.request(request, Some(cancel)).await
    }

    /// Send `request` through the retry loop and decode the body.
    pub async fn request<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<ApiResponse<T>, ApiError> {
        let response = execute_with_retry(&self.policy, cancel, |attempt| {
            self.attempt(request.clone(), attempt, cancel)
        })
        .await?;
        decode(response)
    }

    async fn attempt(
        &self,
        request: HttpRequest,
        attempt: u32,
        cancel: Option<&CancellationToken>,
    ) -> Result<HttpResponse, ApiError> {
        let method = request.method;
        let path = request.path.clone();
        let started = Instant::now();

        let outcome = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(ApiError::cancelled()),
                    outcome = self.authorize_and_send(request, attempt) => outcome,
                }
            }
            None => self.authorize_and_send(request, attempt).await,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(response) if response.is_success() => {
                info!(
                    %method,
                    url = %path,
                    status = response.status,
                    duration_ms,
                    "Request completed"
                );
                Ok(response)
            }
            Ok(response) => {
                let err = ApiError::from_response(response.status, &response.body);
                error!(
                    %method,
                    url = %path,
                    status = response.status,
                    duration_ms,
                    "Request failed: {}",
                    err.message
                );
                self.on_error_status(&response, &path);
                Err(err)
            }
            Err(err) if err.is_cancelled() => {
                debug!(%method, url = %path, duration_ms, "Request canceled");
                Err(err)
            }
            Err(err) => {
                error!(
                    %method,
                    url = %path,
                    code = ?err.code,
                    duration_ms,
                    "Request failed: {}",
                    err.message
                );
                Err(err)
            }
        }
    }

    async fn authorize_and_send(
        &self,
        mut request: HttpRequest,
        attempt: u32,
    ) -> Result<HttpResponse, ApiError> {
        if !is_auth_endpoint(&request.path) {
            request.bearer = self.tokens.get_valid_access_token().await;
        }

        info!(
            method = %request.method,
            url = %request.path,
            attempt,
            authenticated = request.bearer.is_some(),
            "Request initiated"
        );
        self.transport.send(request).await
    }

    fn on_error_status(&self, response: &HttpResponse, path: &str) {
        match response.status {
            401 => {
                self.tokens.clear_tokens();
                warn!("Authentication failed, redirecting to login");
                if !self.navigator.current_path().contains(&self.login_path) {
                    self.navigator.navigate(&self.login_path);
                }
            }
            403 => warn!(url = %path, "Access forbidden"),
            429 => warn!(
                url = %path,
                retry_after = ?response.retry_after,
                "Rate limit exceeded"
            ),
            _ => {}
        }
    }
}

fn with_json<B: Serialize + ?Sized>(
    method: Method,
    path: &str,
    body: &B,
) -> Result<HttpRequest, ApiError> {
    let body = serde_json::to_value(body)
        .map_err(|e| ApiError::new(format!("Failed to encode request body: {}", e)))?;
    Ok(HttpRequest::new(method, path).with_body(body))
}

fn decode<T: DeserializeOwned>(response: HttpResponse) -> Result<ApiResponse<T>, ApiError> {
    let data = if response.body.is_empty() {
        serde_json::from_value(Value::Null)
    } else {
        serde_json::from_slice(&response.body)
    }
    .map_err(|e| {
        let mut err = ApiError::new(format!("Invalid response body: {}", e));
        err.status = Some(response.status);
        err
    })?;

    Ok(ApiResponse {
        status: response.status,
        data,
    })
}
