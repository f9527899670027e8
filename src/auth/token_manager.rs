//! Access-token lifecycle: validity checks and de-duplicated refresh.
//!
//! At most one refresh request is outstanding at any time. Callers that
//! arrive while a refresh is running await the same shared future and
//! observe the same outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::jwt;
use super::session::SessionStore;
use super::types::RefreshTokenResponse;
use crate::clock::SharedClock;
use crate::config::TokenConfig;
use crate::http::error::ApiError;
use crate::http::retry::{execute_with_retry, RetryPolicy};
use crate::http::transport::{HttpRequest, HttpTransport, Method};

/// Refresh endpoint path.
pub const REFRESH_PATH: &str = "/auth/token/refresh/";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TokenError {
    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh token expired. Please login again.")]
    RefreshExpired,

    #[error("Session ended while the token was being refreshed")]
    SessionEnded,

    #[error(transparent)]
    Request(#[from] ApiError),
}

impl TokenError {
    /// Shape the error as the application-wide envelope.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            Self::Request(err) => err.clone(),
            Self::RefreshExpired => {
                let mut err = ApiError::new(self.to_string()).with_code("token_expired");
                err.status = Some(401);
                err
            }
            Self::NoRefreshToken => ApiError::new(self.to_string()).with_code("no_refresh_token"),
            Self::SessionEnded => ApiError::new(self.to_string()).with_code("session_ended"),
        }
    }
}

/// One attempt at exchanging a refresh token for a new access token.
#[async_trait]
pub trait RefreshApi: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshTokenResponse, ApiError>;
}

/// Posts directly on the transport: no bearer injection and no pipeline
/// retries, so the token manager's own policy is the only one applied.
pub struct TransportRefreshApi {
    transport: Arc<dyn HttpTransport>,
}

impl TransportRefreshApi {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl RefreshApi for TransportRefreshApi {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshTokenResponse, ApiError> {
        let request = HttpRequest::new(Method::Post, REFRESH_PATH)
            .with_body(json!({ "refresh": refresh_token }));
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(ApiError::from_response(response.status, &response.body));
        }
        serde_json::from_slice(&response.body)
            .map_err(|e| ApiError::new(format!("Invalid refresh response: {}", e)))
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<String, TokenError>>>;

pub struct TokenManager {
    session: Arc<SessionStore>,
    api: Arc<dyn RefreshApi>,
    clock: SharedClock,
    config: TokenConfig,
    in_flight: Mutex<Option<(u64, RefreshFuture)>>,
    generation: AtomicU64,
}

impl TokenManager {
    pub fn new(
        session: Arc<SessionStore>,
        api: Arc<dyn RefreshApi>,
        clock: SharedClock,
        config: TokenConfig,
    ) -> Self {
        Self {
            session,
            api,
            clock,
            config,
            in_flight: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn get_access_token(&self) -> Option<String> {
        self.session.get_access_token()
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.session.get_refresh_token()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Expiry of the current access token in Unix milliseconds.
    pub fn access_token_expiry_ms(&self) -> Option<i64> {
        self.get_access_token().and_then(|t| jwt::expires_at_ms(&t))
    }

    /// True iff an access token is present, decodes, and expires later than
    /// now plus the clock-skew leeway.
    pub fn is_token_valid(&self) -> bool {
        let Some(expires_at) = self.access_token_expiry_ms() else {
            return false;
        };
        let leeway = i64::try_from(self.config.clock_skew.as_millis()).unwrap_or(i64::MAX);
        expires_at
            .checked_sub(leeway)
            .is_some_and(|deadline| deadline > self.clock.now_ms())
    }

    /// Refresh the access token, joining any refresh already in flight.
    pub async fn refresh_access_token(&self) -> Result<String, TokenError> {
        let (generation, refresh) = {
            let mut slot = self
                .in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match slot.as_ref() {
                Some((generation, refresh)) => {
                    debug!(generation, "Joining in-flight token refresh");
                    (*generation, refresh.clone())
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let policy = RetryPolicy::new(
                        self.config.max_refresh_retries,
                        self.config.refresh_retry_delay,
                    );
                    let refresh =
                        perform_refresh(Arc::clone(&self.session), Arc::clone(&self.api), policy)
                            .boxed()
                            .shared();
                    *slot = Some((generation, refresh.clone()));
                    (generation, refresh)
                }
            }
        };

        let result = refresh.await;

        let mut slot = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.as_ref().is_some_and(|(g, _)| *g == generation) {
            *slot = None;
        }
        result
    }

    /// Current token if valid, otherwise one refresh cycle. Failure clears
    /// the session and yields `None`.
    pub async fn get_valid_access_token(&self) -> Option<String> {
        if self.is_token_valid() {
            return self.get_access_token();
        }

        match self.refresh_access_token().await {
            Ok(token) => Some(token),
            Err(e) => {
                error!("Failed to refresh token: {}", e);
                self.clear_tokens();
                None
            }
        }
    }

    pub fn clear_tokens(&self) {
        self.session.clear_auth();
    }
}

async fn perform_refresh(
    session: Arc<SessionStore>,
    api: Arc<dyn RefreshApi>,
    policy: RetryPolicy,
) -> Result<String, TokenError> {
    let refresh_token = session
        .get_refresh_token()
        .ok_or(TokenError::NoRefreshToken)?;

    let outcome = execute_with_retry(&policy, None, |_| {
        let api = Arc::clone(&api);
        let refresh_token = refresh_token.clone();
        async move { api.refresh(&refresh_token).await }
    })
    .await;

    match outcome {
        Ok(response) => {
            // A logout that raced the refresh wins.
            if session.get_refresh_token().as_deref() != Some(refresh_token.as_str()) {
                warn!("Session changed during token refresh; discarding new token");
                return Err(TokenError::SessionEnded);
            }
            let next_refresh = response.refresh.unwrap_or(refresh_token);
            session.set_tokens(response.access.clone(), next_refresh);
            info!("Access token refreshed");
            Ok(response.access)
        }
        Err(err) if err.status == Some(401) => {
            warn!("Refresh token rejected; clearing session");
            session.clear_auth();
            Err(TokenError::RefreshExpired)
        }
        Err(err) => Err(TokenError::Request(err)),
    }
}
