//! Typed `/auth/...` endpoints and the login/logout flows built on them.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use super::session::SessionStore;
use super::token_manager::REFRESH_PATH;
use super::types::*;
use crate::http::client::ApiClient;
use crate::http::error::ApiError;
use crate::http::navigator::Navigator;
use crate::http::pending::{ApiRequestTracker, ApiRequestType};

/// Landing page after a successful login.
pub const HOME_PATH: &str = "/home";

/// Error code for a flow started while the same flow is still pending.
pub const CODE_DUPLICATE_REQUEST: &str = "DUPLICATE_REQUEST";

/// Thin typed wrappers; each returns the decoded body.
pub struct AuthApi {
    client: Arc<ApiClient>,
}

impl AuthApi {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    pub async fn refresh_token(
        &self,
        request: &RefreshTokenRequest,
    ) -> Result<RefreshTokenResponse, ApiError> {
        Ok(self.client.post(REFRESH_PATH, request).await?.data)
    }

    pub async fn verify_token(&self, request: &VerifyTokenRequest) -> Result<Value, ApiError> {
        Ok(self.client.post("/auth/token/verify/", request).await?.data)
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<TokenResponse, ApiError> {
        Ok(self.client.post("/auth/login/", request).await?.data)
    }

    pub async fn logout(&self, request: &LogoutRequest) -> Result<MessageResponse, ApiError> {
        Ok(self.client.post("/auth/logout/", request).await?.data)
    }

    pub async fn get_user(&self) -> Result<User, ApiError> {
        Ok(self.client.get("/auth/user/").await?.data)
    }

    pub async fn update_user(&self, request: &UserUpdateRequest) -> Result<User, ApiError> {
        Ok(self.client.patch("/auth/user/", request).await?.data)
    }

    pub async fn change_password(
        &self,
        request: &ChangePasswordRequest,
    ) -> Result<MessageResponse, ApiError> {
        Ok(self.client.put("/auth/password/change/", request).await?.data)
    }

    pub async fn request_password_reset(
        &self,
        request: &PasswordResetRequest,
    ) -> Result<MessageResponse, ApiError> {
        Ok(self.client.post("/auth/password/reset/", request).await?.data)
    }

    pub async fn confirm_password_reset(
        &self,
        request: &PasswordResetConfirmRequest,
    ) -> Result<MessageResponse, ApiError> {
        Ok(self
            .client
            .post("/auth/password/reset/confirm/", request)
            .await?
            .data)
    }

    pub async fn request_signup_email_otp(
        &self,
        request: &EmailOtpRequest,
    ) -> Result<MessageResponse, ApiError> {
        Ok(self
            .client
            .post("/auth/signup/email/otp/request/", request)
            .await?
            .data)
    }

    pub async fn verify_signup_otp(
        &self,
        request: &OtpVerifyRequest,
    ) -> Result<MessageResponse, ApiError> {
        Ok(self.client.post("/auth/signup/otp/verify/", request).await?.data)
    }

    pub async fn complete_signup(
        &self,
        request: &SignupCompleteRequest,
    ) -> Result<MessageResponse, ApiError> {
        Ok(self.client.post("/auth/signup/otp/complete/", request).await?.data)
    }

    pub async fn request_password_reset_otp(
        &self,
        request: &EmailOtpRequest,
    ) -> Result<MessageResponse, ApiError> {
        Ok(self.client.post("/auth/password/otp/request/", request).await?.data)
    }

    pub async fn verify_password_reset_otp(
        &self,
        request: &OtpVerifyRequest,
    ) -> Result<MessageResponse, ApiError> {
        Ok(self.client.post("/auth/password/otp/verify/", request).await?.data)
    }

    pub async fn complete_password_reset(
        &self,
        request: &PasswordResetOtpCompleteRequest,
    ) -> Result<MessageResponse, ApiError> {
        Ok(self.client.post("/auth/password/otp/reset/", request).await?.data)
    }

    pub async fn delete_account(
        &self,
        request: &DeleteAccountRequest,
    ) -> Result<MessageResponse, ApiError> {
        Ok(self
            .client
            .delete("/auth/delete/", Some(request))
            .await?
            .data)
    }
}

/// Login and logout as the user experiences them.
pub struct AuthService {
    api: AuthApi,
    session: Arc<SessionStore>,
    tracker: Arc<ApiRequestTracker>,
    navigator: Arc<dyn Navigator>,
    login_path: String,
}

impl AuthService {
    pub fn new(
        api: AuthApi,
        session: Arc<SessionStore>,
        tracker: Arc<ApiRequestTracker>,
        navigator: Arc<dyn Navigator>,
        login_path: impl Into<String>,
    ) -> Self {
        Self {
            api,
            session,
            tracker,
            navigator,
            login_path: login_path.into(),
        }
    }

    pub fn api(&self) -> &AuthApi {
        &self.api
    }

    /// Log in and populate the session. A second login while one is
    /// pending is rejected with [`CODE_DUPLICATE_REQUEST`].
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let Some(pending) = self.tracker.try_track(ApiRequestType::Login) else {
            return Err(ApiError::new("A login request is already in progress")
                .with_code(CODE_DUPLICATE_REQUEST));
        };

        let result = self
            .api
            .login(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await;
        drop(pending);

        let tokens = result?;
        let user = tokens.user.clone();
        self.session.login(&tokens, user.clone());
        info!(user = user.pk, "Logged in");
        self.navigator.navigate(HOME_PATH);
        Ok(user)
    }

    /// Best-effort server logout. The local session is always cleared and
    /// the client sent to the login page, whatever the server says.
    pub async fn logout(&self) {
        let Some(refresh) = self.session.get_refresh_token() else {
            self.session.logout();
            self.navigator.navigate(&self.login_path);
            return;
        };

        let pending = self.tracker.track(ApiRequestType::Logout);
        if let Err(e) = self.api.logout(&LogoutRequest { refresh }).await {
            warn!("Logout request failed, clearing session locally: {}", e);
        }
        drop(pending);

        self.session.logout();
        info!("Logged out");
        self.navigator.navigate(&self.login_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::test_tokens::token_expiring_at;
    use crate::auth::token_manager::test_support::ScriptedRefreshApi;
    use crate::auth::token_manager::TokenManager;
    use crate::clock::SystemClock;
    use crate::config::{Config, TokenConfig};
    use crate::http::navigator::MemoryNavigator;
    use crate::http::transport::test_support::ScriptedTransport;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        service: Arc<AuthService>,
        transport: Arc<ScriptedTransport>,
        session: Arc<SessionStore>,
        navigator: Arc<MemoryNavigator>,
    }

    fn harness(transport: ScriptedTransport) -> Harness {
        let transport = Arc::new(transport);
        let session = Arc::new(SessionStore::new());
        let tokens = Arc::new(TokenManager::new(
            session.clone(),
            Arc::new(ScriptedRefreshApi::new(Duration::ZERO)),
            Arc::new(SystemClock),
            TokenConfig::default(),
        ));
        let navigator = Arc::new(MemoryNavigator::new("/login"));
        let client = Arc::new(ApiClient::new(
            transport.clone(),
            tokens,
            navigator.clone(),
            &Config::new("http://localhost:8000"),
        ));
        let service = Arc::new(AuthService::new(
            AuthApi::new(client),
            session.clone(),
            Arc::new(ApiRequestTracker::new()),
            navigator.clone(),
            "/login",
        ));
        Harness {
            service,
            transport,
            session,
            navigator,
        }
    }

    fn login_body(access: &str) -> String {
        json!({
            "access": access,
            "refresh": "refresh-1",
            "user": {"pk": 7, "email": "kim@example.com", "name": "Kim"}
        })
        .to_string()
    }

    fn far_future_token() -> String {
        token_expiring_at(chrono::Utc::now().timestamp() + 3600)
    }

    #[tokio::test]
    async fn login_populates_session() {
        let h = harness(ScriptedTransport::new());
        let access = far_future_token();
        h.transport.push_status(200, &login_body(&access));

        let user = h.service.login("kim@example.com", "pw").await.unwrap();
        assert_eq!(user.pk, 7);
        assert!(h.session.is_authenticated());
        assert_eq!(h.session.get_access_token(), Some(access));
        assert_eq!(h.navigator.current_path(), HOME_PATH);

        let sent = h.transport.last_request().unwrap();
        assert_eq!(sent.path, "/auth/login/");
        assert_eq!(sent.bearer, None);
        assert_eq!(sent.body.unwrap()["email"], "kim@example.com");
    }

    #[tokio::test]
    async fn failed_login_leaves_session_empty() {
        let h = harness(ScriptedTransport::new());
        h.transport
            .push_status(400, r#"{"message":"Invalid credentials","code":"invalid_login"}"#);

        let err = h.service.login("kim@example.com", "bad").await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some("invalid_login"));
        assert!(!h.session.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_login_is_rejected() {
        let h = harness(ScriptedTransport::with_latency(Duration::from_millis(200)));
        h.transport.push_status(200, &login_body(&far_future_token()));

        let first = tokio::spawn({
            let service = h.service.clone();
            async move { service.login("kim@example.com", "pw").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = h.service.login("kim@example.com", "pw").await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some(CODE_DUPLICATE_REQUEST));
        assert!(first.await.unwrap().is_ok());
        assert_eq!(h.transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_login_does_not_block_the_next() {
        let h = harness(ScriptedTransport::with_latency(Duration::from_secs(5)));
        h.transport.always(Ok(crate::http::transport::test_support::response(
            200,
            &login_body(&far_future_token()),
        )));

        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            h.service.login("kim@example.com", "pw"),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(!h.service.tracker.is_type_pending(ApiRequestType::Login));

        let user = h.service.login("kim@example.com", "pw").await.unwrap();
        assert_eq!(user.pk, 7);
        assert!(h.session.is_authenticated());
    }

    #[tokio::test]
    async fn finished_flows_leave_no_tracked_requests() {
        let h = harness(ScriptedTransport::new());
        h.transport.push_status(200, &login_body(&far_future_token()));
        h.service.login("kim@example.com", "pw").await.unwrap();
        h.transport.push_status(200, r#"{"detail":"Logged out"}"#);
        h.service.logout().await;

        assert!(!h.service.tracker.is_type_pending(ApiRequestType::Login));
        assert!(!h.service.tracker.is_type_pending(ApiRequestType::Logout));
        assert_eq!(h.service.tracker.tracked_count(), 0);
    }

    #[tokio::test]
    async fn logout_clears_locally_even_when_server_fails() {
        let h = harness(ScriptedTransport::new());
        h.transport.push_status(200, &login_body(&far_future_token()));
        h.service.login("kim@example.com", "pw").await.unwrap();

        h.transport.push_status(400, r#"{"detail":"Token is blacklisted"}"#);
        h.service.logout().await;

        assert!(!h.session.is_authenticated());
        assert_eq!(h.session.get_refresh_token(), None);
        assert_eq!(h.navigator.current_path(), "/login");
        let sent = h.transport.last_request().unwrap();
        assert_eq!(sent.path, "/auth/logout/");
        assert_eq!(sent.body.unwrap()["refresh"], "refresh-1");
    }

    #[tokio::test]
    async fn logout_without_refresh_token_skips_server() {
        let h = harness(ScriptedTransport::new());
        h.service.logout().await;
        assert_eq!(h.transport.call_count(), 0);
        assert_eq!(h.navigator.current_path(), "/login");
    }

    #[tokio::test]
    async fn delete_account_sends_body() {
        let h = harness(ScriptedTransport::new());
        h.transport.push_status(200, r#"{"detail":"Account deleted"}"#);

        let res = h
            .service
            .api()
            .delete_account(&DeleteAccountRequest {
                current_password: "pw".to_string(),
                reason: None,
            })
            .await
            .unwrap();
        assert_eq!(res.detail, "Account deleted");
        let sent = h.transport.last_request().unwrap();
        assert_eq!(sent.method, crate::http::transport::Method::Delete);
        assert_eq!(sent.body.unwrap(), json!({"current_password": "pw"}));
    }
}
