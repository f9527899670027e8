//! Session and token lifecycle.
//!
//! [`SessionStore`] holds the tokens, [`TokenManager`] keeps the access
//! token valid, and [`RefreshScheduler`] refreshes it ahead of expiry.

pub mod api;
pub mod jwt;
pub mod scheduler;
pub mod session;
pub mod token_manager;
pub mod types;

pub use api::{AuthApi, AuthService};
pub use scheduler::{RefreshScheduler, Visibility};
pub use session::{Session, SessionStore};
pub use token_manager::{RefreshApi, TokenError, TokenManager, TransportRefreshApi};
pub use types::{TokenResponse, User};
