//! Pending-request tracking used to reject duplicate submissions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::ids::create_id;

/// Category of a user-initiated auth request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiRequestType {
    Login,
    Signup,
    PasswordReset,
    EmailVerification,
    Logout,
}

impl ApiRequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Signup => "signup",
            Self::PasswordReset => "password_reset",
            Self::EmailVerification => "email_verification",
            Self::Logout => "logout",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestDetail {
    pub id: String,
    pub request_type: ApiRequestType,
    pub started_at: Instant,
    pub is_pending: bool,
}

#[derive(Debug, Default)]
struct TrackerState {
    pending: HashSet<String>,
    details: HashMap<String, RequestDetail>,
}

impl TrackerState {
    fn insert(&mut self, id: &str, request_type: ApiRequestType) {
        self.pending.insert(id.to_string());
        self.details.insert(
            id.to_string(),
            RequestDetail {
                id: id.to_string(),
                request_type,
                started_at: Instant::now(),
                is_pending: true,
            },
        );
    }

    fn type_pending(&self, request_type: ApiRequestType) -> bool {
        self.details
            .values()
            .any(|d| d.request_type == request_type && d.is_pending)
    }
}

/// A tracked request that is forgotten when dropped, however the owning
/// flow ends.
#[derive(Debug)]
pub struct PendingRequest {
    tracker: Arc<ApiRequestTracker>,
    id: String,
}

impl PendingRequest {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.tracker.remove_request(&self.id);
    }
}

/// Tracks which requests are in flight, by id and by type.
#[derive(Debug, Default)]
pub struct ApiRequestTracker {
    state: Mutex<TrackerState>,
}

impl ApiRequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut TrackerState) -> R) -> R {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    pub fn start_request(&self, id: &str, request_type: ApiRequestType) {
        self.with_state(|s| s.insert(id, request_type));
    }

    /// Track a new request of `request_type` until the guard is dropped.
    pub fn track(self: &Arc<Self>, request_type: ApiRequestType) -> PendingRequest {
        let id = create_id(request_type.as_str());
        self.start_request(&id, request_type);
        PendingRequest {
            tracker: Arc::clone(self),
            id,
        }
    }

    /// Like [`Self::track`], but `None` if a request of the same type is
    /// already pending. Check and insert happen under one lock.
    pub fn try_track(self: &Arc<Self>, request_type: ApiRequestType) -> Option<PendingRequest> {
        let id = create_id(request_type.as_str());
        let started = self.with_state(|s| {
            if s.type_pending(request_type) {
                return false;
            }
            s.insert(&id, request_type);
            true
        });
        started.then(|| PendingRequest {
            tracker: Arc::clone(self),
            id,
        })
    }

    /// Mark a request finished; its detail entry is kept.
    pub fn complete_request(&self, id: &str) {
        self.with_state(|s| {
            s.pending.remove(id);
            if let Some(detail) = s.details.get_mut(id) {
                detail.is_pending = false;
            }
        });
    }

    pub fn is_request_pending(&self, id: &str) -> bool {
        self.with_state(|s| s.pending.contains(id))
    }

    pub fn is_type_pending(&self, request_type: ApiRequestType) -> bool {
        self.with_state(|s| s.type_pending(request_type))
    }

    pub fn detail(&self, id: &str) -> Option<RequestDetail> {
        self.with_state(|s| s.details.get(id).cloned())
    }

    /// Number of requests with a detail entry, pending or not.
    pub fn tracked_count(&self) -> usize {
        self.with_state(|s| s.details.len())
    }

    pub fn remove_request(&self, id: &str) {
        self.with_state(|s| {
            s.pending.remove(id);
            s.details.remove(id);
        });
    }

    pub fn clear_all_requests(&self) {
        self.with_state(|s| *s = TrackerState::default());
    }
}
