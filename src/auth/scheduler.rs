//! Proactive access-token refresh.
//!
//! One timer at most is armed per session. Arming always cancels the
//! previous timer first, under the same lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::session::SessionStore;
use super::token_manager::TokenManager;
use crate::http::navigator::Navigator;

/// Longest delay a timer is armed for (2^31 - 1 ms).
pub const MAX_TIMER_DELAY: Duration = Duration::from_millis(2_147_483_647);

/// Refreshes are never scheduled sooner than this.
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

struct Timer {
    id: u64,
    cancel: CancellationToken,
    deadline: tokio::time::Instant,
}

pub struct RefreshScheduler {
    tokens: Arc<TokenManager>,
    session: Arc<SessionStore>,
    navigator: Arc<dyn Navigator>,
    login_path: String,
    timer: Mutex<Option<Timer>>,
    next_timer_id: AtomicU64,
    supervisor: Mutex<Option<CancellationToken>>,
}

impl RefreshScheduler {
    pub fn new(
        tokens: Arc<TokenManager>,
        session: Arc<SessionStore>,
        navigator: Arc<dyn Navigator>,
        login_path: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tokens,
            session,
            navigator,
            login_path: login_path.into(),
            timer: Mutex::new(None),
            next_timer_id: AtomicU64::new(0),
            supervisor: Mutex::new(None),
        })
    }

    /// Follow the session: arm a timer whenever a new access token appears,
    /// cancel it when the session is cleared.
    pub fn start(self: &Arc<Self>) {
        let stop = CancellationToken::new();
        if let Some(previous) = lock(&self.supervisor).replace(stop.clone()) {
            previous.cancel();
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let mut session = self.session.subscribe();
        tokio::spawn(async move {
            let mut last_token: Option<String> = None;
            loop {
                let token = session.borrow_and_update().access_token.clone();
                if token != last_token {
                    let Some(scheduler) = weak.upgrade() else {
                        break;
                    };
                    if token.is_some() {
                        scheduler.schedule();
                    } else {
                        scheduler.cancel();
                    }
                    last_token = token;
                }

                tokio::select! {
                    _ = stop.cancelled() => break,
                    changed = session.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Refresh supervisor stopped");
        });
    }

    /// Arm the timer from the current token's expiry, replacing any
    /// pending timer. Without a decodable token the timer is cancelled.
    pub fn schedule(self: &Arc<Self>) {
        match self.tokens.access_token_expiry_ms() {
            Some(expires_at_ms) => self.arm(self.delay_until_refresh(expires_at_ms)),
            None => {
                debug!("No decodable access token; refresh not scheduled");
                self.cancel();
            }
        }
    }

    pub fn cancel(&self) {
        if let Some(timer) = lock(&self.timer).take() {
            timer.cancel.cancel();
            debug!(timer = timer.id, "Token refresh timer cancelled");
        }
    }

    /// A visible host re-checks the token: refresh now if it is no longer
    /// valid, otherwise re-arm from its expiry.
    pub fn on_visibility_change(self: &Arc<Self>, visibility: Visibility) {
        if visibility == Visibility::Hidden || !self.session.is_authenticated() {
            return;
        }
        if self.tokens.is_token_valid() {
            self.schedule();
        } else {
            info!("Access token expired while hidden; refreshing now");
            self.arm(Duration::ZERO);
        }
    }

    /// Stop following the session and cancel any pending timer.
    pub fn shutdown(&self) {
        if let Some(stop) = lock(&self.supervisor).take() {
            stop.cancel();
        }
        self.cancel();
    }

    /// Time left before the pending refresh fires.
    pub fn next_refresh_in(&self) -> Option<Duration> {
        lock(&self.timer)
            .as_ref()
            .map(|t| t.deadline.saturating_duration_since(tokio::time::Instant::now()))
    }

    /// `expiry - lead`, but at least one second from now and at most
    /// [`MAX_TIMER_DELAY`].
    fn delay_until_refresh(&self, expires_at_ms: i64) -> Duration {
        let now = self.tokens.clock().now_ms();
        let lead_ms =
            i64::try_from(self.tokens.config().refresh_lead.as_millis()).unwrap_or(i64::MAX);
        let min_ms = MIN_REFRESH_DELAY.as_millis() as i64;
        let refresh_at = expires_at_ms
            .saturating_sub(lead_ms)
            .max(now.saturating_add(min_ms));
        let delay_ms = u64::try_from(refresh_at.saturating_sub(now)).unwrap_or(0);
        Duration::from_millis(delay_ms).min(MAX_TIMER_DELAY)
    }

    fn arm(self: &Arc<Self>, delay: Duration) {
        let id = self.next_timer_id.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        {
            let mut slot = lock(&self.timer);
            if let Some(previous) = slot.take() {
                previous.cancel.cancel();
            }
            *slot = Some(Timer {
                id,
                cancel: cancel.clone(),
                deadline: tokio::time::Instant::now() + delay,
            });
        }
        info!(timer = id, delay_ms = delay.as_millis() as u64, "Token refresh scheduled");

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    {
                        let mut slot = lock(&scheduler.timer);
                        if slot.as_ref().is_some_and(|t| t.id == id) {
                            *slot = None;
                        }
                    }
                    scheduler.fire(id).await;
                }
            }
        });
    }

    async fn fire(self: &Arc<Self>, id: u64) {
        info!(timer = id, "Refreshing access token");
        match self.tokens.refresh_access_token().await {
            Ok(_) => self.schedule(),
            Err(e) => {
                error!(timer = id, "Scheduled token refresh failed: {}", e);
                self.tokens.clear_tokens();
                self.navigator.navigate(&self.login_path);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
