//! Prompt composer state: the draft text and a focus signal.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::warn;

use super::storage::{SessionStorage, KEY_COMPOSER};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposerState {
    pub draft: String,
    /// Incremented on every focus request
    pub focus_tick: u64,
}

pub struct ComposerStore {
    state: watch::Sender<ComposerState>,
    storage: Arc<SessionStorage>,
}

impl ComposerStore {
    pub fn new(storage: Arc<SessionStorage>) -> Self {
        let restored = storage.get(KEY_COMPOSER).unwrap_or_default();
        let (state, _) = watch::channel(restored);
        Self { state, storage }
    }

    pub fn draft(&self) -> String {
        self.state.borrow().draft.clone()
    }

    pub fn focus_tick(&self) -> u64 {
        self.state.borrow().focus_tick
    }

    pub fn set_draft(&self, draft: impl Into<String>) {
        let draft = draft.into();
        self.mutate(|s| s.draft = draft);
    }

    pub fn request_focus(&self) {
        self.mutate(|s| s.focus_tick += 1);
    }

    pub fn clear(&self) {
        self.mutate(|s| s.draft.clear());
    }

    /// Observe draft and focus changes.
    pub fn subscribe(&self) -> watch::Receiver<ComposerState> {
        self.state.subscribe()
    }

    fn mutate(&self, f: impl FnOnce(&mut ComposerState)) {
        self.state.send_modify(f);
        let snapshot = self.state.borrow().clone();
        if let Err(e) = self.storage.set(KEY_COMPOSER, &snapshot) {
            warn!("Failed to persist composer state: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_and_focus() {
        let storage = Arc::new(SessionStorage::in_memory());
        let composer = ComposerStore::new(storage.clone());

        composer.set_draft("Summarize NVDA news");
        composer.request_focus();
        composer.request_focus();
        assert_eq!(composer.draft(), "Summarize NVDA news");
        assert_eq!(composer.focus_tick(), 2);

        let reloaded = ComposerStore::new(storage);
        assert_eq!(reloaded.draft(), "Summarize NVDA news");

        reloaded.clear();
        assert_eq!(reloaded.draft(), "");
        assert_eq!(reloaded.focus_tick(), 2);
    }

    #[tokio::test]
    async fn subscribers_see_focus_requests() {
        let composer = ComposerStore::new(Arc::new(SessionStorage::in_memory()));
        let mut rx = composer.subscribe();
        composer.request_focus();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().focus_tick, 1);
    }
}
