//! Navigation hook used for auth redirects.

use std::sync::Mutex;

/// Where the client currently is, and how to send it elsewhere.
pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;
    fn navigate(&self, path: &str);
}

/// Navigator for headless hosts: records the current path and logs moves.
#[derive(Debug)]
pub struct MemoryNavigator {
    path: Mutex<String>,
}

impl MemoryNavigator {
    pub fn new(initial_path: impl Into<String>) -> Self {
        Self {
            path: Mutex::new(initial_path.into()),
        }
    }
}

impl Default for MemoryNavigator {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Navigator for MemoryNavigator {
    fn current_path(&self) -> String {
        self.path
            .lock()
            .map(|p| p.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn navigate(&self, path: &str) {
        tracing::info!(to = %path, "Navigating");
        let mut current = self
            .path
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = path.to_string();
    }
}
