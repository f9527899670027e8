//! Agent catalog and the user's selection and favorites.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::storage::{SessionStorage, KEY_AGENTS};
use super::types::AgentId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentPreset {
    pub label: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    /// Icon name understood by the UI layer
    pub icon: String,
    pub description: String,
    pub presets: Vec<AgentPreset>,
}

fn agent(
    id: AgentId,
    name: &str,
    icon: &str,
    description: &str,
    preset: (&str, &str),
) -> Agent {
    Agent {
        id,
        name: name.to_string(),
        icon: icon.to_string(),
        description: description.to_string(),
        presets: vec![AgentPreset {
            label: preset.0.to_string(),
            prompt: preset.1.to_string(),
        }],
    }
}

/// The built-in catalog. The router is internal and not selectable.
pub fn agents_seed() -> Vec<Agent> {
    vec![
        agent(
            AgentId::News,
            "News assistant",
            "Newspaper",
            "Today's key news in three lines",
            ("Key news in 3 lines", "Summarize today's key news for this stock in three lines."),
        ),
        agent(
            AgentId::Fundamentals,
            "Financials assistant",
            "LibraryBig",
            "Latest quarter summary and valuation",
            ("Latest quarter", "Summarize the latest quarterly results and valuation."),
        ),
        agent(
            AgentId::Technical,
            "Technical assistant",
            "Activity",
            "Short report on trend and indicators",
            ("Technical summary", "Write a short report based on trend and indicators."),
        ),
        agent(
            AgentId::Backtest,
            "Backtest assistant",
            "FlaskConical",
            "Five-year 12-1 momentum performance",
            ("12-1 momentum", "Summarize five-year performance of the 12-1 momentum strategy."),
        ),
        agent(
            AgentId::Strategy,
            "Strategy assistant",
            "Layers",
            "Three-line overall strategy memo",
            ("Strategy memo", "Write an overall strategy memo in three lines."),
        ),
        agent(
            AgentId::Report,
            "Report assistant",
            "FileChartColumn",
            "Investment opinion and headline",
            ("Stock report", "Summarize the investment opinion, headline and key points."),
        ),
    ]
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Selection {
    #[serde(default)]
    selected: Vec<AgentId>,
    #[serde(default)]
    favorites: Vec<AgentId>,
}

pub struct AgentsStore {
    agents: Vec<Agent>,
    selection: Mutex<Selection>,
    storage: Arc<SessionStorage>,
}

impl AgentsStore {
    pub fn new(storage: Arc<SessionStorage>) -> Self {
        let selection = storage.get(KEY_AGENTS).unwrap_or_default();
        Self {
            agents: agents_seed(),
            selection: Mutex::new(selection),
            storage,
        }
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Selected agents in selection order.
    pub fn selected(&self) -> Vec<AgentId> {
        self.with_selection(|s| s.selected.clone())
    }

    pub fn favorites(&self) -> Vec<AgentId> {
        self.with_selection(|s| s.favorites.clone())
    }

    pub fn is_selected(&self, id: AgentId) -> bool {
        self.with_selection(|s| s.selected.contains(&id))
    }

    pub fn toggle_select(&self, id: AgentId) {
        self.mutate(|s| toggle(&mut s.selected, id));
    }

    pub fn clear_selected(&self) {
        self.mutate(|s| s.selected.clear());
    }

    pub fn toggle_favorite(&self, id: AgentId) {
        self.mutate(|s| toggle(&mut s.favorites, id));
    }

    fn with_selection<T>(&self, f: impl FnOnce(&Selection) -> T) -> T {
        let selection = self
            .selection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&selection)
    }

    fn mutate(&self, f: impl FnOnce(&mut Selection)) {
        let mut selection = self
            .selection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut selection);
        if let Err(e) = self.storage.set(KEY_AGENTS, &*selection) {
            warn!("Failed to persist agent selection: {}", e);
        }
    }
}

fn toggle(ids: &mut Vec<AgentId>, id: AgentId) {
    if let Some(pos) = ids.iter().position(|x| *x == id) {
        ids.remove(pos);
    } else {
        ids.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_has_six_selectable_agents() {
        let seed = agents_seed();
        assert_eq!(seed.len(), 6);
        assert!(seed.iter().all(|a| a.id != AgentId::Router));
        assert!(seed.iter().all(|a| !a.presets.is_empty()));
    }

    #[test]
    fn toggles_keep_order_and_persist() {
        let storage = Arc::new(SessionStorage::in_memory());
        let store = AgentsStore::new(storage.clone());

        store.toggle_select(AgentId::Technical);
        store.toggle_select(AgentId::News);
        assert_eq!(store.selected(), vec![AgentId::Technical, AgentId::News]);

        store.toggle_select(AgentId::Technical);
        assert_eq!(store.selected(), vec![AgentId::News]);

        store.toggle_favorite(AgentId::Report);
        assert_eq!(store.favorites(), vec![AgentId::Report]);

        let reloaded = AgentsStore::new(storage);
        assert_eq!(reloaded.selected(), vec![AgentId::News]);
        assert_eq!(reloaded.favorites(), vec![AgentId::Report]);
    }

    #[test]
    fn clear_selected_keeps_favorites() {
        let store = AgentsStore::new(Arc::new(SessionStorage::in_memory()));
        store.toggle_select(AgentId::News);
        store.toggle_favorite(AgentId::News);
        store.clear_selected();
        assert!(store.selected().is_empty());
        assert!(!store.is_selected(AgentId::News));
        assert_eq!(store.favorites(), vec![AgentId::News]);
    }
}
