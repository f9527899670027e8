//! Messages exchanged with the simulation worker.
//!
//! Both directions are tagged by `type` on the wire. Bump
//! [`PROTOCOL_VERSION`] on any incompatible change.

use serde::{Deserialize, Serialize};

use super::types::{AgentId, Route, RunStep, Status};

pub const PROTOCOL_VERSION: u32 = 1;

/// Requests accepted by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SimRequest {
    Simulate {
        id: String,
        prompt: String,
        #[serde(rename = "selectedAgents")]
        selected_agents: Vec<AgentId>,
    },
}

/// Progress reported by the worker. `id` is always the run id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SimEvent {
    Route { id: String, route: Route },
    Step { id: String, step: RunStep },
    Status { id: String, status: Status },
    Error { id: String, error: String },
}

impl SimEvent {
    pub fn run_id(&self) -> &str {
        match self {
            Self::Route { id, .. }
            | Self::Step { id, .. }
            | Self::Status { id, .. }
            | Self::Error { id, .. } => id,
        }
    }
}
