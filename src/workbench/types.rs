//! Run and step records.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Agents of the fixed routing graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentId {
    Router,
    News,
    Fundamentals,
    Technical,
    Backtest,
    Strategy,
    Report,
}

impl AgentId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::News => "news",
            Self::Fundamentals => "fundamentals",
            Self::Technical => "technical",
            Self::Backtest => "backtest",
            Self::Strategy => "strategy",
            Self::Report => "report",
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much the assistant may do without asking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Autonomy {
    #[default]
    Ask,
    Semi,
    Auto,
}

/// Lifecycle of a run or a step: `queued -> running -> {done, error}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Queued,
    Running,
    Done,
    Error,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Forward moves only; repeating the current status is allowed.
    /// `queued -> error` covers failures before any work started.
    pub fn can_transition_to(&self, next: Status) -> bool {
        *self == next
            || matches!(
                (self, next),
                (Self::Queued, Self::Running)
                    | (Self::Queued, Self::Error)
                    | (Self::Running, Self::Done)
                    | (Self::Running, Self::Error)
            )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepRole {
    Plan,
    Action,
    Verify,
    Summarize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One unit of agent work inside a run. Steps are identified by `id` and
/// updated in place as their status moves forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStep {
    pub id: String,
    pub role: StepRole,
    pub agent: AgentId,
    /// Action name such as `collect` or `summarize`
    pub name: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Map<String, Value>>,
}

impl RunStep {
    pub fn new(id: impl Into<String>, role: StepRole, agent: AgentId, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            agent,
            name: name.into(),
            status: Status::Queued,
            logs: Vec::new(),
            tool_name: None,
            evidence: Vec::new(),
            outputs: None,
        }
    }

    /// `agent.name`, e.g. `news.collect`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.agent, self.name)
    }

    /// Fold a newer version of this step in. Optional fields the update
    /// leaves empty keep their previous values.
    pub fn merge(&mut self, incoming: RunStep) {
        let RunStep {
            id: _,
            role,
            agent,
            name,
            status,
            logs,
            tool_name,
            evidence,
            outputs,
        } = incoming;
        self.role = role;
        self.agent = agent;
        self.name = name;
        self.status = status;
        if !logs.is_empty() {
            self.logs = logs;
        }
        if tool_name.is_some() {
            self.tool_name = tool_name;
        }
        if !evidence.is_empty() {
            self.evidence = evidence;
        }
        if outputs.is_some() {
            self.outputs = outputs;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteGraph {
    pub nodes: Vec<AgentId>,
    pub edges: Vec<(AgentId, AgentId)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteReason {
    pub agent: AgentId,
    pub reason: String,
}

/// Routing decision: the agent graph and why each agent takes part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub graph: RouteGraph,
    pub table: Vec<RouteReason>,
}

/// A submitted prompt and everything known about its execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    /// Unix epoch milliseconds
    pub created_at: i64,
    pub prompt: String,
    pub autonomy: Autonomy,
    pub selected_agents: Vec<AgentId>,
    pub status: Status,
    pub route: Route,
    pub steps: Vec<RunStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Run {
    pub fn step(&self, id: &str) -> Option<&RunStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// True if any step ended in `error`, whatever the run status.
    pub fn has_step_errors(&self) -> bool {
        self.steps.iter().any(|s| s.status == Status::Error)
    }

    /// Share of steps that are done, 0..=100.
    pub fn progress(&self) -> u8 {
        if self.steps.is_empty() {
            return 0;
        }
        let done = self.steps.iter().filter(|s| s.status == Status::Done).count();
        ((done * 100 + self.steps.len() / 2) / self.steps.len()) as u8
    }
}

/// Input to [`super::store::RunStore::enqueue`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueInput {
    pub prompt: String,
    pub autonomy: Autonomy,
    pub selected_agents: Vec<AgentId>,
}
