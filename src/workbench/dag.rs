//! The fixed agent graph every run follows.

use super::types::{AgentId, Route, RouteGraph, RouteReason};

pub const NODES: [AgentId; 7] = [
    AgentId::Router,
    AgentId::News,
    AgentId::Fundamentals,
    AgentId::Technical,
    AgentId::Backtest,
    AgentId::Strategy,
    AgentId::Report,
];

pub const EDGES: [(AgentId, AgentId); 9] = [
    (AgentId::Router, AgentId::News),
    (AgentId::Router, AgentId::Fundamentals),
    (AgentId::Router, AgentId::Technical),
    (AgentId::Router, AgentId::Backtest),
    (AgentId::News, AgentId::Strategy),
    (AgentId::Fundamentals, AgentId::Strategy),
    (AgentId::Technical, AgentId::Strategy),
    (AgentId::Backtest, AgentId::Strategy),
    (AgentId::Strategy, AgentId::Report),
];

/// Branch steps run in parallel between planning and composition.
pub const BRANCHES: [(AgentId, &str); 4] = [
    (AgentId::News, "collect"),
    (AgentId::Fundamentals, "summarize"),
    (AgentId::Technical, "brief"),
    (AgentId::Backtest, "run"),
];

const REASONS: [(AgentId, &str); 6] = [
    (AgentId::News, "Key news check"),
    (AgentId::Fundamentals, "Quarterly financial summary"),
    (AgentId::Technical, "Trend and indicators"),
    (AgentId::Backtest, "Strategy performance validation"),
    (AgentId::Strategy, "Overall conclusion"),
    (AgentId::Report, "Report generation"),
];

/// The static route reported at the start of every run.
pub fn route() -> Route {
    Route {
        graph: RouteGraph {
            nodes: NODES.to_vec(),
            edges: EDGES.to_vec(),
        },
        table: REASONS
            .iter()
            .map(|(agent, reason)| RouteReason {
                agent: *agent,
                reason: reason.to_string(),
            })
            .collect(),
    }
}

/// User-facing copy for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepCopy {
    pub title: &'static str,
    pub why: &'static str,
    pub doing: &'static str,
    pub done: &'static str,
}

const STEP_COPY: [(&str, StepCopy); 7] = [
    (
        "router.plan",
        StepCopy {
            title: "Interpret request",
            why: "Pick the right assistants",
            doing: "Analyzing intent and designing the route...",
            done: "Execution route confirmed",
        },
    ),
    (
        "news.collect",
        StepCopy {
            title: "Collect news",
            why: "Reflect the latest issues",
            doing: "Searching reliable sources...",
            done: "Key articles secured",
        },
    ),
    (
        "fundamentals.summarize",
        StepCopy {
            title: "Financial summary",
            why: "Check company health",
            doing: "Organizing quarterly metrics...",
            done: "Key financial metrics ready",
        },
    ),
    (
        "technical.brief",
        StepCopy {
            title: "Technical analysis",
            why: "Confirm trend and volatility",
            doing: "Computing key indicators...",
            done: "Technical summary ready",
        },
    ),
    (
        "backtest.run",
        StepCopy {
            title: "Backtest",
            why: "Validate strategy performance",
            doing: "Validating 12-1 momentum over 5 years...",
            done: "Performance summary complete",
        },
    ),
    (
        "strategy.compose",
        StepCopy {
            title: "Strategy synthesis",
            why: "Reach an actionable conclusion",
            doing: "Integrating all evidence...",
            done: "Strategy conclusion ready",
        },
    ),
    (
        "report.build",
        StepCopy {
            title: "Build report",
            why: "Present it in a readable form",
            doing: "Writing headline and investment opinion...",
            done: "Report generated",
        },
    ),
];

/// Copy for `agent.name`, if the step is known.
pub fn step_copy(key: &str) -> Option<&'static StepCopy> {
    STEP_COPY.iter().find(|(k, _)| *k == key).map(|(_, copy)| copy)
}
