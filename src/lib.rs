//! # dontcare
//!
//! Client core of an agentic stock-assistant workbench.
//!
//! This library provides:
//! - An in-memory session with single-flight access-token refresh and a
//!   proactive refresh scheduler
//! - A resilient HTTP pipeline: bearer injection, retries with exponential
//!   backoff, cancellation and a normalized error envelope
//! - A run store driving a simulated multi-agent worker over a fixed agent
//!   graph, with session-scoped persistence of workbench state
//!
//! ## Architecture
//!
//! Every service is constructed once by [`app::App`] and shared through
//! `Arc`. Outbound requests flow through [`http::ApiClient`], which asks the
//! [`auth::TokenManager`] for a valid token. Prompts become runs in the
//! [`workbench::RunStore`], which exchanges messages with the
//! [`workbench::SimulationWorker`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use dontcare::{app::App, config::Config, workbench::Autonomy};
//!
//! let app = App::new(Config::from_env()?)?;
//! if let Some(id) = app.submit_prompt("Summarize NVDA news", Autonomy::Ask).await? {
//!     let run = app.runs.wait_for_terminal(&id).await;
//! }
//! ```

pub mod app;
pub mod auth;
pub mod clock;
pub mod config;
pub mod http;
pub mod ids;
pub mod workbench;

pub use config::Config;
