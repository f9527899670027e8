//! Workbench: runs, the simulation worker and session-scoped UI state.
//!
//! A prompt becomes a [`Run`] in the [`RunStore`]; the store hands it to the
//! [`SimulationWorker`] and folds the worker's [`SimEvent`]s back into the
//! run as they arrive.

pub mod agents;
pub mod composer;
pub mod dag;
pub mod protocol;
pub mod storage;
pub mod store;
pub mod types;
pub mod worker;

pub use agents::{Agent, AgentPreset, AgentsStore};
pub use composer::ComposerStore;
pub use protocol::{SimEvent, SimRequest, PROTOCOL_VERSION};
pub use storage::{SessionStorage, StorageError};
pub use store::RunStore;
pub use types::{AgentId, Autonomy, EnqueueInput, Run, RunStep, Status, StepRole};
pub use worker::{SimulationError, SimulationWorker, WorkerHandle};
