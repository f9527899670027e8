//! Run store: owns every run and folds worker events into them.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use super::protocol::{SimEvent, SimRequest};
use super::storage::{SessionStorage, StorageError, KEY_RUNS};
use super::types::{EnqueueInput, Route, Run, RunStep, Status};
use super::worker::{SimulationError, WorkerHandle};
use crate::clock::SharedClock;
use crate::ids::create_id;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Message recorded on runs restored mid-flight.
const INTERRUPTED: &str = "Run interrupted before completion";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunsState {
    runs: Vec<Run>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active_id: Option<String>,
}

pub struct RunStore {
    state: RwLock<RunsState>,
    worker: WorkerHandle,
    changes: broadcast::Sender<String>,
    storage: Arc<SessionStorage>,
    clock: SharedClock,
}

impl RunStore {
    /// Build the store, restore persisted runs and start folding `events`.
    pub fn new(
        worker: WorkerHandle,
        events: mpsc::UnboundedReceiver<SimEvent>,
        storage: Arc<SessionStorage>,
        clock: SharedClock,
    ) -> Arc<Self> {
        let mut restored: RunsState = storage.get(KEY_RUNS).unwrap_or_default();
        for run in restored.runs.iter_mut().filter(|r| !r.status.is_terminal()) {
            run.status = Status::Error;
            run.error = Some(INTERRUPTED.to_string());
        }
        if !restored.runs.is_empty() {
            info!(runs = restored.runs.len(), "Restored run history");
        }

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let store = Arc::new(Self {
            state: RwLock::new(restored),
            worker,
            changes,
            storage,
            clock,
        });
        tokio::spawn(fold_events(Arc::downgrade(&store), events));
        store
    }

    /// Create a queued run at the head of the list and make it active.
    pub async fn enqueue(&self, input: EnqueueInput) -> String {
        let id = create_id("run");
        let run = Run {
            id: id.clone(),
            created_at: self.clock.now_ms(),
            prompt: input.prompt,
            autonomy: input.autonomy,
            selected_agents: input.selected_agents,
            status: Status::Queued,
            route: Route::default(),
            steps: Vec::new(),
            error: None,
        };
        {
            let mut state = self.state.write().await;
            state.runs.insert(0, run);
            state.active_id = Some(id.clone());
            self.persist_quietly(&state);
        }
        debug!(run = %id, "Run enqueued");
        self.notify(&id);
        id
    }

    /// Move a queued run to `running` and hand it to the worker. A failed
    /// dispatch marks the run `error` immediately.
    pub async fn simulate(&self, id: &str) -> Result<(), SimulationError> {
        let request = {
            let mut state = self.state.write().await;
            let run = state
                .runs
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| SimulationError::RunNotFound(id.to_string()))?;
            if run.status != Status::Queued {
                return Err(SimulationError::AlreadyStarted(id.to_string()));
            }
            run.status = Status::Running;
            let request = SimRequest::Simulate {
                id: run.id.clone(),
                prompt: run.prompt.clone(),
                selected_agents: run.selected_agents.clone(),
            };
            self.persist_quietly(&state);
            request
        };
        self.notify(id);

        if let Err(e) = self.worker.post(request) {
            error!(run = %id, "Failed to dispatch run: {}", e);
            self.apply(SimEvent::Error {
                id: id.to_string(),
                error: e.to_string(),
            })
            .await;
            return Err(e);
        }
        Ok(())
    }

    /// Fold one worker event into its run.
    pub async fn apply(&self, event: SimEvent) {
        let id = event.run_id().to_string();
        let changed = {
            let mut state = self.state.write().await;
            let Some(run) = state.runs.iter_mut().find(|r| r.id == id) else {
                debug!(run = %id, "Dropping event for unknown run");
                return;
            };

            let changed = match event {
                SimEvent::Route { route, .. } => {
                    run.route = route;
                    true
                }
                SimEvent::Step { step, .. } => upsert_step(run, step),
                SimEvent::Status { status, .. } => set_status(run, status),
                SimEvent::Error { error, .. } => {
                    let changed = set_status(run, Status::Error);
                    if changed {
                        run.error = Some(error);
                    }
                    changed
                }
            };
            if changed {
                self.persist_quietly(&state);
            }
            changed
        };

        if changed {
            self.notify(&id);
        }
    }

    /// Edit a run in place. The id cannot change and a backwards status
    /// change is reverted.
    pub async fn update<F>(&self, id: &str, patch: F) -> bool
    where
        F: FnOnce(&mut Run),
    {
        {
            let mut state = self.state.write().await;
            let Some(run) = state.runs.iter_mut().find(|r| r.id == id) else {
                return false;
            };
            let before = run.status;
            patch(run);
            run.id = id.to_string();
            if !before.can_transition_to(run.status) {
                warn!(run = %id, from = %before, to = %run.status, "Rejected backwards status change");
                run.status = before;
            }
            self.persist_quietly(&state);
        }
        self.notify(id);
        true
    }

    pub async fn get(&self, id: &str) -> Option<Run> {
        self.state
            .read()
            .await
            .runs
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// All runs, newest first.
    pub async fn runs(&self) -> Vec<Run> {
        self.state.read().await.runs.clone()
    }

    pub async fn active_id(&self) -> Option<String> {
        self.state.read().await.active_id.clone()
    }

    pub async fn set_active(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        if !state.runs.iter().any(|r| r.id == id) {
            return false;
        }
        state.active_id = Some(id.to_string());
        self.persist_quietly(&state);
        true
    }

    /// Ids of runs as they change.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }

    /// Resolve once the run is `done` or `error`. `None` if it does not exist.
    pub async fn wait_for_terminal(&self, id: &str) -> Option<Run> {
        let mut changes = self.subscribe();
        loop {
            let run = self.get(id).await?;
            if run.status.is_terminal() {
                return Some(run);
            }
            match changes.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return self.get(id).await,
            }
        }
    }

    /// Write the run history to session storage.
    pub async fn persist(&self) -> Result<(), StorageError> {
        let state = self.state.read().await;
        self.storage.set(KEY_RUNS, &*state)
    }

    fn persist_quietly(&self, state: &RunsState) {
        if let Err(e) = self.storage.set(KEY_RUNS, state) {
            warn!("Failed to persist runs: {}", e);
        }
    }

    fn notify(&self, id: &str) {
        // No subscribers is fine.
        let _ = self.changes.send(id.to_string());
    }
}

async fn fold_events(store: Weak<RunStore>, mut events: mpsc::UnboundedReceiver<SimEvent>) {
    while let Some(event) = events.recv().await {
        let Some(store) = store.upgrade() else {
            break;
        };
        store.apply(event).await;
    }
    debug!("Worker event stream ended");
}

fn upsert_step(run: &mut Run, incoming: RunStep) -> bool {
    match run.steps.iter_mut().find(|s| s.id == incoming.id) {
        Some(existing) => {
            if !existing.status.can_transition_to(incoming.status) {
                warn!(
                    run = %run.id,
                    step = %existing.id,
                    from = %existing.status,
                    to = %incoming.status,
                    "Dropping backwards step update"
                );
                return false;
            }
            existing.merge(incoming);
            true
        }
        None => {
            run.steps.push(incoming);
            true
        }
    }
}

fn set_status(run: &mut Run, status: Status) -> bool {
    if run.status.can_transition_to(status) {
        run.status = status;
        true
    } else {
        warn!(run = %run.id, from = %run.status, to = %status, "Dropping backwards run status");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::SimulationConfig;
    use crate::workbench::dag::NODES;
    use crate::workbench::types::{AgentId, Autonomy, StepRole};
    use crate::workbench::worker::SimulationWorker;

    fn store_with(
        failure_probability: f64,
        storage: Arc<SessionStorage>,
    ) -> (Arc<RunStore>, WorkerHandle) {
        let (worker, events) = SimulationWorker::spawn(SimulationConfig {
            failure_probability,
            seed: Some(11),
            ..SimulationConfig::default()
        });
        let store = RunStore::new(worker.clone(), events, storage, Arc::new(SystemClock));
        (store, worker)
    }

    fn store() -> Arc<RunStore> {
        store_with(0.0, Arc::new(SessionStorage::in_memory())).0
    }

    fn input(prompt: &str) -> EnqueueInput {
        EnqueueInput {
            prompt: prompt.to_string(),
            autonomy: Autonomy::Ask,
            selected_agents: vec![],
        }
    }

    fn step(run_id: &str, step_id: &str, status: Status) -> SimEvent {
        let mut step = RunStep::new(step_id, StepRole::Action, AgentId::News, "collect");
        step.status = status;
        SimEvent::Step {
            id: run_id.to_string(),
            step,
        }
    }

    #[tokio::test]
    async fn enqueue_prepends_and_activates() {
        let store = store();
        let first = store.enqueue(input("first")).await;
        let second = store.enqueue(input("second")).await;

        let runs = store.runs().await;
        assert_eq!(runs[0].id, second);
        assert_eq!(runs[1].id, first);
        assert_eq!(store.active_id().await, Some(second.clone()));

        let run = &runs[0];
        assert_eq!(run.status, Status::Queued);
        assert!(run.steps.is_empty());
        assert_eq!(run.route, Route::default());
        assert!(run.id.starts_with("run_"));
    }

    #[tokio::test]
    async fn step_upsert_updates_in_place() {
        let store = store();
        let id = store.enqueue(input("upsert")).await;
        store.update(&id, |r| r.status = Status::Running).await;

        store.apply(step(&id, "st_a", Status::Running)).await;
        store.apply(step(&id, "st_b", Status::Running)).await;
        store.apply(step(&id, "st_a", Status::Done)).await;

        let run = store.get(&id).await.unwrap();
        assert_eq!(run.steps.len(), 2);
        assert_eq!(run.steps[0].id, "st_a");
        assert_eq!(run.steps[0].status, Status::Done);
        assert_eq!(run.steps[1].id, "st_b");
    }

    #[tokio::test]
    async fn backwards_updates_are_dropped() {
        let store = store();
        let id = store.enqueue(input("order")).await;
        store.update(&id, |r| r.status = Status::Running).await;

        store.apply(step(&id, "st_a", Status::Done)).await;
        store.apply(step(&id, "st_a", Status::Running)).await;
        store
            .apply(SimEvent::Status {
                id: id.clone(),
                status: Status::Done,
            })
            .await;
        store
            .apply(SimEvent::Status {
                id: id.clone(),
                status: Status::Running,
            })
            .await;

        let run = store.get(&id).await.unwrap();
        assert_eq!(run.steps[0].status, Status::Done);
        assert_eq!(run.status, Status::Done);

        // `update` cannot move backwards either, but still applies other edits.
        store
            .update(&id, |r| {
                r.status = Status::Queued;
                r.prompt = "edited".to_string();
            })
            .await;
        let run = store.get(&id).await.unwrap();
        assert_eq!(run.status, Status::Done);
        assert_eq!(run.prompt, "edited");
    }

    #[tokio::test]
    async fn error_event_records_message() {
        let store = store();
        let id = store.enqueue(input("boom")).await;
        store.update(&id, |r| r.status = Status::Running).await;
        store
            .apply(SimEvent::Error {
                id: id.clone(),
                error: "sim error".to_string(),
            })
            .await;

        let run = store.get(&id).await.unwrap();
        assert_eq!(run.status, Status::Error);
        assert_eq!(run.error.as_deref(), Some("sim error"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_reaches_done_with_six_steps() {
        let store = store();
        let id = store.enqueue(input("test")).await;
        store.simulate(&id).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().status, Status::Running);

        let run = store.wait_for_terminal(&id).await.unwrap();
        assert_eq!(run.status, Status::Done);
        assert_eq!(run.steps.len(), 6);
        assert!(run.steps.iter().all(|s| s.status == Status::Done));
        assert_eq!(run.route.graph.nodes, NODES.to_vec());
        assert!(!run.has_step_errors());
        assert_eq!(run.progress(), 100);

        let keys: Vec<String> = run.steps.iter().map(RunStep::key).collect();
        assert_eq!(keys[0], "router.plan");
        assert_eq!(keys[4], "strategy.compose");
        assert_eq!(keys[5], "report.build");
        // Each finished step carries its progress and completion lines.
        assert_eq!(run.steps[0].logs.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_branch_failure_keeps_run_done() {
        let (store, _worker) = store_with(1.0, Arc::new(SessionStorage::in_memory()));
        let id = store.enqueue(input("test")).await;
        store.simulate(&id).await.unwrap();

        let run = store.wait_for_terminal(&id).await.unwrap();
        assert_eq!(run.status, Status::Done);
        assert!(run.has_step_errors());

        let branches: Vec<&RunStep> = run
            .steps
            .iter()
            .filter(|s| s.role == StepRole::Action)
            .collect();
        assert_eq!(branches.len(), 4);
        assert_eq!(branches.iter().filter(|s| s.status == Status::Error).count(), 1);
        assert_eq!(branches.iter().filter(|s| s.status == Status::Done).count(), 3);
    }

    #[tokio::test]
    async fn dispatch_failure_fails_run_immediately() {
        let (store, worker) = store_with(0.0, Arc::new(SessionStorage::in_memory()));
        worker.shutdown();
        let id = store.enqueue(input("test")).await;

        let err = tokio_test::assert_err!(store.simulate(&id).await);
        assert!(matches!(err, SimulationError::WorkerUnavailable));
        let run = store.get(&id).await.unwrap();
        assert_eq!(run.status, Status::Error);
        assert_eq!(run.error, Some(err.to_string()));
    }

    #[tokio::test]
    async fn simulate_requires_a_queued_run() {
        let store = store();
        assert!(matches!(
            store.simulate("run_missing").await,
            Err(SimulationError::RunNotFound(_))
        ));

        let id = store.enqueue(input("twice")).await;
        store.simulate(&id).await.unwrap();
        assert!(matches!(
            store.simulate(&id).await,
            Err(SimulationError::AlreadyStarted(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn history_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let (store, worker) = store_with(0.0, Arc::new(SessionStorage::open(&path).unwrap()));
        let finished = store.enqueue(input("finished")).await;
        store.simulate(&finished).await.unwrap();
        store.wait_for_terminal(&finished).await.unwrap();
        let pending = store.enqueue(input("pending")).await;
        store.update(&pending, |r| r.status = Status::Running).await;
        store.persist().await.unwrap();
        worker.shutdown();

        let (restored, _worker) =
            store_with(0.0, Arc::new(SessionStorage::open(&path).unwrap()));
        let runs = restored.runs().await;
        assert_eq!(runs.len(), 2);
        assert_eq!(restored.active_id().await, Some(pending.clone()));

        let finished = restored.get(&finished).await.unwrap();
        assert_eq!(finished.status, Status::Done);
        assert_eq!(finished.steps.len(), 6);

        let pending = restored.get(&pending).await.unwrap();
        assert_eq!(pending.status, Status::Error);
        assert_eq!(pending.error.as_deref(), Some(INTERRUPTED));
    }

    #[tokio::test]
    async fn subscribers_see_changed_ids() {
        let store = store();
        let mut changes = store.subscribe();
        let id = store.enqueue(input("watch")).await;
        assert_eq!(changes.recv().await.unwrap(), id);
    }
}
