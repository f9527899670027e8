//! Simulated multi-agent execution.
//!
//! The worker is an isolated task that shares no state with the run store.
//! Requests arrive on one channel and every run's progress goes out on one
//! shared event channel. Each run executes in its own task, so events of a
//! single run keep their emission order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dag::{self, BRANCHES};
use super::protocol::{SimEvent, SimRequest, PROTOCOL_VERSION};
use super::types::{AgentId, RunStep, Status, StepRole};
use crate::config::SimulationConfig;
use crate::ids::create_id;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Simulation worker is not running")]
    WorkerUnavailable,

    #[error("Run {0} not found")]
    RunNotFound(String),

    #[error("Run {0} has already started")]
    AlreadyStarted(String),

    #[error("Event channel closed")]
    EventChannelClosed,

    #[error("Simulation panicked: {0}")]
    Panicked(String),
}

/// Handle used to post requests to a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    requests: mpsc::UnboundedSender<SimRequest>,
    shutdown: CancellationToken,
}

impl WorkerHandle {
    pub fn post(&self, request: SimRequest) -> Result<(), SimulationError> {
        if self.shutdown.is_cancelled() {
            return Err(SimulationError::WorkerUnavailable);
        }
        self.requests
            .send(request)
            .map_err(|_| SimulationError::WorkerUnavailable)
    }

    /// Stop accepting requests. Runs already started finish normally.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.requests.is_closed()
    }
}

pub struct SimulationWorker;

impl SimulationWorker {
    /// Start the worker. Returns the request handle and the event stream.
    pub fn spawn(config: SimulationConfig) -> (WorkerHandle, mpsc::UnboundedReceiver<SimEvent>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        info!(
            protocol = PROTOCOL_VERSION,
            seeded = config.seed.is_some(),
            failure_probability = config.failure_probability,
            "Simulation worker started"
        );

        tokio::spawn(serve(
            config,
            Arc::new(Mutex::new(rng)),
            request_rx,
            event_tx,
            shutdown.clone(),
        ));

        (
            WorkerHandle {
                requests: request_tx,
                shutdown,
            },
            event_rx,
        )
    }
}

async fn serve(
    config: SimulationConfig,
    rng: Arc<Mutex<StdRng>>,
    mut requests: mpsc::UnboundedReceiver<SimRequest>,
    events: mpsc::UnboundedSender<SimEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = shutdown.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        match request {
            SimRequest::Simulate {
                id,
                prompt,
                selected_agents,
            } => {
                debug!(
                    run = %id,
                    prompt_len = prompt.len(),
                    selected = selected_agents.len(),
                    "Simulation requested"
                );
                let plan = {
                    let mut rng = rng.lock().unwrap_or_else(|p| p.into_inner());
                    RunPlan::draw(&config, &mut rng)
                };
                let emitter = Emitter {
                    run_id: id.clone(),
                    events: events.clone(),
                };
                let run = tokio::spawn(simulate(emitter, plan));
                tokio::spawn(supervise(id, run, events.clone()));
            }
        }
    }
    info!("Simulation worker stopped");
}

/// Report a run that failed or panicked as a terminal `error` event.
async fn supervise(
    run_id: String,
    run: JoinHandle<Result<(), SimulationError>>,
    events: mpsc::UnboundedSender<SimEvent>,
) {
    let failure = match run.await {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(join_err) if join_err.is_panic() => {
            let payload = join_err.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "sim error".to_string());
            SimulationError::Panicked(message)
        }
        Err(_) => SimulationError::Panicked("run task cancelled".to_string()),
    };

    error!(run = %run_id, "Simulation failed: {}", failure);
    if events
        .send(SimEvent::Error {
            id: run_id.clone(),
            error: failure.to_string(),
        })
        .is_err()
    {
        warn!(run = %run_id, "Could not report simulation failure; event channel closed");
    }
}

/// Random choices for one run, drawn up front.
#[derive(Debug, Clone, PartialEq)]
struct RunPlan {
    plan_delay: Duration,
    branch_delays: [Duration; 4],
    failing_branch: Option<usize>,
    compose_delay: Duration,
    build_delay: Duration,
}

impl RunPlan {
    fn draw(config: &SimulationConfig, rng: &mut StdRng) -> Self {
        let mut delay = |(lo, hi): (u64, u64)| Duration::from_millis(rng.gen_range(lo..=hi.max(lo)));
        let plan_delay = delay(config.plan_delay_ms);
        let branch_delays = [
            delay(config.branch_delay_ms),
            delay(config.branch_delay_ms),
            delay(config.branch_delay_ms),
            delay(config.branch_delay_ms),
        ];
        let compose_delay = delay(config.compose_delay_ms);
        let build_delay = delay(config.build_delay_ms);
        let failing_branch = rng
            .gen_bool(config.failure_probability.clamp(0.0, 1.0))
            .then(|| rng.gen_range(0..BRANCHES.len()));

        Self {
            plan_delay,
            branch_delays,
            failing_branch,
            compose_delay,
            build_delay,
        }
    }
}

struct Emitter {
    run_id: String,
    events: mpsc::UnboundedSender<SimEvent>,
}

impl Emitter {
    fn send(&self, event: SimEvent) -> Result<(), SimulationError> {
        self.events
            .send(event)
            .map_err(|_| SimulationError::EventChannelClosed)
    }

    fn status(&self, status: Status) -> Result<(), SimulationError> {
        self.send(SimEvent::Status {
            id: self.run_id.clone(),
            status,
        })
    }

    fn step(&self, step: &RunStep) -> Result<(), SimulationError> {
        self.send(SimEvent::Step {
            id: self.run_id.clone(),
            step: step.clone(),
        })
    }

    /// Emit `step` as running, wait, then emit its terminal state.
    async fn run_step(
        &self,
        mut step: RunStep,
        delay: Duration,
        fails: bool,
    ) -> Result<(), SimulationError> {
        let copy = dag::step_copy(&step.key());

        step.status = Status::Running;
        if let Some(copy) = copy {
            step.logs.push(copy.doing.to_string());
        }
        self.step(&step)?;

        tokio::time::sleep(delay).await;

        if fails {
            step.status = Status::Error;
            step.logs.push(format!("{} failed", step.key()));
        } else {
            step.status = Status::Done;
            if let Some(copy) = copy {
                step.logs.push(copy.done.to_string());
            }
        }
        self.step(&step)
    }
}

async fn simulate(emitter: Emitter, plan: RunPlan) -> Result<(), SimulationError> {
    let started = tokio::time::Instant::now();
    emitter.status(Status::Running)?;
    emitter.send(SimEvent::Route {
        id: emitter.run_id.clone(),
        route: dag::route(),
    })?;

    emitter
        .run_step(
            new_step(StepRole::Plan, AgentId::Router, "plan"),
            plan.plan_delay,
            false,
        )
        .await?;

    // All four branches are polled once before any of them sleeps, so every
    // `running` event precedes every terminal branch event.
    let branches = BRANCHES.iter().enumerate().map(|(i, (agent, name))| {
        emitter.run_step(
            new_step(StepRole::Action, *agent, name),
            plan.branch_delays[i],
            plan.failing_branch == Some(i),
        )
    });
    for outcome in join_all(branches).await {
        outcome?;
    }

    emitter
        .run_step(
            new_step(StepRole::Summarize, AgentId::Strategy, "compose"),
            plan.compose_delay,
            false,
        )
        .await?;
    emitter
        .run_step(
            new_step(StepRole::Summarize, AgentId::Report, "build"),
            plan.build_delay,
            false,
        )
        .await?;

    emitter.status(Status::Done)?;
    info!(
        run = %emitter.run_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        failed_branch = ?plan.failing_branch.map(|i| BRANCHES[i].0),
        "Simulation finished"
    );
    Ok(())
}

fn new_step(role: StepRole, agent: AgentId, name: &str) -> RunStep {
    RunStep::new(create_id("st"), role, agent, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn seeded(failure_probability: f64, seed: u64) -> SimulationConfig {
        SimulationConfig {
            failure_probability,
            seed: Some(seed),
            ..SimulationConfig::default()
        }
    }

    fn simulate_request(id: &str) -> SimRequest {
        SimRequest::Simulate {
            id: id.to_string(),
            prompt: "test".to_string(),
            selected_agents: vec![],
        }
    }

    async fn collect_run(events: &mut mpsc::UnboundedReceiver<SimEvent>) -> Vec<SimEvent> {
        let mut out = Vec::new();
        while let Some(event) = events.recv().await {
            let terminal = matches!(
                event,
                SimEvent::Status {
                    status: Status::Done,
                    ..
                } | SimEvent::Error { .. }
            );
            out.push(event);
            if terminal {
                break;
            }
        }
        out
    }

    fn step_events(events: &[SimEvent]) -> Vec<&RunStep> {
        events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Step { step, .. } => Some(step),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn emits_ordered_lifecycle() {
        let (worker, mut events) = SimulationWorker::spawn(seeded(0.0, 7));
        tokio_test::assert_ok!(worker.post(simulate_request("run_1")));
        let events = collect_run(&mut events).await;

        assert!(matches!(
            events[0],
            SimEvent::Status {
                status: Status::Running,
                ..
            }
        ));
        assert!(matches!(events[1], SimEvent::Route { .. }));
        assert!(matches!(
            events.last(),
            Some(SimEvent::Status {
                status: Status::Done,
                ..
            })
        ));
        assert!(events.iter().all(|e| e.run_id() == "run_1"));

        // Every step goes running then done, and nothing else.
        let steps = step_events(&events);
        let mut seen: HashMap<&str, Vec<Status>> = HashMap::new();
        for step in &steps {
            seen.entry(step.id.as_str()).or_default().push(step.status);
        }
        assert_eq!(seen.len(), 6);
        for statuses in seen.values() {
            assert_eq!(statuses, &vec![Status::Running, Status::Done]);
        }

        let position = |key: &str, status: Status| {
            steps
                .iter()
                .position(|s| s.key() == key && s.status == status)
                .unwrap()
        };
        let plan_done = position("router.plan", Status::Done);
        let compose_running = position("strategy.compose", Status::Running);
        let branch_running: Vec<usize> = BRANCHES
            .iter()
            .map(|(a, n)| position(&format!("{}.{}", a, n), Status::Running))
            .collect();
        let branch_done: Vec<usize> = BRANCHES
            .iter()
            .map(|(a, n)| position(&format!("{}.{}", a, n), Status::Done))
            .collect();

        // Plan strictly before the fan-out.
        assert!(branch_running.iter().all(|&p| p > plan_done));
        // True fan-out: all branches start before any finishes.
        let last_start = *branch_running.iter().max().unwrap();
        let first_finish = *branch_done.iter().min().unwrap();
        assert!(last_start < first_finish);
        // Fan-in barrier before composition.
        assert!(branch_done.iter().all(|&p| p < compose_running));
        assert!(position("strategy.compose", Status::Done) < position("report.build", Status::Running));
    }

    #[tokio::test(start_paused = true)]
    async fn forced_failure_hits_exactly_one_branch() {
        let (worker, mut events) = SimulationWorker::spawn(seeded(1.0, 42));
        tokio_test::assert_ok!(worker.post(simulate_request("run_1")));
        let events = collect_run(&mut events).await;

        let steps = step_events(&events);
        let terminal: Vec<&&RunStep> = steps
            .iter()
            .filter(|s| s.role == StepRole::Action && s.status.is_terminal())
            .collect();
        assert_eq!(terminal.len(), 4);
        assert_eq!(terminal.iter().filter(|s| s.status == Status::Error).count(), 1);
        assert_eq!(terminal.iter().filter(|s| s.status == Status::Done).count(), 3);

        // The run still completes.
        assert!(matches!(
            events.last(),
            Some(SimEvent::Status {
                status: Status::Done,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn same_seed_same_plan() {
        let config = seeded(0.5, 99);
        let mut a = StdRng::seed_from_u64(99);
        let mut b = StdRng::seed_from_u64(99);
        assert_eq!(RunPlan::draw(&config, &mut a), RunPlan::draw(&config, &mut b));
    }

    #[tokio::test(start_paused = true)]
    async fn delays_stay_in_range() {
        let config = SimulationConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let plan = RunPlan::draw(&config, &mut rng);
            assert!((350..=700).contains(&(plan.plan_delay.as_millis() as u64)));
            for d in plan.branch_delays {
                assert!((600..=1200).contains(&(d.as_millis() as u64)));
            }
            assert!((500..=900).contains(&(plan.compose_delay.as_millis() as u64)));
            assert!((400..=800).contains(&(plan.build_delay.as_millis() as u64)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_runs_keep_their_own_order() {
        let (worker, mut events) = SimulationWorker::spawn(seeded(0.0, 3));
        tokio_test::assert_ok!(worker.post(simulate_request("run_a")));
        tokio_test::assert_ok!(worker.post(simulate_request("run_b")));

        let mut per_run: HashMap<String, Vec<SimEvent>> = HashMap::new();
        let mut finished = 0;
        while finished < 2 {
            let event = events.recv().await.unwrap();
            if matches!(
                event,
                SimEvent::Status {
                    status: Status::Done,
                    ..
                }
            ) {
                finished += 1;
            }
            per_run.entry(event.run_id().to_string()).or_default().push(event);
        }

        for events in per_run.values() {
            assert!(matches!(events[1], SimEvent::Route { .. }));
            assert_eq!(step_events(events).len(), 12);
        }
    }

    #[tokio::test]
    async fn panicking_run_reports_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        fn crash() -> Result<(), SimulationError> {
            panic!("agent crashed")
        }
        let run = tokio::spawn(async { crash() });
        supervise("run_1".to_string(), run, tx).await;

        match rx.recv().await {
            Some(SimEvent::Error { id, error }) => {
                assert_eq!(id, "run_1");
                assert!(error.contains("agent crashed"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn shutdown_rejects_new_requests() {
        let (worker, _events) = SimulationWorker::spawn(seeded(0.0, 1));
        worker.shutdown();
        assert!(matches!(
            worker.post(simulate_request("run_1")),
            Err(SimulationError::WorkerUnavailable)
        ));
        assert!(!worker.is_running());
    }
}
