//! Composition root: one instance of every service, wired together.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::auth::api::{AuthApi, AuthService};
use crate::auth::scheduler::RefreshScheduler;
use crate::auth::session::SessionStore;
use crate::auth::token_manager::{TokenManager, TransportRefreshApi};
use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::http::client::ApiClient;
use crate::http::error::ApiError;
use crate::http::navigator::{MemoryNavigator, Navigator};
use crate::http::pending::ApiRequestTracker;
use crate::http::transport::{HttpTransport, ReqwestTransport};
use crate::workbench::agents::AgentsStore;
use crate::workbench::composer::ComposerStore;
use crate::workbench::storage::{SessionStorage, StorageError};
use crate::workbench::store::RunStore;
use crate::workbench::types::{Autonomy, EnqueueInput};
use crate::workbench::worker::{SimulationError, SimulationWorker, WorkerHandle};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP client setup failed: {0}")]
    Http(#[from] ApiError),

    #[error("Session storage unavailable: {0}")]
    Storage(#[from] StorageError),
}

pub struct App {
    pub config: Config,
    pub session: Arc<SessionStore>,
    pub tokens: Arc<TokenManager>,
    pub scheduler: Arc<RefreshScheduler>,
    pub client: Arc<ApiClient>,
    pub auth: AuthService,
    pub requests: Arc<ApiRequestTracker>,
    pub navigator: Arc<dyn Navigator>,
    pub storage: Arc<SessionStorage>,
    pub runs: Arc<RunStore>,
    pub agents: AgentsStore,
    pub composer: ComposerStore,
    worker: WorkerHandle,
}

impl App {
    /// Build the application against the real backend. Must be called from
    /// within a tokio runtime.
    pub fn new(config: Config) -> Result<Self, AppError> {
        let transport = Arc::new(ReqwestTransport::new(&config.api)?);
        let navigator = Arc::new(MemoryNavigator::new("/"));
        Self::with_parts(config, transport, navigator, Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: Config,
        transport: Arc<dyn HttpTransport>,
        navigator: Arc<dyn Navigator>,
        clock: SharedClock,
    ) -> Result<Self, AppError> {
        let storage = Arc::new(match &config.session_state_path {
            Some(path) => SessionStorage::open(path)?,
            None => SessionStorage::in_memory(),
        });

        let session = Arc::new(SessionStore::new());
        let tokens = Arc::new(TokenManager::new(
            session.clone(),
            Arc::new(TransportRefreshApi::new(transport.clone())),
            clock.clone(),
            config.token.clone(),
        ));
        let scheduler = RefreshScheduler::new(
            tokens.clone(),
            session.clone(),
            navigator.clone(),
            config.login_path.clone(),
        );
        let client = Arc::new(ApiClient::new(
            transport,
            tokens.clone(),
            navigator.clone(),
            &config,
        ));
        let requests = Arc::new(ApiRequestTracker::new());
        let auth = AuthService::new(
            AuthApi::new(client.clone()),
            session.clone(),
            requests.clone(),
            navigator.clone(),
            config.login_path.clone(),
        );

        let (worker, events) = SimulationWorker::spawn(config.simulation.clone());
        let runs = RunStore::new(worker.clone(), events, storage.clone(), clock);
        let agents = AgentsStore::new(storage.clone());
        let composer = ComposerStore::new(storage.clone());

        info!(
            base_url = %config.api.base_url,
            persistent = config.session_state_path.is_some(),
            "Application initialized"
        );

        Ok(Self {
            config,
            session,
            tokens,
            scheduler,
            client,
            auth,
            requests,
            navigator,
            storage,
            runs,
            agents,
            composer,
            worker,
        })
    }

    /// Submit a prompt with the current agent selection and start it.
    /// Blank prompts are ignored.
    pub async fn submit_prompt(
        &self,
        prompt: &str,
        autonomy: Autonomy,
    ) -> Result<Option<String>, SimulationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Ok(None);
        }

        let id = self
            .runs
            .enqueue(EnqueueInput {
                prompt: prompt.to_string(),
                autonomy,
                selected_agents: self.agents.selected(),
            })
            .await;
        self.runs.simulate(&id).await?;
        Ok(Some(id))
    }

    /// Load a preset prompt into the composer and focus it.
    pub fn pick_preset(&self, prompt: &str) {
        self.composer.set_draft(prompt);
        self.composer.request_focus();
    }

    /// Stop background tasks. Runs already in flight still finish.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.worker.shutdown();
        info!("Application shut down");
    }
}
