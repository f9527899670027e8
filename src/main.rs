//! dontcare - headless workbench driver
//!
//! Optionally logs in, submits the prompt given on the command line and
//! follows the run until it finishes.

use anyhow::Context;
use dontcare::{app::App, config::Config, workbench::Autonomy};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_PROMPT: &str = "Give me a quick take on NVDA";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let default_filter = if config.dev_mode {
        "dontcare=debug"
    } else {
        "dontcare=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Loaded configuration: base_url={}", config.api.base_url);

    let app = App::new(config)?;

    if let (Ok(email), Ok(password)) = (
        std::env::var("DONTCARE_EMAIL"),
        std::env::var("DONTCARE_PASSWORD"),
    ) {
        match app.auth.login(&email, &password).await {
            Ok(user) => {
                info!("Logged in as {}", user.email);
                app.scheduler.start();
            }
            Err(e) => warn!("Login failed, continuing signed out: {}", e),
        }
    }

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let prompt = if prompt.trim().is_empty() {
        DEFAULT_PROMPT.to_string()
    } else {
        prompt
    };

    let mut changes = app.runs.subscribe();
    let id = app
        .submit_prompt(&prompt, Autonomy::Ask)
        .await?
        .context("prompt was empty")?;

    let follow = {
        let runs = app.runs.clone();
        let id = id.clone();
        tokio::spawn(async move {
            while let Ok(changed) = changes.recv().await {
                if changed != id {
                    continue;
                }
                if let Some(run) = runs.get(&id).await {
                    info!(
                        status = %run.status,
                        steps = run.steps.len(),
                        progress = run.progress(),
                        "Run updated"
                    );
                    if run.status.is_terminal() {
                        break;
                    }
                }
            }
        })
    };

    let run = app
        .runs
        .wait_for_terminal(&id)
        .await
        .context("run disappeared")?;
    follow.abort();

    for step in &run.steps {
        info!(step = %step.key(), status = %step.status, "{}", step.logs.join(" / "));
    }
    info!(
        run = %run.id,
        status = %run.status,
        partial_failure = run.has_step_errors(),
        "Run finished"
    );

    if app.session.is_authenticated() {
        app.auth.logout().await;
    }
    app.shutdown();

    Ok(())
}
