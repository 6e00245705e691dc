use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ens_domain::config::Config;
use ens_domain::event::EngineEvent;
use ens_gateway::api;
use ens_gateway::cli::{Cli, Command};
use ens_gateway::dispatcher::{self, DispatchRequest};
use ens_gateway::state::AppState;
use ens_providers::{OpenAiCompleter, ReplayMode};
use ens_trace::TraceJournal;

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ENSEMBLE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let completer =
        Arc::new(OpenAiCompleter::from_config(&config.llm).context("initializing model provider")?);
    Ok(AppState::from_config(config, completer)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Arc::new(Config::load(&cli.config)?);

    match cli.command {
        None | Some(Command::Serve) => serve(config).await,
        Some(Command::Run {
            pipeline,
            task,
            session,
            seed,
            github,
            jira,
        }) => {
            let code = run_once(config, pipeline, task, session, seed, github, jira).await?;
            std::process::exit(code);
        }
        Some(Command::Replay { journal, lenient }) => {
            let code = replay(journal, lenient).await?;
            std::process::exit(code);
        }
    }
}

async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
    let state = build_state(config.clone())?;
    let app = api::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "ensemble gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_once(
    config: Arc<Config>,
    pipeline: String,
    task: String,
    session: Option<String>,
    seed: Option<String>,
    github: Option<String>,
    jira: Option<String>,
) -> anyhow::Result<i32> {
    let state = build_state(config)?;

    let mut request = DispatchRequest::new(pipeline, task);
    request.session_id = session;
    request.seed = seed;
    if let Some(reference) = github {
        request.inputs.insert("github".into(), reference.into());
    }
    if let Some(reference) = jira {
        request.inputs.insert("jira".into(), reference.into());
    }

    let (run_id, mut rx) = dispatcher::dispatch(&state, request)?;
    tracing::info!(%run_id, "run started");

    let mut exit_code = 1;
    while let Some(event) = rx.recv().await {
        match &event {
            EngineEvent::Log { text } => println!("{text}"),
            EngineEvent::Token { text } => println!("{text}"),
            EngineEvent::Answer { text } => println!("{text}"),
            EngineEvent::Sources { json } => println!("sources: {json}"),
            EngineEvent::Report { payload } => {
                println!("{}", serde_json::to_string_pretty(payload)?)
            }
            EngineEvent::Done { payload } => {
                let status = payload
                    .get("status")
                    .and_then(|v| v.as_str())
                    .unwrap_or("failed");
                println!("status: {status}");
                if let Some(error) = payload.get("error").and_then(|v| v.as_str()) {
                    println!("error: {error}");
                }
                exit_code = i32::from(status != "completed");
            }
        }
    }
    Ok(exit_code)
}

async fn replay(journal_path: std::path::PathBuf, lenient: bool) -> anyhow::Result<i32> {
    let events = TraceJournal::load_file(&journal_path)?;
    let mode = if lenient {
        ReplayMode::Lenient
    } else {
        ReplayMode::Strict
    };

    let outcome = ens_engines::replay_run::replay_graph(&events, mode).await?;

    println!(
        "replayed {} events against {} recorded",
        outcome.events.len(),
        events.len()
    );
    for token in &outcome.tokens {
        println!("{token}");
    }

    if outcome.report.is_match() {
        println!("replay matched the original run");
        Ok(0)
    } else {
        println!("replay DIVERGED:");
        for mismatch in &outcome.report.mismatches {
            println!("  - {mismatch}");
        }
        Ok(1)
    }
}
