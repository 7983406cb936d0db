use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rusqlite::Connection;
use tokio::sync::watch;
use tracing::info;

use mentor_agent::anthropic::AnthropicProvider;
use mentor_agent::collaborator::ConversationStoreClient;
use mentor_agent::persist::ConversationSink;
use mentor_agent::provider::LlmProvider;
use mentor_agent::AgentRunner;
use mentor_background::{Scheduler, TaskExecutor, TaskRegistry, TaskRunStore};
use mentor_core::config::MentorConfig;
use mentor_memory::ActivityTracker;
use mentor_store::BlockService;
use mentor_workspace::WorkspaceManager;

use mentor_gateway::app;

#[derive(Parser)]
#[command(name = "mentor-gateway", about = "Personal-tutoring agent runtime")]
struct Args {
    /// Path to mentor.toml (defaults to MENTOR_CONFIG or ./mentor.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mentor_gateway=info,mentor_background=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = MentorConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({e}), using defaults");
        MentorConfig::default()
    });

    std::fs::create_dir_all(&config.storage.data_root)?;
    if let Some(parent) = Path::new(&config.storage.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Storage layers. The SQLite subsystems each hold their own connection
    // to the shared database file.
    let blocks = Arc::new(BlockService::new(&config.storage.data_root));
    let workspaces = Arc::new(WorkspaceManager::new(
        &config.storage.data_root,
        config.workspace.shared_path.as_deref(),
        config.workspace.max_file_bytes,
    ));
    let activity = Arc::new(ActivityTracker::new(Connection::open(&config.storage.db_path)?)?);
    let registry = Arc::new(TaskRegistry::new(Connection::open(&config.storage.db_path)?)?);
    let runs = Arc::new(TaskRunStore::new(Connection::open(&config.storage.db_path)?)?);

    // LLM provider and the conversation-store collaborator.
    let provider: Arc<dyn LlmProvider> = Arc::new(AnthropicProvider::new(
        config.llm.api_key.clone(),
        None,
        config.llm.timeout_seconds,
    ));
    let collaborator = Arc::new(ConversationStoreClient::new(&config.conversation_store));
    let sink = ConversationSink::start(collaborator.clone());

    let runner = Arc::new(AgentRunner::new(
        provider.clone(),
        blocks.clone(),
        workspaces.clone(),
        activity.clone(),
        collaborator.clone(),
        sink,
        config.llm.model.clone(),
        config.llm.max_tokens,
    ));

    let executor = Arc::new(TaskExecutor::new(
        provider,
        blocks.clone(),
        workspaces.clone(),
        activity.clone(),
        collaborator,
        runs.clone(),
        config.llm.model.clone(),
        config.llm.max_tokens,
    ));

    let scheduler = Arc::new(Scheduler::new(
        registry.clone(),
        executor,
        activity.clone(),
        config.scheduler.tick_seconds,
        config.scheduler.max_concurrent_dispatches,
        Duration::from_secs(config.scheduler.shutdown_grace_seconds),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = tokio::spawn(scheduler.clone().run(shutdown_rx));

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState {
        config,
        blocks,
        workspaces,
        activity,
        runner,
        registry,
        scheduler,
        runs,
    });
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Mentor gateway listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Stop the scheduler and await in-flight dispatches before exit.
    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;
    info!("Mentor gateway stopped");

    Ok(())
}
