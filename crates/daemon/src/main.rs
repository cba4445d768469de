mod config;
mod log_ui;

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use chatsync_api_client::ApiClient;
use chatsync_core::{ChatId, UserId, UserRole, Viewer};
use chatsync_session::{SessionStore, SyncOutcome};

#[derive(Parser)]
#[command(name = "chatsync", about = "Keep a local replica of a chat session in sync")]
struct Cli {
    /// Config file (default: $CHATSYNC_CONFIG or the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the server base URL
    #[arg(long)]
    server: Option<String>,

    /// Chat to follow (default: first root chat)
    #[arg(long)]
    chat: Option<ChatId>,

    /// Signed-in user id, used for delete permission checks
    #[arg(long)]
    user_id: Option<UserId>,

    /// Treat the signed-in user as an admin
    #[arg(long)]
    admin: bool,

    /// Sync once and exit instead of polling
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into())
                .add_directive("chatsync=info".parse().unwrap_or_else(|_| tracing::Level::INFO.into()))
                .add_directive(
                    "chatsync_session=info"
                        .parse()
                        .unwrap_or_else(|_| tracing::Level::INFO.into()),
                ),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        error!("chatsync fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = config::load(cli.config.as_deref(), cli.server.as_deref())?;
    info!("chatsync starting against {}", cfg.server.url);

    let api = ApiClient::from_config(&cfg).context("Failed to build HTTP client")?;
    let viewer = Viewer {
        user_id: cli.user_id,
        role: if cli.admin {
            UserRole::Admin
        } else {
            UserRole::Developer
        },
    };
    let store = SessionStore::new(api, &cfg.sync, viewer, Arc::new(log_ui::LogUi));

    let forest = store
        .refresh_chats()
        .await
        .context("Failed to list chats")?;
    let Some(chat_id) = cli.chat.or_else(|| forest.first().map(|c| c.id)) else {
        bail!("No chats available; create one first");
    };

    match store.select_chat(chat_id).await {
        SyncOutcome::Failed(e) => bail!("Initial sync of chat {chat_id} failed: {e}"),
        SyncOutcome::TooManyChatSwitches => {
            bail!("Server kept switching away from chat {chat_id}")
        }
        outcome => info!("Following chat {chat_id} ({outcome:?})"),
    }

    if cli.once {
        store.teardown();
        return Ok(());
    }

    store.start_polling();
    wait_for_shutdown().await;

    info!("Shutdown signal received, stopping...");
    store.teardown();
    if store.errors().backend_down {
        warn!("Backend was unavailable at shutdown");
    }
    info!("chatsync stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
                return;
            }
            _ => warn!("Failed to register signal handlers, falling back to Ctrl+C"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to wait for Ctrl+C: {e}");
        return;
    }
    info!("Received Ctrl+C");
}
