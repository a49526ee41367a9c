//! tree-map: serve an annotatable view of a project directory.
//!
//! Subcommands:
//! - `serve` (default): scan the root, pick a state backend and serve the page
//! - `migrate`: copy local state files into the remote document store

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tree_core::persistence::{open_backend, RemoteConnector};
use tree_core::SyncService;
use tree_server::config::{Settings, SettingsArgs};
use tree_server::migrate::migrate_state_root;
use tree_server::page::{folder_icon_data_uri, render_page};
use tree_server::remote::StoreConnector;
use tree_server::{router, AppState};

#[derive(Parser, Debug)]
#[command(name = "tree-map")]
#[command(about = "Browse and annotate a project directory tree")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    settings: SettingsArgs,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Serve the tree page (default)
    Serve,
    /// Upsert every local state file into the remote store
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tree_map=info,tree_server=info,tree_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Settings::resolve(&cli.settings)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings).await,
        Command::Migrate => migrate(settings).await,
    }
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    let root = settings.canonical_root()?;
    let source = settings.tree_source(root);
    let project = source.project_name();

    let connector = StoreConnector::new(settings.remote_timeout);
    let backend = open_backend(&settings.backend_options(&project), &connector)
        .await
        .context("Failed to open the state backend")?;
    let service = Arc::new(SyncService::new(source, backend).await);

    let folder_icon = settings
        .folder_icon
        .as_deref()
        .and_then(folder_icon_data_uri);
    let page = render_page(service.page_snapshot(), folder_icon.as_deref());

    if let Some(path) = &settings.output_html {
        match tokio::fs::write(path, &page).await {
            Ok(()) => tracing::info!("Wrote page copy to {:?}", path),
            Err(e) => tracing::warn!("Failed to write page copy to {:?}: {}", path, e),
        }
    }

    let app = router(Arc::new(AppState {
        service: service.clone(),
        page,
        stylesheet: settings.stylesheet.clone(),
    }));

    let listener = tokio::net::TcpListener::bind((settings.bind.as_str(), settings.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", settings.bind, settings.port))?;
    let addr = listener.local_addr()?;

    tracing::info!("Serving {} ({} backend)", project, service.backend_kind());
    tracing::info!("Open http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = service.close().await {
        tracing::warn!("Failed to close the state backend: {}", e);
    }
    tracing::info!("Tree server shut down");
    Ok(())
}

async fn migrate(settings: Settings) -> anyhow::Result<()> {
    let remote = settings
        .remote()
        .context("Migration needs a remote connection string (--remote-uri or TREE_REMOTE_URI)")?;
    let collection = StoreConnector::new(settings.remote_timeout)
        .connect(&remote)
        .await
        .context("Failed to connect to the remote store")?;

    let report = migrate_state_root(&settings.state_root, collection.clone()).await?;
    if let Err(e) = collection.close().await {
        tracing::warn!("Failed to close the remote store: {}", e);
    }
    for (project, error) in &report.failed {
        tracing::error!("{}: {}", project, error);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
