pub mod api;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod rubrics;
mod scheduler;
pub mod scraping;
pub mod snapshot;
mod utils;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use api::{app_router, AppState};
use cli::{Cli, Command};
use config::{AppConfig, ConfigStore};
use db::Store;
use scraping::AfishaCatalog;
use snapshot::SnapshotStore;

pub use error::{Error, Result};

pub fn init_tracing() {
    let log_format = std::env::var("AFISHA_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config_store = match cli.config {
        Some(path) => ConfigStore::load_from(path),
        None => ConfigStore::load(),
    };
    let config = config_store.read();

    match cli.command {
        Command::Serve => {
            migrate(&config)?;
            tokio::runtime::Runtime::new()
                .context("unable to start async runtime")?
                .block_on(serve(config))
        }
        Command::Reconcile { snapshot } => {
            let store = migrate(&config)?;
            let snapshots = snapshot_store(&config);
            let result = match snapshot {
                Some(path) => reconcile::reconcile_file(&store, &snapshots, path)?,
                None => reconcile::reconcile_latest(&store, &snapshots)?.1,
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::Scrape {
            reconcile: and_reconcile,
        } => {
            let catalog = AfishaCatalog::from_config(&config)?;
            let snapshot = scraping::run_all(&catalog, &config.rubrics)?;
            let snapshots = snapshot_store(&config);
            let path = snapshots.save(&snapshot)?;
            println!("{}", path.display());
            if and_reconcile {
                let store = migrate(&config)?;
                let result = reconcile::reconcile(&store, &snapshot)?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            Ok(())
        }
        Command::Migrate => {
            migrate(&config)?;
            Ok(())
        }
        Command::Config { write } => {
            if write {
                config_store
                    .update(|_| {})
                    .map_err(|err| anyhow::anyhow!("unable to write config: {err}"))?;
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn snapshot_store(config: &AppConfig) -> SnapshotStore {
    SnapshotStore::new(&config.snapshot_dir, &config.source, &config.entity)
}

fn migrate(config: &AppConfig) -> anyhow::Result<Store> {
    let store = Store::open(&config.database_path)
        .with_context(|| format!("unable to open {}", config.database_path.display()))?;
    store.migrate().context("schema migration failed")?;
    tracing::info!("database ready at {}", config.database_path.display());
    Ok(store)
}

pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let listen_addr = config.listen_addr.clone();
    let state = Arc::new(AppState::new(config));
    scheduler::start(state.clone());

    let router = app_router(state);
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("unable to bind {listen_addr}"))?;
    tracing::info!("listening on {listen_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
