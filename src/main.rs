//! # GitHub Sync Main Entry Point
//!
//! Wires configuration, persistence, the task queue, the sync engine and
//! the webhook reconciler together, registers the standing recurring jobs
//! and serves the HTTP surface until shutdown.

use std::sync::Arc;

use migration::{Migrator, MigratorTrait};
use tokio_util::sync::CancellationToken;
use tracing::info;

use github_sync::cache::{ReleaseNotifier, UpdateCache};
use github_sync::config::ConfigLoader;
use github_sync::db::init_pool;
use github_sync::github::{GitHubApi, HttpGitHubClient, StaticTokenProvider};
use github_sync::health::HealthCheckRunner;
use github_sync::jobs::{build_handler_registry, register_standing_jobs};
use github_sync::queue::{TaskQueue, TokioTaskQueue};
use github_sync::repositories::{AppConnectionRepository, RepoRepository};
use github_sync::server::{AppState, run_server};
use github_sync::sync::RepositorySyncEngine;
use github_sync::telemetry;
use github_sync::webhook::WebhookReconciler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(ConfigLoader::new().load()?);
    telemetry::init_tracing(&config)?;

    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        info!("Configuration: {}", redacted_json);
    }

    let db = init_pool(&config).await?;
    Migrator::up(&db, None).await?;

    let shutdown = CancellationToken::new();

    let connections = AppConnectionRepository::new(Arc::new(db.clone()));
    let repos = RepoRepository::new(Arc::new(db.clone()));
    let github: Arc<dyn GitHubApi> = Arc::new(HttpGitHubClient::new(
        config.github_api_base.clone(),
        Arc::new(StaticTokenProvider::new(config.github_token.clone())),
        config.github_max_pages,
    ));

    let queue = TokioTaskQueue::new(shutdown.clone(), config.scheduler.jitter_pct_max);
    let queue_dyn: Arc<dyn TaskQueue> = queue.clone();

    let engine = Arc::new(RepositorySyncEngine::new(
        connections.clone(),
        repos.clone(),
        Arc::clone(&github),
        Arc::clone(&queue_dyn),
    ));
    let runner = Arc::new(HealthCheckRunner::new(
        connections.clone(),
        repos.clone(),
        Arc::clone(&github),
    ));

    queue.install_handlers(build_handler_registry(
        engine,
        runner,
        connections.clone(),
        repos,
        Arc::clone(&queue_dyn),
    ));
    register_standing_jobs(queue_dyn.as_ref(), &config.scheduler);

    let cache = Arc::new(UpdateCache::new());
    let notifier = Arc::new(ReleaseNotifier::default());
    let reconciler = Arc::new(WebhookReconciler::new(
        connections,
        cache,
        notifier,
        config.webhook_secret.clone(),
    ));

    let state = AppState {
        db,
        config: Arc::clone(&config),
        reconciler,
    };

    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = ?err, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        server_shutdown.cancel();
    });

    run_server(state, shutdown).await
}
