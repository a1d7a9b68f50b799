//! # Repository Sync Engine
//!
//! Orchestrates per-connection repository discovery: pages through every
//! repository an installation can access, upserts the rows, replaces the
//! connection's accessible set wholesale, then fans out one async health
//! check per repository. Failures are contained at the entity boundary so
//! one bad connection or row never blocks the rest of the run.

use std::sync::Arc;

use metrics::{counter, histogram};
use serde_json::json;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::github::GitHubApi;
use crate::models::app_connection;
use crate::queue::{TaskQueue, hooks};
use crate::repositories::repository::RepoUpsert;
use crate::repositories::{AppConnectionRepository, RepoRepository};

/// Orchestrator for periodic repository discovery across all connections.
pub struct RepositorySyncEngine {
    connections: AppConnectionRepository,
    repos: RepoRepository,
    github: Arc<dyn GitHubApi>,
    queue: Arc<dyn TaskQueue>,
}

#[derive(Debug, Default)]
struct RunStats {
    connections_synced: u64,
    connections_skipped: u64,
    connections_failed: u64,
    repositories_seen: u64,
}

impl RepositorySyncEngine {
    pub fn new(
        connections: AppConnectionRepository,
        repos: RepoRepository,
        github: Arc<dyn GitHubApi>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            connections,
            repos,
            github,
            queue,
        }
    }

    /// Sync every app connection. One connection's failure is logged and
    /// does not abort the remaining connections.
    #[instrument(skip_all)]
    pub async fn run(&self) -> anyhow::Result<()> {
        let started = Instant::now();
        let mut stats = RunStats::default();

        let connections = self.connections.list_all().await?;
        if connections.is_empty() {
            info!("No app connections configured; nothing to sync");
            return Ok(());
        }

        for connection in &connections {
            match self.sync_one(connection).await {
                Ok(SyncOutcome::Synced { repositories }) => {
                    stats.connections_synced += 1;
                    stats.repositories_seen += repositories;
                }
                Ok(SyncOutcome::Skipped) => stats.connections_skipped += 1,
                Err(err) => {
                    stats.connections_failed += 1;
                    counter!("sync_connection_failures_total").increment(1);
                    error!(
                        slug = %connection.slug,
                        error = ?err,
                        "Repository sync failed for connection"
                    );
                }
            }
        }

        histogram!("sync_run_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
        info!(
            synced = stats.connections_synced,
            skipped = stats.connections_skipped,
            failed = stats.connections_failed,
            repositories = stats.repositories_seen,
            "Repository sync run completed"
        );

        Ok(())
    }

    /// Sync a single connection: fetch, upsert, replace the accessible set,
    /// then fan out health checks. The accessible set is replaced only
    /// after every upsert for the pass has completed, so a fan-out task can
    /// never reference a row that does not exist yet.
    pub async fn sync_one(
        &self,
        connection: &app_connection::Model,
    ) -> anyhow::Result<SyncOutcome> {
        let Some(installation_id) = connection.installation_id else {
            info!(
                slug = %connection.slug,
                "Connection has no installation id yet; skipping sync"
            );
            return Ok(SyncOutcome::Skipped);
        };

        let records = self
            .github
            .list_installation_repositories(installation_id)
            .await?;

        if records.is_empty() {
            // A valid terminal state: the installation can reach nothing.
            self.connections
                .replace_accessible_repos(&connection.id, &[])
                .await?;
            info!(
                slug = %connection.slug,
                "Installation reports no accessible repositories; cleared set"
            );
            return Ok(SyncOutcome::Synced { repositories: 0 });
        }

        let mut accessible = Vec::with_capacity(records.len());
        for record in &records {
            let upsert = RepoUpsert {
                full_name: record.full_name.clone(),
                github_id: record.id,
                is_private: record.private,
                html_url: record.html_url.clone(),
            };
            match self.repos.upsert(&upsert, connection.id).await {
                Ok(model) => accessible.push(model.full_name),
                Err(err) => {
                    // Skip the row, keep the pass going.
                    warn!(
                        slug = %connection.slug,
                        full_name = %record.full_name,
                        error = ?err,
                        "Failed to persist repository; skipping row"
                    );
                }
            }
        }

        self.connections
            .replace_accessible_repos(&connection.id, &accessible)
            .await?;

        for full_name in &accessible {
            self.queue.enqueue_async(
                hooks::HEALTH_CHECK_SINGLE_REPOSITORY,
                json!({ "full_name": full_name }),
            );
        }

        counter!("sync_repositories_seen_total").increment(accessible.len() as u64);
        info!(
            slug = %connection.slug,
            installation_id,
            repositories = accessible.len(),
            "Synced connection repositories"
        );

        Ok(SyncOutcome::Synced {
            repositories: accessible.len() as u64,
        })
    }
}

/// Result of syncing one connection.
#[derive(Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The connection was synced; `repositories` rows were seen.
    Synced { repositories: u64 },
    /// The connection is not ready to sync (no installation id).
    Skipped,
}
