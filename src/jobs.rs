//! # Job Wiring
//!
//! Task handlers for every hook the service runs, the registry that maps
//! hook names to them, and the standing recurring schedules registered at
//! startup. Fan-out jobs enumerate stored entities and enqueue one
//! single-target task per entity; they never run checks inline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::health::HealthCheckRunner;
use crate::queue::{HandlerRegistry, TaskHandler, TaskPayload, TaskQueue, hooks};
use crate::repositories::{AppConnectionRepository, RepoRepository};
use crate::sync::RepositorySyncEngine;

/// Runs a full repository sync across all connections.
pub struct SyncAllConnectionsJob {
    engine: Arc<RepositorySyncEngine>,
}

#[async_trait]
impl TaskHandler for SyncAllConnectionsJob {
    async fn handle(&self, _payload: TaskPayload) -> anyhow::Result<()> {
        self.engine.run().await
    }
}

/// Enqueues one single-connection health check per stored connection.
pub struct HealthCheckAllConnectionsJob {
    connections: AppConnectionRepository,
    queue: Arc<dyn TaskQueue>,
}

#[async_trait]
impl TaskHandler for HealthCheckAllConnectionsJob {
    async fn handle(&self, _payload: TaskPayload) -> anyhow::Result<()> {
        let connections = self.connections.list_all().await?;
        let count = connections.len();
        for connection in connections {
            self.queue.enqueue_async(
                hooks::HEALTH_CHECK_SINGLE_CONNECTION,
                json!({ "connection_id": connection.id }),
            );
        }
        info!(count, "Fanned out connection health checks");
        Ok(())
    }
}

/// Enqueues one single-repository health check per stored repository.
pub struct HealthCheckAllRepositoriesJob {
    repos: RepoRepository,
    queue: Arc<dyn TaskQueue>,
}

#[async_trait]
impl TaskHandler for HealthCheckAllRepositoriesJob {
    async fn handle(&self, _payload: TaskPayload) -> anyhow::Result<()> {
        let repositories = self.repos.list_all().await?;
        let count = repositories.len();
        for repository in repositories {
            self.queue.enqueue_async(
                hooks::HEALTH_CHECK_SINGLE_REPOSITORY,
                json!({ "full_name": repository.full_name }),
            );
        }
        info!(count, "Fanned out repository health checks");
        Ok(())
    }
}

/// Checks one connection identified by the task payload.
pub struct HealthCheckSingleConnectionJob {
    runner: Arc<HealthCheckRunner>,
}

#[async_trait]
impl TaskHandler for HealthCheckSingleConnectionJob {
    async fn handle(&self, payload: TaskPayload) -> anyhow::Result<()> {
        let id: Uuid = payload
            .get("connection_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| anyhow::anyhow!("task payload missing connection_id: {}", payload))?;
        self.runner.check_connection(&id).await
    }
}

/// Checks one repository identified by the task payload.
pub struct HealthCheckSingleRepositoryJob {
    runner: Arc<HealthCheckRunner>,
}

#[async_trait]
impl TaskHandler for HealthCheckSingleRepositoryJob {
    async fn handle(&self, payload: TaskPayload) -> anyhow::Result<()> {
        let full_name = payload
            .get("full_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("task payload missing full_name: {}", payload))?;
        self.runner.check_repository(full_name).await
    }
}

/// Builds the hook-to-handler table installed into the queue at startup.
pub fn build_handler_registry(
    engine: Arc<RepositorySyncEngine>,
    runner: Arc<HealthCheckRunner>,
    connections: AppConnectionRepository,
    repos: RepoRepository,
    queue: Arc<dyn TaskQueue>,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(
        hooks::SYNC_ALL_CONNECTIONS,
        Arc::new(SyncAllConnectionsJob { engine }),
    );
    registry.register(
        hooks::HEALTH_CHECK_ALL_CONNECTIONS,
        Arc::new(HealthCheckAllConnectionsJob {
            connections,
            queue: Arc::clone(&queue),
        }),
    );
    registry.register(
        hooks::HEALTH_CHECK_ALL_REPOSITORIES,
        Arc::new(HealthCheckAllRepositoriesJob { repos, queue }),
    );
    registry.register(
        hooks::HEALTH_CHECK_SINGLE_CONNECTION,
        Arc::new(HealthCheckSingleConnectionJob {
            runner: Arc::clone(&runner),
        }),
    );
    registry.register(
        hooks::HEALTH_CHECK_SINGLE_REPOSITORY,
        Arc::new(HealthCheckSingleRepositoryJob { runner }),
    );
    registry
}

/// Registers the standing recurring jobs: the hourly sync plus the two
/// daily health fan-outs, each offset by its own startup delay so they do
/// not land on the sync cadence.
pub fn register_standing_jobs(queue: &dyn TaskQueue, scheduler: &SchedulerConfig) {
    queue.schedule_recurring(
        hooks::SYNC_ALL_CONNECTIONS,
        Duration::from_secs(scheduler.sync_interval_seconds),
        Duration::from_secs(60),
    );
    queue.schedule_recurring(
        hooks::HEALTH_CHECK_ALL_CONNECTIONS,
        Duration::from_secs(scheduler.health_interval_seconds),
        Duration::from_secs(scheduler.health_initial_delay_seconds),
    );
    queue.schedule_recurring(
        hooks::HEALTH_CHECK_ALL_REPOSITORIES,
        Duration::from_secs(scheduler.health_interval_seconds),
        Duration::from_secs(scheduler.health_initial_delay_seconds.saturating_mul(2)),
    );
}
