//! # Health Check Runner
//!
//! Executes a single connection or repository health check and writes the
//! result back to the corresponding store entry. A failing outbound probe
//! is recorded as `error` health with a message; it is never propagated as
//! a task failure, keeping "the target is unhealthy" distinct from "the
//! check subsystem is broken".

use std::sync::Arc;

use metrics::counter;
use tracing::{info, warn};
use uuid::Uuid;

use crate::github::GitHubApi;
use crate::models::HealthStatus;
use crate::repositories::{AppConnectionRepository, RepoRepository};

/// Executes individual health checks on behalf of queued tasks.
pub struct HealthCheckRunner {
    connections: AppConnectionRepository,
    repos: RepoRepository,
    github: Arc<dyn GitHubApi>,
}

impl HealthCheckRunner {
    pub fn new(
        connections: AppConnectionRepository,
        repos: RepoRepository,
        github: Arc<dyn GitHubApi>,
    ) -> Self {
        Self {
            connections,
            repos,
            github,
        }
    }

    /// Probe one app connection and record the outcome.
    pub async fn check_connection(&self, id: &Uuid) -> anyhow::Result<()> {
        let Some(connection) = self.connections.find_by_id(id).await? else {
            warn!(connection_id = %id, "Health check target connection no longer exists");
            return Ok(());
        };

        let (status, message) = match connection.installation_id {
            None => (
                HealthStatus::Warn,
                "no installation id bound yet".to_string(),
            ),
            Some(installation_id) => match self.github.check_installation(installation_id).await {
                Ok(()) => (HealthStatus::Ok, String::new()),
                Err(err) => (HealthStatus::Error, err.to_string()),
            },
        };

        counter!("health_checks_total", "target" => "connection", "status" => status.as_str())
            .increment(1);
        info!(
            slug = %connection.slug,
            status = %status,
            "Connection health check completed"
        );

        self.connections
            .set_health(&connection.id, status, &message)
            .await
    }

    /// Probe one repository under its managing connection and record the
    /// outcome.
    pub async fn check_repository(&self, full_name: &str) -> anyhow::Result<()> {
        let Some(repository) = self.repos.find_by_full_name(full_name).await? else {
            warn!(full_name, "Health check target repository no longer exists");
            return Ok(());
        };

        let managing = self
            .connections
            .find_by_id(&repository.managing_app_id)
            .await?;

        let (status, message) = match managing.and_then(|c| c.installation_id) {
            None => (
                HealthStatus::Warn,
                "managing connection has no installation id".to_string(),
            ),
            Some(installation_id) => {
                match self
                    .github
                    .check_repository(installation_id, &repository.full_name)
                    .await
                {
                    Ok(()) => (HealthStatus::Ok, String::new()),
                    Err(err) => (HealthStatus::Error, err.to_string()),
                }
            }
        };

        counter!("health_checks_total", "target" => "repository", "status" => status.as_str())
            .increment(1);
        info!(
            full_name = %repository.full_name,
            status = %status,
            "Repository health check completed"
        );

        self.repos
            .set_health(&repository.full_name, status, &message)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{GitHubError, RemoteRepository};
    use crate::repositories::repository::RepoUpsert;
    use async_trait::async_trait;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use std::sync::Mutex;

    struct FakeGitHub {
        failing_installations: Mutex<Vec<i64>>,
        failing_repos: Mutex<Vec<String>>,
    }

    impl FakeGitHub {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                failing_installations: Mutex::new(Vec::new()),
                failing_repos: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GitHubApi for FakeGitHub {
        async fn list_installation_repositories(
            &self,
            _installation_id: i64,
        ) -> Result<Vec<RemoteRepository>, GitHubError> {
            Ok(Vec::new())
        }

        async fn check_installation(&self, installation_id: i64) -> Result<(), GitHubError> {
            if self
                .failing_installations
                .lock()
                .unwrap()
                .contains(&installation_id)
            {
                return Err(GitHubError::Unauthorized);
            }
            Ok(())
        }

        async fn check_repository(
            &self,
            _installation_id: i64,
            full_name: &str,
        ) -> Result<(), GitHubError> {
            if self
                .failing_repos
                .lock()
                .unwrap()
                .contains(&full_name.to_string())
            {
                return Err(GitHubError::Api {
                    status: 404,
                    message: "not found".to_string(),
                });
            }
            Ok(())
        }
    }

    async fn setup() -> (
        HealthCheckRunner,
        AppConnectionRepository,
        RepoRepository,
        Arc<FakeGitHub>,
    ) {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");
        let db = Arc::new(db);

        let connections = AppConnectionRepository::new(Arc::clone(&db));
        let repos = RepoRepository::new(Arc::clone(&db));
        let github = FakeGitHub::new();
        let runner = HealthCheckRunner::new(
            connections.clone(),
            repos.clone(),
            github.clone() as Arc<dyn GitHubApi>,
        );
        (runner, connections, repos, github)
    }

    #[tokio::test]
    async fn healthy_connection_is_marked_ok() {
        let (runner, connections, _repos, _github) = setup().await;
        let connection = connections.create("app-1", Some(42)).await.unwrap();

        runner.check_connection(&connection.id).await.unwrap();

        let fetched = connections.find_by_id(&connection.id).await.unwrap().unwrap();
        assert_eq!(fetched.health_status, "ok");
        assert!(fetched.health_message.is_empty());
    }

    #[tokio::test]
    async fn failing_probe_records_error_but_task_succeeds() {
        let (runner, connections, _repos, github) = setup().await;
        let connection = connections.create("app-1", Some(42)).await.unwrap();
        github.failing_installations.lock().unwrap().push(42);

        // The probe fails; the check itself must not.
        runner.check_connection(&connection.id).await.unwrap();

        let fetched = connections.find_by_id(&connection.id).await.unwrap().unwrap();
        assert_eq!(fetched.health_status, "error");
        assert!(fetched.health_message.contains("401"));
    }

    #[tokio::test]
    async fn connection_without_installation_id_is_warned() {
        let (runner, connections, _repos, _github) = setup().await;
        let connection = connections.create("app-1", None).await.unwrap();

        runner.check_connection(&connection.id).await.unwrap();

        let fetched = connections.find_by_id(&connection.id).await.unwrap().unwrap();
        assert_eq!(fetched.health_status, "warn");
        assert!(fetched.health_message.contains("installation"));
    }

    #[tokio::test]
    async fn missing_connection_is_a_no_op() {
        let (runner, _connections, _repos, _github) = setup().await;
        runner.check_connection(&Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn repository_check_probes_under_managing_connection() {
        let (runner, connections, repos, github) = setup().await;
        let connection = connections.create("app-1", Some(42)).await.unwrap();
        repos
            .upsert(
                &RepoUpsert {
                    full_name: "o/r1".to_string(),
                    github_id: 1,
                    is_private: false,
                    html_url: "https://github.com/o/r1".to_string(),
                },
                connection.id,
            )
            .await
            .unwrap();

        runner.check_repository("o/r1").await.unwrap();
        let fetched = repos.find_by_full_name("o/r1").await.unwrap().unwrap();
        assert_eq!(fetched.health_status, "ok");

        github.failing_repos.lock().unwrap().push("o/r1".to_string());
        runner.check_repository("o/r1").await.unwrap();
        let fetched = repos.find_by_full_name("o/r1").await.unwrap().unwrap();
        assert_eq!(fetched.health_status, "error");
        assert!(fetched.health_message.contains("404"));
    }

    #[tokio::test]
    async fn repository_with_unbound_connection_is_warned() {
        let (runner, connections, repos, _github) = setup().await;
        let connection = connections.create("app-1", None).await.unwrap();
        repos
            .upsert(
                &RepoUpsert {
                    full_name: "o/r1".to_string(),
                    github_id: 1,
                    is_private: false,
                    html_url: "https://github.com/o/r1".to_string(),
                },
                connection.id,
            )
            .await
            .unwrap();

        runner.check_repository("o/r1").await.unwrap();

        let fetched = repos.find_by_full_name("o/r1").await.unwrap().unwrap();
        assert_eq!(fetched.health_status, "warn");
    }
}
