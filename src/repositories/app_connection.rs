//! App connection repository for database operations
//!
//! Encapsulates SeaORM operations for the app_connections table: lookups
//! by id and slug, installation binding, health writes and the wholesale
//! accessible_repos replacement performed at the end of each sync pass.

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::HealthStatus;
use crate::models::app_connection::{self, Entity as AppConnection};

/// Repository for app connection database operations
#[derive(Debug, Clone)]
pub struct AppConnectionRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl AppConnectionRepository {
    /// Creates a new AppConnectionRepository instance
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Creates a connection binding for a GitHub App. Invoked by the
    /// external configuration flow and by tests; the sync engine never
    /// creates connections.
    pub async fn create(
        &self,
        slug: &str,
        installation_id: Option<i64>,
    ) -> Result<app_connection::Model> {
        let now = Utc::now().fixed_offset();
        let active = app_connection::ActiveModel {
            id: Set(Uuid::new_v4()),
            slug: Set(slug.to_string()),
            installation_id: Set(installation_id),
            health_status: Set(HealthStatus::Unknown.as_str().to_string()),
            health_message: Set(String::new()),
            accessible_repos: Set(json!([])),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(active.insert(&*self.db).await?)
    }

    /// Retrieves a connection by its ID
    pub async fn find_by_id(&self, id: &Uuid) -> Result<Option<app_connection::Model>> {
        Ok(AppConnection::find_by_id(*id).one(&*self.db).await?)
    }

    /// Retrieves a connection by its slug
    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<app_connection::Model>> {
        Ok(AppConnection::find()
            .filter(app_connection::Column::Slug.eq(slug))
            .one(&*self.db)
            .await?)
    }

    /// Lists all connections ordered by creation time then ID
    pub async fn list_all(&self) -> Result<Vec<app_connection::Model>> {
        Ok(AppConnection::find()
            .order_by_asc(app_connection::Column::CreatedAt)
            .order_by_asc(app_connection::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Binds (or rebinds) the GitHub installation id for a connection.
    /// Last write wins; replaying the same id is a no-op in effect.
    pub async fn set_installation_id(&self, id: &Uuid, installation_id: i64) -> Result<()> {
        self.require_exists(id).await?;
        let active = app_connection::ActiveModel {
            id: Set(*id),
            installation_id: Set(Some(installation_id)),
            updated_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };
        active.update(&*self.db).await?;
        Ok(())
    }

    /// Replaces the accessible repository set wholesale with the result of
    /// the most recent sync pass. Passing an empty slice is a valid
    /// terminal state, not an error.
    pub async fn replace_accessible_repos(&self, id: &Uuid, full_names: &[String]) -> Result<()> {
        self.require_exists(id).await?;
        let active = app_connection::ActiveModel {
            id: Set(*id),
            accessible_repos: Set(json!(full_names)),
            updated_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };
        active.update(&*self.db).await?;
        Ok(())
    }

    /// Records the outcome of a health check against this connection
    pub async fn set_health(&self, id: &Uuid, status: HealthStatus, message: &str) -> Result<()> {
        self.require_exists(id).await?;
        let active = app_connection::ActiveModel {
            id: Set(*id),
            health_status: Set(status.as_str().to_string()),
            health_message: Set(message.to_string()),
            updated_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };
        active.update(&*self.db).await?;
        Ok(())
    }

    async fn require_exists(&self, id: &Uuid) -> Result<()> {
        self.find_by_id(id)
            .await?
            .map(|_| ())
            .ok_or_else(|| anyhow!("app connection '{}' not found", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup_repo() -> AppConnectionRepository {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");
        AppConnectionRepository::new(Arc::new(db))
    }

    #[tokio::test]
    async fn create_and_lookup_by_slug() {
        let repo = setup_repo().await;
        let created = repo.create("app-1", Some(42)).await.unwrap();

        let by_slug = repo.find_by_slug("app-1").await.unwrap().unwrap();
        assert_eq!(by_slug.id, created.id);
        assert_eq!(by_slug.installation_id, Some(42));
        assert_eq!(by_slug.health_status, "unknown");
        assert!(by_slug.accessible_repo_names().is_empty());
    }

    #[tokio::test]
    async fn set_installation_id_is_last_write_wins() {
        let repo = setup_repo().await;
        let created = repo.create("app-1", None).await.unwrap();

        repo.set_installation_id(&created.id, 7).await.unwrap();
        repo.set_installation_id(&created.id, 99).await.unwrap();
        repo.set_installation_id(&created.id, 99).await.unwrap();

        let fetched = repo.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.installation_id, Some(99));
    }

    #[tokio::test]
    async fn replace_accessible_repos_is_wholesale() {
        let repo = setup_repo().await;
        let created = repo.create("app-1", Some(1)).await.unwrap();

        repo.replace_accessible_repos(&created.id, &["o/r1".to_string(), "o/r2".to_string()])
            .await
            .unwrap();
        repo.replace_accessible_repos(&created.id, &["o/r1".to_string()])
            .await
            .unwrap();

        let fetched = repo.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.accessible_repo_names(), vec!["o/r1".to_string()]);

        repo.replace_accessible_repos(&created.id, &[]).await.unwrap();
        let fetched = repo.find_by_id(&created.id).await.unwrap().unwrap();
        assert!(fetched.accessible_repo_names().is_empty());
    }

    #[tokio::test]
    async fn set_health_records_status_and_message() {
        let repo = setup_repo().await;
        let created = repo.create("app-1", Some(1)).await.unwrap();

        repo.set_health(&created.id, HealthStatus::Error, "probe failed: 503")
            .await
            .unwrap();

        let fetched = repo.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.health_status, "error");
        assert_eq!(fetched.health_message, "probe failed: 503");
    }

    #[tokio::test]
    async fn updates_against_missing_connection_fail() {
        let repo = setup_repo().await;
        let missing = Uuid::new_v4();
        assert!(repo.set_installation_id(&missing, 1).await.is_err());
        assert!(repo.replace_accessible_repos(&missing, &[]).await.is_err());
    }
}
