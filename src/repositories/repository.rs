//! Repository-row store for database operations
//!
//! Encapsulates SeaORM operations for the repositories table. The central
//! operation is the idempotent upsert used by the sync engine: converge to
//! exactly one row per full name regardless of how many passes touch it.

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::HealthStatus;
use crate::models::repository::{self, Entity as Repository};

/// Mutable fields written on every sync pass, collected from one remote
/// repository record.
#[derive(Debug, Clone)]
pub struct RepoUpsert {
    pub full_name: String,
    pub github_id: i64,
    pub is_private: bool,
    pub html_url: String,
}

/// Repository for repository-row database operations
#[derive(Debug, Clone)]
pub struct RepoRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl RepoRepository {
    /// Creates a new RepoRepository instance
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Retrieves a repository row by its full name
    pub async fn find_by_full_name(&self, full_name: &str) -> Result<Option<repository::Model>> {
        Ok(Repository::find_by_id(full_name.to_string())
            .one(&*self.db)
            .await?)
    }

    /// Lists all repository rows ordered by full name
    pub async fn list_all(&self) -> Result<Vec<repository::Model>> {
        Ok(Repository::find()
            .order_by_asc(repository::Column::FullName)
            .all(&*self.db)
            .await?)
    }

    /// Lists repository rows managed by the given app connection
    pub async fn list_by_managing_app(&self, app_id: &Uuid) -> Result<Vec<repository::Model>> {
        Ok(Repository::find()
            .filter(repository::Column::ManagingAppId.eq(*app_id))
            .order_by_asc(repository::Column::FullName)
            .all(&*self.db)
            .await?)
    }

    /// Creates or updates the row for a remote repository record. Existing
    /// rows keep their health state; the managing app reference follows
    /// whichever connection synced the repository last.
    pub async fn upsert(
        &self,
        record: &RepoUpsert,
        managing_app_id: Uuid,
    ) -> Result<repository::Model> {
        let now = Utc::now().fixed_offset();

        match self.find_by_full_name(&record.full_name).await? {
            Some(existing) => {
                let active = repository::ActiveModel {
                    full_name: Set(existing.full_name.clone()),
                    github_id: Set(record.github_id),
                    managing_app_id: Set(managing_app_id),
                    is_private: Set(record.is_private),
                    html_url: Set(record.html_url.clone()),
                    last_synced_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                };
                Ok(active.update(&*self.db).await?)
            }
            None => {
                let active = repository::ActiveModel {
                    full_name: Set(record.full_name.clone()),
                    github_id: Set(record.github_id),
                    managing_app_id: Set(managing_app_id),
                    is_private: Set(record.is_private),
                    html_url: Set(record.html_url.clone()),
                    last_synced_at: Set(now),
                    health_status: Set(HealthStatus::Unknown.as_str().to_string()),
                    health_message: Set(String::new()),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                Ok(active.insert(&*self.db).await?)
            }
        }
    }

    /// Records the outcome of a health check against this repository
    pub async fn set_health(
        &self,
        full_name: &str,
        status: HealthStatus,
        message: &str,
    ) -> Result<()> {
        self.find_by_full_name(full_name)
            .await?
            .ok_or_else(|| anyhow!("repository '{}' not found", full_name))?;

        let active = repository::ActiveModel {
            full_name: Set(full_name.to_string()),
            health_status: Set(status.as_str().to_string()),
            health_message: Set(message.to_string()),
            updated_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };
        active.update(&*self.db).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup_repo() -> RepoRepository {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");
        RepoRepository::new(Arc::new(db))
    }

    fn record(full_name: &str, github_id: i64, is_private: bool) -> RepoUpsert {
        RepoUpsert {
            full_name: full_name.to_string(),
            github_id,
            is_private,
            html_url: format!("https://github.com/{}", full_name),
        }
    }

    #[tokio::test]
    async fn upsert_twice_yields_one_row() {
        let repo = setup_repo().await;
        let app_id = Uuid::new_v4();

        let first = repo.upsert(&record("o/r1", 1, false), app_id).await.unwrap();
        let second = repo.upsert(&record("o/r1", 1, false), app_id).await.unwrap();

        let all = repo.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(first.full_name, second.full_name);
        assert!(second.last_synced_at >= first.last_synced_at);
    }

    #[tokio::test]
    async fn upsert_updates_mutable_fields_in_place() {
        let repo = setup_repo().await;
        let app_a = Uuid::new_v4();
        let app_b = Uuid::new_v4();

        repo.upsert(&record("o/r1", 1, false), app_a).await.unwrap();
        let updated = repo.upsert(&record("o/r1", 1, true), app_b).await.unwrap();

        // Last sync wins for the managing reference.
        assert_eq!(updated.managing_app_id, app_b);
        assert!(updated.is_private);
    }

    #[tokio::test]
    async fn upsert_preserves_health_of_existing_row() {
        let repo = setup_repo().await;
        let app_id = Uuid::new_v4();

        repo.upsert(&record("o/r1", 1, false), app_id).await.unwrap();
        repo.set_health("o/r1", HealthStatus::Error, "unreachable")
            .await
            .unwrap();
        repo.upsert(&record("o/r1", 1, false), app_id).await.unwrap();

        let fetched = repo.find_by_full_name("o/r1").await.unwrap().unwrap();
        assert_eq!(fetched.health_status, "error");
        assert_eq!(fetched.health_message, "unreachable");
    }

    #[tokio::test]
    async fn list_by_managing_app_filters_rows() {
        let repo = setup_repo().await;
        let app_a = Uuid::new_v4();
        let app_b = Uuid::new_v4();

        repo.upsert(&record("o/r1", 1, false), app_a).await.unwrap();
        repo.upsert(&record("o/r2", 2, true), app_b).await.unwrap();

        let managed = repo.list_by_managing_app(&app_a).await.unwrap();
        assert_eq!(managed.len(), 1);
        assert_eq!(managed[0].full_name, "o/r1");
    }

    #[tokio::test]
    async fn set_health_against_missing_row_fails() {
        let repo = setup_repo().await;
        assert!(
            repo.set_health("o/missing", HealthStatus::Ok, "")
                .await
                .is_err()
        );
    }
}
