//! App connection entity model
//!
//! This module contains the SeaORM entity model for the app_connections
//! table, which stores the host application's bindings to configured
//! GitHub App installations.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// App connection entity representing one configured GitHub App installation
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "app_connections")]
pub struct Model {
    /// Unique identifier for the connection (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Human-readable key used in API calls and webhook dispatch (unique)
    pub slug: String,

    /// GitHub installation id; null until the first installation webhook
    /// or initial setup binds one
    pub installation_id: Option<i64>,

    /// Health of the connection as of the last check (unknown|ok|warn|error)
    pub health_status: String,

    /// Diagnostic message accompanying the health status
    pub health_message: String,

    /// Repository full names the installation can access, replaced
    /// wholesale on each successful sync (JSON array of strings)
    #[sea_orm(column_type = "JsonBinary")]
    pub accessible_repos: JsonValue,

    /// Timestamp when the connection was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the connection was last updated
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Decode the stored accessible_repos array into full names, skipping
    /// any non-string entries left behind by hand edits.
    pub fn accessible_repo_names(&self) -> Vec<String> {
        self.accessible_repos
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .filter_map(|value| value.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
