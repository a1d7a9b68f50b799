//! Repository entity model
//!
//! SeaORM entity for the repositories table. Rows are keyed by the GitHub
//! full name and carry a back-reference to the app connection that most
//! recently synced them.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Repository entity representing a GitHub repository discovered under
/// some app connection
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "repositories")]
pub struct Model {
    /// GitHub full name ("owner/name"), unique key
    #[sea_orm(primary_key, auto_increment = false)]
    pub full_name: String,

    /// Numeric GitHub repository id
    pub github_id: i64,

    /// App connection that currently manages this repository; overwritten
    /// by whichever connection synced it last
    pub managing_app_id: Uuid,

    /// Whether the repository is private
    pub is_private: bool,

    /// Web URL of the repository
    pub html_url: String,

    /// Timestamp of the last sync pass that touched this row
    pub last_synced_at: DateTimeWithTimeZone,

    /// Health of the repository as of the last check (unknown|ok|warn|error)
    pub health_status: String,

    /// Diagnostic message accompanying the health status
    pub health_message: String,

    /// Timestamp when the row was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the row was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
