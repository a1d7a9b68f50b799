//! # Data Models
//!
//! This module contains the SeaORM entity models and shared domain types
//! used throughout the GitHub Sync service.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod app_connection;
pub mod repository;

pub use app_connection::Entity as AppConnection;
pub use repository::Entity as Repository;

/// Health of an app connection or repository as recorded by the last check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Ok,
    Warn,
    Error,
}

impl HealthStatus {
    /// Stored text representation (matches the database default "unknown").
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Ok => "ok",
            HealthStatus::Warn => "warn",
            HealthStatus::Error => "error",
        }
    }

    /// Parse a stored status, treating unrecognized values as unknown.
    pub fn from_db(value: &str) -> Self {
        match value {
            "ok" => HealthStatus::Ok,
            "warn" => HealthStatus::Warn,
            "error" => HealthStatus::Error,
            _ => HealthStatus::Unknown,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "github-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
