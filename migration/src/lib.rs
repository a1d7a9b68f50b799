//! Database migrations for the GitHub Sync service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_06_10_100000_create_app_connections;
mod m2025_06_10_100100_create_repositories;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_10_100000_create_app_connections::Migration),
            Box::new(m2025_06_10_100100_create_repositories::Migration),
        ]
    }
}
