//! Migration to create the app_connections table.
//!
//! App connections bind the host application to one configured GitHub App
//! installation each, carrying the installation id, health state and the
//! set of repository full names the installation can currently access.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AppConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AppConnections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AppConnections::Slug).text().not_null())
                    .col(
                        ColumnDef::new(AppConnections::InstallationId)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AppConnections::HealthStatus)
                            .text()
                            .not_null()
                            .default("unknown"),
                    )
                    .col(
                        ColumnDef::new(AppConnections::HealthMessage)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(AppConnections::AccessibleRepos)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AppConnections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AppConnections::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Slugs are the lookup key for webhook dispatch; enforce uniqueness.
        manager
            .create_index(
                Index::create()
                    .name("idx_app_connections_slug")
                    .table(AppConnections::Table)
                    .col(AppConnections::Slug)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_app_connections_slug").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(AppConnections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AppConnections {
    Table,
    Id,
    Slug,
    InstallationId,
    HealthStatus,
    HealthMessage,
    AccessibleRepos,
    CreatedAt,
    UpdatedAt,
}
