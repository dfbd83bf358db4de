use anyhow::{Context, Result};
use diesel::Connection;
use diesel_async::{
    AsyncPgConnection,
    async_connection_wrapper::AsyncConnectionWrapper,
    pooled_connection::{AsyncDieselConnectionManager, bb8::Pool},
};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness};

use crate::config::DatabaseConfig;

pub type DbPool = Pool<AsyncPgConnection>;

pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<DbPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(url);
    Pool::builder()
        .max_size(config.max_connections)
        .connection_timeout(config.timeout)
        .build(manager)
        .await
        .context("Failed to build DB connection pool")
}

/// Applies pending migrations on a blocking thread and returns how many ran.
pub async fn run_migrations_blocking(migrations: EmbeddedMigrations, url: &str) -> Result<usize> {
    let url = url.to_owned();
    tokio::task::spawn_blocking(move || {
        let mut conn = AsyncConnectionWrapper::<AsyncPgConnection>::establish(&url)
            .context("Failed to connect for migrations")?;
        let applied = conn
            .run_pending_migrations(migrations)
            .map_err(|err| anyhow::anyhow!(err))
            .context("Failed to run migrations")?;
        Ok(applied.len())
    })
    .await
    .context("Migration task panicked")?
}
