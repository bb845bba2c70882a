//! Storage helpers for Postgres access.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::{migrate::Migrator, postgres::PgPoolOptions, PgPool};

pub mod scoped;

pub use scoped::{ScopedRecordRepository, ScopedRecordRow};

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Thin wrapper around a shared `PgPool`.
#[derive(Clone)]
pub struct StoragePool {
    pool: Arc<PgPool>,
}

impl StoragePool {
    /// Wrap an existing pool in an `Arc` so it can be cloned safely.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Borrow the underlying `PgPool`.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub async fn connect(database_url: &str) -> Result<StoragePool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(StoragePool::new(pool))
}

/// Apply any pending schema migrations.
pub async fn run_migrations(pool: &StoragePool) -> Result<()> {
    MIGRATOR
        .run(pool.pool())
        .await
        .with_context(|| "running SQLx migrations failed")
}
