//! Durable store access: pool construction, migrations, and repository
//! functions for the three aggregates. Raw `sqlx` queries rather than an
//! ORM, following the direct `sqlx`/row-mapping style used throughout this
//! codebase — the locking (`FOR UPDATE SKIP LOCKED`), session-variable
//! (`SET app.tenant_id`), and optimistic-version patterns this crate needs
//! don't fit an ActiveRecord/ActiveModel seam.

pub mod orders;
pub mod payments;
pub mod refunds;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::error::AppError;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    sqlx::migrate!("./src/db/migrations")
        .run(pool)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("migration failed: {e}")))?;
    Ok(())
}
