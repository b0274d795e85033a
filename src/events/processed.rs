//! `processed_events` consumer-side dedup helper. Downstream consumers of
//! the at-least-once broker feed call `try_mark_processed` before acting on
//! a message; a `false` return means this `eventId` was already handled and
//! the message should be dropped. This crate does not ship a consumer --
//! dispatching broker messages to the right handler is out of scope -- but
//! the guard is the reusable building block any consumer needs.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::AppError;

pub struct ConsumerGuard;

impl ConsumerGuard {
    /// Returns `true` if this is the first time `event_id` has been seen
    /// (the caller should proceed), `false` if it was already processed.
    pub async fn try_mark_processed(conn: &mut PgConnection, event_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT INTO processed_events (event_id, processed_at) VALUES ($1, $2) ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(event_id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Deletes processed-event markers older than `retention`, mirroring the
    /// outbox's own published-row retention sweep.
    pub async fn purge_older_than(conn: &mut PgConnection, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM processed_events WHERE processed_at < $1")
            .bind(cutoff)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_module_compiles_and_exposes_expected_surface() {
        // The meaningful behavior (INSERT ... ON CONFLICT DO NOTHING is the
        // dedup boundary) requires a live Postgres connection to exercise;
        // covered by tests/tenant_isolation_test.rs-style integration tests.
        let _ = ConsumerGuard::try_mark_processed;
        let _ = ConsumerGuard::purge_older_than;
    }
}
