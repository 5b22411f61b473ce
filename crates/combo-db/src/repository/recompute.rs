//! # Recompute Queue Repository
//!
//! Durable queue of "this bundle needs recomputing" requests.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Recompute Queue                                      │
//! │                                                                         │
//! │  component_changed(variant) / safety monitor                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  enqueue(bundle_id, reason)                                            │
//! │       │   a pending request for the same bundle is reused              │
//! │       ▼                                                                 │
//! │  recompute_queue (completed_at IS NULL)                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  RecomputeWorker (combo-engine)                                        │
//! │  ├── get_pending(limit, max_attempts)                                  │
//! │  ├── success → mark_done(id)                                           │
//! │  └── failure → mark_failed(id, error)   attempts += 1                  │
//! │                                                                         │
//! │  Requests that reach max_attempts stay in the table for inspection     │
//! │  but are no longer handed out.                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;

/// A queued recompute request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RecomputeRequest {
    pub id: String,
    pub bundle_id: String,

    /// Free-form origin, e.g. `component_changed:tent-2p`.
    pub reason: String,

    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Repository for recompute queue operations.
#[derive(Debug, Clone)]
pub struct RecomputeQueueRepository {
    pool: SqlitePool,
}

impl RecomputeQueueRepository {
    /// Creates a new RecomputeQueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RecomputeQueueRepository { pool }
    }

    /// Queues a recompute for a bundle.
    ///
    /// If the bundle already has a pending request, that request is
    /// returned and nothing is inserted.
    pub async fn enqueue(&self, bundle_id: &str, reason: &str) -> DbResult<RecomputeRequest> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<RecomputeRequest> = sqlx::query_as(
            r#"
            SELECT id, bundle_id, reason, attempts, last_error,
                   created_at, attempted_at, completed_at
            FROM recompute_queue
            WHERE bundle_id = ?1 AND completed_at IS NULL
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(bundle_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(request) = existing {
            debug!(bundle_id = %bundle_id, request_id = %request.id, "Recompute already pending");
            tx.commit().await?;
            return Ok(request);
        }

        let request = RecomputeRequest {
            id: Uuid::new_v4().to_string(),
            bundle_id: bundle_id.to_string(),
            reason: reason.to_string(),
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            attempted_at: None,
            completed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO recompute_queue (
                id, bundle_id, reason, attempts, last_error,
                created_at, attempted_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&request.id)
        .bind(&request.bundle_id)
        .bind(&request.reason)
        .bind(request.attempts)
        .bind(&request.last_error)
        .bind(request.created_at)
        .bind(request.attempted_at)
        .bind(request.completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(bundle_id = %bundle_id, reason = %reason, "Queued recompute");
        Ok(request)
    }

    /// Pending requests with fewer than `max_attempts` failures, oldest first.
    pub async fn get_pending(&self, limit: u32, max_attempts: u32) -> DbResult<Vec<RecomputeRequest>> {
        let requests = sqlx::query_as(
            r#"
            SELECT id, bundle_id, reason, attempts, last_error,
                   created_at, attempted_at, completed_at
            FROM recompute_queue
            WHERE completed_at IS NULL AND attempts < ?2
            ORDER BY created_at ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await?;

        Ok(requests)
    }

    /// Marks a request as processed.
    pub async fn mark_done(&self, id: &str) -> DbResult<()> {
        sqlx::query("UPDATE recompute_queue SET completed_at = ?2, attempted_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records a failed attempt.
    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE recompute_queue SET
                attempts = attempts + 1,
                last_error = ?2,
                attempted_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Counts requests not yet completed (including exhausted ones).
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recompute_queue WHERE completed_at IS NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Deletes completed requests older than `days_old` days.
    pub async fn cleanup_old_entries(&self, days_old: u32) -> DbResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days_old));
        let result = sqlx::query("DELETE FROM recompute_queue WHERE completed_at IS NOT NULL AND completed_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
