//! # Stock Repository
//!
//! The stock store collaborator: on-hand and allocated units per variant,
//! plus the variant's status for health checks.
//!
//! A variant with no row here is "missing". Snapshot lookups return `None`
//! for it rather than a zero snapshot, so callers can tell the difference.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use combo_core::{ComponentStatus, StockSnapshot};

#[derive(Debug, FromRow)]
struct StockRow {
    variant_id: String,
    on_hand: i64,
    allocated: i64,
    status: ComponentStatus,
}

/// Reads stock snapshots for `variant_ids` on an existing connection.
///
/// Only variants present in the store appear in the map. Deleted variants
/// are left out so they surface as missing snapshots.
pub(crate) async fn fetch_snapshots(
    conn: &mut SqliteConnection,
    variant_ids: &[String],
) -> DbResult<HashMap<String, StockSnapshot>> {
    if variant_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = fetch_rows(conn, variant_ids).await?;
    Ok(rows
        .into_iter()
        .filter(|r| r.status != ComponentStatus::Deleted)
        .map(|r| (r.variant_id, StockSnapshot::new(r.on_hand, r.allocated)))
        .collect())
}

/// Status of each known variant on an existing connection.
pub(crate) async fn fetch_statuses(
    conn: &mut SqliteConnection,
    variant_ids: &[String],
) -> DbResult<HashMap<String, ComponentStatus>> {
    if variant_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = fetch_rows(conn, variant_ids).await?;
    Ok(rows.into_iter().map(|r| (r.variant_id, r.status)).collect())
}

async fn fetch_rows(conn: &mut SqliteConnection, variant_ids: &[String]) -> DbResult<Vec<StockRow>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT variant_id, on_hand, allocated, status FROM stock_levels WHERE variant_id IN (",
    );
    let mut separated = builder.separated(", ");
    for id in variant_ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");

    let rows = builder.build_query_as::<StockRow>().fetch_all(&mut *conn).await?;
    Ok(rows)
}

/// Repository for the stock store.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

impl StockRepository {
    /// Creates a new StockRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    /// `getStockSnapshot(variantId)`.
    ///
    /// `None` when the variant is unknown or deleted.
    pub async fn get_snapshot(&self, variant_id: &str) -> DbResult<Option<StockSnapshot>> {
        let mut conn = self.pool.acquire().await?;
        let mut map = fetch_snapshots(&mut conn, &[variant_id.to_string()]).await?;
        Ok(map.remove(variant_id))
    }

    /// Snapshots for many variants at once.
    pub async fn snapshots_for(&self, variant_ids: &[String]) -> DbResult<HashMap<String, StockSnapshot>> {
        let mut conn = self.pool.acquire().await?;
        fetch_snapshots(&mut conn, variant_ids).await
    }

    /// Status of each known variant. Unknown variants are absent.
    pub async fn component_statuses(
        &self,
        variant_ids: &[String],
    ) -> DbResult<HashMap<String, ComponentStatus>> {
        let mut conn = self.pool.acquire().await?;
        fetch_statuses(&mut conn, variant_ids).await
    }

    /// Creates or replaces the stock level of a variant.
    pub async fn set_level(&self, variant_id: &str, name: &str, on_hand: i64, allocated: i64) -> DbResult<()> {
        debug!(variant_id = %variant_id, on_hand, allocated, "Setting stock level");

        sqlx::query(
            r#"
            INSERT INTO stock_levels (variant_id, name, on_hand, allocated, status, updated_at)
            VALUES (?1, ?2, ?3, ?4, 'active', ?5)
            ON CONFLICT(variant_id) DO UPDATE SET
                name = excluded.name,
                on_hand = excluded.on_hand,
                allocated = excluded.allocated,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(variant_id)
        .bind(name)
        .bind(on_hand)
        .bind(allocated)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Changes the status of a known variant. Returns false if unknown.
    pub async fn set_status(&self, variant_id: &str, status: ComponentStatus) -> DbResult<bool> {
        debug!(variant_id = %variant_id, ?status, "Setting component status");

        let result = sqlx::query("UPDATE stock_levels SET status = ?2, updated_at = ?3 WHERE variant_id = ?1")
            .bind(variant_id)
            .bind(status)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Removes a variant from the store entirely.
    pub async fn remove(&self, variant_id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM stock_levels WHERE variant_id = ?1")
            .bind(variant_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
