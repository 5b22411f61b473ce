//! # Diagnostics And Display Caches
//!
//! Two small tables that are derived data, never the source of truth:
//!
//! - `bundle_health`: the last health the safety monitor observed. The
//!   monitor compares against it to find bundles whose health changed.
//! - `bundle_snapshots`: the last availability and price totals computed
//!   by the recompute worker, for listing pages.
//!
//! Both can be wiped at any time; the next monitor pass or recompute
//! rebuilds them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::error::DbResult;
use combo_core::availability::AvailabilityStatus;
use combo_core::health::BrokenComponent;
use combo_core::{BundleHealth, Money};

/// Cached availability and price totals of one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleSnapshot {
    pub bundle_id: String,
    pub max_quantity: i64,
    pub availability_status: AvailabilityStatus,
    pub total_pre_discount: Money,
    pub total_bundle_price: Money,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct HealthRow {
    bundle_id: String,
    is_broken: bool,
    is_expired: bool,
    within_schedule: bool,
    is_available: bool,
    broken_components: String,
}

#[derive(Debug, FromRow)]
struct SnapshotRow {
    bundle_id: String,
    max_quantity: i64,
    availability_status: AvailabilityStatus,
    total_pre_discount_cents: i64,
    total_bundle_price_cents: i64,
    computed_at: DateTime<Utc>,
}

impl HealthRow {
    fn into_health(self) -> DbResult<BundleHealth> {
        let broken_components: Vec<BrokenComponent> = serde_json::from_str(&self.broken_components)?;
        Ok(BundleHealth {
            bundle_id: self.bundle_id,
            is_broken: self.is_broken,
            is_expired: self.is_expired,
            within_schedule: self.within_schedule,
            is_available: self.is_available,
            broken_components,
        })
    }
}

impl From<SnapshotRow> for BundleSnapshot {
    fn from(row: SnapshotRow) -> Self {
        BundleSnapshot {
            bundle_id: row.bundle_id,
            max_quantity: row.max_quantity,
            availability_status: row.availability_status,
            total_pre_discount: Money::from_cents(row.total_pre_discount_cents),
            total_bundle_price: Money::from_cents(row.total_bundle_price_cents),
            computed_at: row.computed_at,
        }
    }
}

/// Repository for the health and snapshot caches.
#[derive(Debug, Clone)]
pub struct CacheRepository {
    pool: SqlitePool,
}

impl CacheRepository {
    /// Creates a new CacheRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CacheRepository { pool }
    }

    /// Last observed health, if the monitor has seen this bundle before.
    pub async fn get_health(&self, bundle_id: &str) -> DbResult<Option<BundleHealth>> {
        let row: Option<HealthRow> = sqlx::query_as(
            r#"
            SELECT bundle_id, is_broken, is_expired, within_schedule, is_available, broken_components
            FROM bundle_health
            WHERE bundle_id = ?1
            "#,
        )
        .bind(bundle_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(HealthRow::into_health).transpose()
    }

    pub async fn put_health(&self, health: &BundleHealth, checked_at: DateTime<Utc>) -> DbResult<()> {
        let broken = serde_json::to_string(&health.broken_components)?;

        sqlx::query(
            r#"
            INSERT INTO bundle_health (
                bundle_id, is_broken, is_expired, within_schedule, is_available,
                broken_components, checked_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(bundle_id) DO UPDATE SET
                is_broken = excluded.is_broken,
                is_expired = excluded.is_expired,
                within_schedule = excluded.within_schedule,
                is_available = excluded.is_available,
                broken_components = excluded.broken_components,
                checked_at = excluded.checked_at
            "#,
        )
        .bind(&health.bundle_id)
        .bind(health.is_broken)
        .bind(health.is_expired)
        .bind(health.within_schedule)
        .bind(health.is_available)
        .bind(broken)
        .bind(checked_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Bundles whose last observation was broken.
    pub async fn broken_bundle_ids(&self) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT bundle_id FROM bundle_health WHERE is_broken = 1 ORDER BY bundle_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    pub async fn get_snapshot(&self, bundle_id: &str) -> DbResult<Option<BundleSnapshot>> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT bundle_id, max_quantity, availability_status,
                   total_pre_discount_cents, total_bundle_price_cents, computed_at
            FROM bundle_snapshots
            WHERE bundle_id = ?1
            "#,
        )
        .bind(bundle_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(BundleSnapshot::from))
    }

    pub async fn put_snapshot(&self, snapshot: &BundleSnapshot) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bundle_snapshots (
                bundle_id, max_quantity, availability_status,
                total_pre_discount_cents, total_bundle_price_cents, computed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(bundle_id) DO UPDATE SET
                max_quantity = excluded.max_quantity,
                availability_status = excluded.availability_status,
                total_pre_discount_cents = excluded.total_pre_discount_cents,
                total_bundle_price_cents = excluded.total_bundle_price_cents,
                computed_at = excluded.computed_at
            "#,
        )
        .bind(&snapshot.bundle_id)
        .bind(snapshot.max_quantity)
        .bind(snapshot.availability_status)
        .bind(snapshot.total_pre_discount.cents())
        .bind(snapshot.total_bundle_price.cents())
        .bind(snapshot.computed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn invalidate_snapshot(&self, bundle_id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM bundle_snapshots WHERE bundle_id = ?1")
            .bind(bundle_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drops cached rows for a bundle.
    pub async fn invalidate(&self, bundle_id: &str) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM bundle_health WHERE bundle_id = ?1")
            .bind(bundle_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM bundle_snapshots WHERE bundle_id = ?1")
            .bind(bundle_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::memory_db;
    use combo_core::health::BrokenReason;

    fn broken_health() -> BundleHealth {
        BundleHealth {
            bundle_id: "b-1".to_string(),
            is_broken: true,
            is_expired: false,
            within_schedule: true,
            is_available: false,
            broken_components: vec![BrokenComponent {
                variant_id: "tent".to_string(),
                reason: BrokenReason::Deleted,
            }],
        }
    }

    #[tokio::test]
    async fn test_health_roundtrip_and_overwrite() {
        let db = memory_db().await;
        assert!(db.cache().get_health("b-1").await.unwrap().is_none());

        db.cache().put_health(&broken_health(), Utc::now()).await.unwrap();
        assert_eq!(db.cache().get_health("b-1").await.unwrap(), Some(broken_health()));
        assert_eq!(db.cache().broken_bundle_ids().await.unwrap(), vec!["b-1".to_string()]);

        let healed = BundleHealth {
            is_broken: false,
            is_available: true,
            broken_components: vec![],
            ..broken_health()
        };
        db.cache().put_health(&healed, Utc::now()).await.unwrap();
        assert_eq!(db.cache().get_health("b-1").await.unwrap(), Some(healed));
        assert!(db.cache().broken_bundle_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_and_invalidate() {
        let db = memory_db().await;
        let snapshot = BundleSnapshot {
            bundle_id: "b-1".to_string(),
            max_quantity: 4,
            availability_status: AvailabilityStatus::Available,
            total_pre_discount: Money::from_cents(5000),
            total_bundle_price: Money::from_cents(4500),
            computed_at: Utc::now(),
        };

        db.cache().put_snapshot(&snapshot).await.unwrap();
        let loaded = db.cache().get_snapshot("b-1").await.unwrap().unwrap();
        assert_eq!(loaded.max_quantity, 4);
        assert_eq!(loaded.availability_status, AvailabilityStatus::Available);
        assert_eq!(loaded.total_bundle_price, Money::from_cents(4500));

        db.cache().invalidate("b-1").await.unwrap();
        assert!(db.cache().get_snapshot("b-1").await.unwrap().is_none());
    }
}
