//! # Bundle Repository
//!
//! Storage for bundle definitions and their ordered components.
//!
//! ## Bundle Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Bundle Lifecycle                                  │
//! │                                                                         │
//! │  1. CREATE DRAFT                                                       │
//! │     └── insert() → bundles row (status = 'draft') + components         │
//! │                                                                         │
//! │  2. ACTIVATE (after validation)                                        │
//! │     └── set_status(Active)                                             │
//! │                                                                         │
//! │  3. SELL                                                               │
//! │     └── orders().add_bundle_lines() bumps `version`,                   │
//! │         ledger maintains `reserved_open`                               │
//! │                                                                         │
//! │  Expired / broken are never written here: they are computed.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use combo_core::{BundleDefinition, BundleStatus, Component, DiscountMode, Money, Percent};

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, FromRow)]
struct BundleRow {
    id: String,
    name: String,
    status: BundleStatus,
    discount_mode: DiscountMode,
    fixed_price_cents: Option<i64>,
    percent_off_bps: Option<i64>,
    valid_from: Option<DateTime<Utc>>,
    valid_to: Option<DateTime<Utc>>,
    bundle_cap: Option<i64>,
    reserved_open: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ComponentRow {
    variant_id: String,
    name: String,
    quantity_per_bundle: i64,
    weight: Option<i64>,
    unit_price_cents: i64,
}

impl ComponentRow {
    fn into_component(self) -> DbResult<Component> {
        let weight = self
            .weight
            .map(u32::try_from)
            .transpose()
            .map_err(|e| DbError::corrupt("bundle_components.weight", e.to_string()))?;

        Ok(Component {
            variant_id: self.variant_id,
            name: self.name,
            quantity_per_bundle: self.quantity_per_bundle,
            weight,
            unit_price_snapshot: Money::from_cents(self.unit_price_cents),
        })
    }
}

impl BundleRow {
    fn into_definition(self, components: Vec<ComponentRow>) -> DbResult<BundleDefinition> {
        let percent_off = self
            .percent_off_bps
            .map(|bps| u32::try_from(bps).map(Percent::from_bps))
            .transpose()
            .map_err(|e| DbError::corrupt("bundles.percent_off_bps", e.to_string()))?;

        let components = components
            .into_iter()
            .map(ComponentRow::into_component)
            .collect::<DbResult<Vec<_>>>()?;

        Ok(BundleDefinition {
            id: self.id,
            name: self.name,
            status: self.status,
            discount_mode: self.discount_mode,
            fixed_price_cents: self.fixed_price_cents,
            percent_off,
            valid_from: self.valid_from,
            valid_to: self.valid_to,
            bundle_cap: self.bundle_cap,
            bundle_reserved_open: self.reserved_open,
            components,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const BUNDLE_COLUMNS: &str = r#"
    id, name, status, discount_mode, fixed_price_cents, percent_off_bps,
    valid_from, valid_to, bundle_cap, reserved_open, created_at, updated_at
"#;

// =============================================================================
// Connection-level helpers (shared with transactional repositories)
// =============================================================================

/// Loads one bundle with its components on an existing connection.
pub(crate) async fn fetch_definition(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Option<BundleDefinition>> {
    let row: Option<BundleRow> =
        sqlx::query_as(&format!("SELECT {} FROM bundles WHERE id = ?1", BUNDLE_COLUMNS))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let components: Vec<ComponentRow> = sqlx::query_as(
        r#"
        SELECT variant_id, name, quantity_per_bundle, weight, unit_price_cents
        FROM bundle_components
        WHERE bundle_id = ?1
        ORDER BY position ASC
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    row.into_definition(components).map(Some)
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for bundle definitions.
#[derive(Debug, Clone)]
pub struct BundleRepository {
    pool: SqlitePool,
}

impl BundleRepository {
    /// Creates a new BundleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        BundleRepository { pool }
    }

    /// Inserts a bundle and its components in one transaction.
    ///
    /// Callers validate first; the schema CHECKs are a backstop.
    pub async fn insert(&self, definition: &BundleDefinition) -> DbResult<()> {
        debug!(id = %definition.id, name = %definition.name, "Inserting bundle");

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO bundles (
                id, name, status, discount_mode, fixed_price_cents, percent_off_bps,
                valid_from, valid_to, bundle_cap, reserved_open, version,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12)
            "#,
        )
        .bind(&definition.id)
        .bind(&definition.name)
        .bind(definition.status)
        .bind(definition.discount_mode)
        .bind(definition.fixed_price_cents)
        .bind(definition.percent_off.map(|p| p.bps() as i64))
        .bind(definition.valid_from)
        .bind(definition.valid_to)
        .bind(definition.bundle_cap)
        .bind(definition.bundle_reserved_open)
        .bind(definition.created_at)
        .bind(definition.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, definition.id.clone()),
            other => other,
        })?;

        for (position, component) in definition.components.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO bundle_components (
                    bundle_id, position, variant_id, name,
                    quantity_per_bundle, weight, unit_price_cents
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&definition.id)
            .bind(position as i64)
            .bind(&component.variant_id)
            .bind(&component.name)
            .bind(component.quantity_per_bundle)
            .bind(component.weight.map(i64::from))
            .bind(component.unit_price_snapshot.cents())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Gets a bundle with components by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<BundleDefinition>> {
        let mut conn = self.pool.acquire().await?;
        fetch_definition(&mut conn, id).await
    }

    /// Gets a bundle or fails with `NotFound`.
    pub async fn get_required(&self, id: &str) -> DbResult<BundleDefinition> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Bundle", id))
    }

    /// All bundle ids, oldest first.
    pub async fn list_ids(&self) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT id FROM bundles ORDER BY created_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    /// All bundles persisted as active, with components.
    pub async fn list_active(&self) -> DbResult<Vec<BundleDefinition>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM bundles WHERE status = 'active' ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut conn = self.pool.acquire().await?;
        let mut bundles = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(definition) = fetch_definition(&mut conn, &id).await? {
                bundles.push(definition);
            }
        }
        Ok(bundles)
    }

    /// Updates the persisted status.
    pub async fn set_status(&self, id: &str, status: BundleStatus) -> DbResult<()> {
        debug!(id = %id, status = %status, "Updating bundle status");

        let result = sqlx::query("UPDATE bundles SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(status)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Bundle", id));
        }
        Ok(())
    }

    /// Ids of every bundle that references `variant_id`.
    pub async fn bundles_containing_variant(&self, variant_id: &str) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT DISTINCT bundle_id
            FROM bundle_components
            WHERE variant_id = ?1
            ORDER BY bundle_id ASC
            "#,
        )
        .bind(variant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Counts stored bundles.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bundles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
