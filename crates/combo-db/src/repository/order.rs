//! # Order Repository
//!
//! The order store collaborator plus the add-to-order consistency boundary.
//!
//! ## Add-To-Order Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   add_bundle_lines(order, bundle, qty)                  │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │   1. UPDATE bundles SET version = version + 1   ← takes the write lock  │
//! │   2. check order is still being built                                   │
//! │   3. load definition + read stock snapshots and statuses                │
//! │   4. compute_sellable(...).ensure(qty)          ← rollback on shortfall │
//! │   5. allocate(definition, qty)                                          │
//! │   6. INSERT header line + one line per component                        │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  A second add for the same bundle waits at step 1 and then sees the     │
//! │  first one's lines and counters: read → compute → commit never          │
//! │  interleaves.                                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::bundle::fetch_definition;
use crate::repository::stock::{fetch_snapshots, fetch_statuses};
use combo_core::availability::{compute_sellable, AvailabilityResult};
use combo_core::pricing::{allocate, AllocationResult};
use combo_core::{BundleLineMetadata, Money, OpenOrderRef, OrderState, OrderTransition};

// =============================================================================
// Records
// =============================================================================

/// Lines written for one bundle purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleLinesAdded {
    pub order_id: String,
    pub bundle_key: String,
    pub allocation: AllocationResult,
    pub availability: AvailabilityResult,
    pub lines: Vec<BundleLineMetadata>,
}

/// One bundle purchase on an order, as seen from its header line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct OrderBundleRef {
    pub bundle_key: String,
    pub bundle_id: String,
    pub quantity: i64,
}

#[derive(Debug, FromRow)]
struct LineRow {
    bundle_key: String,
    bundle_id: String,
    variant_id: Option<String>,
    is_bundle_header: bool,
    quantity: i64,
    base_unit_price_cents: i64,
    effective_unit_price_cents: i64,
    bundle_adj_cents: i64,
    bundle_pct_applied: f64,
    bundle_share: f64,
}

impl From<LineRow> for BundleLineMetadata {
    fn from(row: LineRow) -> Self {
        BundleLineMetadata {
            bundle_key: row.bundle_key,
            bundle_id: row.bundle_id,
            variant_id: row.variant_id,
            is_bundle_header: row.is_bundle_header,
            quantity: row.quantity,
            base_unit_price: Money::from_cents(row.base_unit_price_cents),
            effective_unit_price: Money::from_cents(row.effective_unit_price_cents),
            bundle_adj_amount: Money::from_cents(row.bundle_adj_cents),
            bundle_pct_applied: row.bundle_pct_applied,
            bundle_share: row.bundle_share,
        }
    }
}

#[derive(Debug, FromRow)]
struct OpenOrderRow {
    order_id: String,
    quantity: i64,
}

// =============================================================================
// Connection-level helpers
// =============================================================================

/// SQL list of the open order states, e.g. `'payment_authorized', ...`.
fn open_states_sql() -> String {
    OrderState::ALL
        .iter()
        .filter(|s| s.is_open())
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Open orders containing `bundle_id`, with the bundle quantity per order.
pub(crate) async fn fetch_open_orders_containing_bundle(
    conn: &mut SqliteConnection,
    bundle_id: &str,
) -> DbResult<Vec<OpenOrderRef>> {
    let sql = format!(
        r#"
        SELECT o.id AS order_id, SUM(l.quantity) AS quantity
        FROM orders o
        JOIN order_lines l ON l.order_id = o.id
        WHERE l.bundle_id = ?1
          AND l.is_bundle_header = 1
          AND o.state IN ({})
        GROUP BY o.id
        ORDER BY o.id ASC
        "#,
        open_states_sql()
    );

    let rows: Vec<OpenOrderRow> = sqlx::query_as(&sql).bind(bundle_id).fetch_all(&mut *conn).await?;

    Ok(rows
        .into_iter()
        .map(|r| OpenOrderRef {
            order_id: r.order_id,
            quantity: r.quantity,
        })
        .collect())
}

async fn fetch_order_state(conn: &mut SqliteConnection, order_id: &str) -> DbResult<OrderState> {
    let state: Option<OrderState> = sqlx::query_scalar("SELECT state FROM orders WHERE id = ?1")
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;
    state.ok_or_else(|| DbError::not_found("Order", order_id))
}

/// Bumps the bundle version; the first write of every pricing transaction.
async fn lock_bundle(conn: &mut SqliteConnection, bundle_id: &str) -> DbResult<()> {
    let version: Option<i64> =
        sqlx::query_scalar("UPDATE bundles SET version = version + 1 WHERE id = ?1 RETURNING version")
            .bind(bundle_id)
            .fetch_optional(&mut *conn)
            .await?;
    if version.is_none() {
        return Err(DbError::not_found("Bundle", bundle_id));
    }
    Ok(())
}

fn ensure_editable(order_id: &str, state: OrderState) -> DbResult<()> {
    match state {
        OrderState::AddingItems | OrderState::ArrangingPayment => Ok(()),
        other => Err(DbError::InvalidState {
            entity: "Order".to_string(),
            id: order_id.to_string(),
            state: other.as_str().to_string(),
            reason: "bundle lines can only change before payment".to_string(),
        }),
    }
}

/// Steps 3-5 of the add-to-order transaction.
async fn price_bundle(
    conn: &mut SqliteConnection,
    bundle_id: &str,
    qty: i64,
    now: DateTime<Utc>,
) -> DbResult<(AllocationResult, AvailabilityResult)> {
    let definition = fetch_definition(conn, bundle_id)
        .await?
        .ok_or_else(|| DbError::not_found("Bundle", bundle_id))?;

    let variant_ids = definition.variant_ids();
    let snapshots = fetch_snapshots(conn, &variant_ids).await?;
    let statuses = fetch_statuses(conn, &variant_ids).await?;
    let availability = compute_sellable(
        &definition,
        &snapshots,
        &statuses,
        definition.bundle_reserved_open,
        now,
    )?;
    availability.ensure(qty)?;

    let allocation = allocate(&definition, qty)?;
    Ok((allocation, availability))
}

async fn insert_lines(
    conn: &mut SqliteConnection,
    order_id: &str,
    lines: &[BundleLineMetadata],
    now: DateTime<Utc>,
) -> DbResult<()> {
    for (position, line) in lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO order_lines (
                id, order_id, bundle_key, bundle_id, variant_id, is_bundle_header,
                position, quantity, base_unit_price_cents, effective_unit_price_cents,
                bundle_adj_cents, bundle_pct_applied, bundle_share, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(order_id)
        .bind(&line.bundle_key)
        .bind(&line.bundle_id)
        .bind(&line.variant_id)
        .bind(line.is_bundle_header)
        .bind(position as i64)
        .bind(line.quantity)
        .bind(line.base_unit_price.cents())
        .bind(line.effective_unit_price.cents())
        .bind(line.bundle_adj_amount.cents())
        .bind(line.bundle_pct_applied)
        .bind(line.bundle_share)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for orders and bundle order lines.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Creates an empty order in `AddingItems`.
    pub async fn create_order(&self) -> DbResult<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query("INSERT INTO orders (id, state, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)")
            .bind(&id)
            .bind(OrderState::AddingItems)
            .bind(now)
            .execute(&self.pool)
            .await?;

        debug!(order_id = %id, "Created order");
        Ok(id)
    }

    /// Current state of an order.
    pub async fn get_state(&self, order_id: &str) -> DbResult<OrderState> {
        let mut conn = self.pool.acquire().await?;
        fetch_order_state(&mut conn, order_id).await
    }

    /// Adds `qty` bundles to an order as a header line plus component lines.
    ///
    /// ## Errors
    /// - `NotFound` for an unknown order or bundle
    /// - `InvalidState` if the order is already paid
    /// - `Core(InsufficientAvailability)` if `qty` exceeds what can be sold
    /// - `Core(Configuration | Integrity | Drift)` from pricing
    ///
    /// Nothing is written on any error.
    pub async fn add_bundle_lines(
        &self,
        order_id: &str,
        bundle_id: &str,
        qty: i64,
        now: DateTime<Utc>,
    ) -> DbResult<BundleLinesAdded> {
        let mut tx = self.pool.begin().await?;

        lock_bundle(&mut tx, bundle_id).await?;
        let state = fetch_order_state(&mut tx, order_id).await?;
        ensure_editable(order_id, state)?;

        let (allocation, availability) = price_bundle(&mut tx, bundle_id, qty, now).await?;

        let bundle_key = Uuid::new_v4().to_string();
        let lines = allocation.to_line_metadata(&bundle_key);
        insert_lines(&mut tx, order_id, &lines, now).await?;

        tx.commit().await?;

        info!(
            order_id = %order_id,
            bundle_id = %bundle_id,
            bundle_key = %bundle_key,
            qty,
            discount = allocation.total_discount.cents(),
            "Bundle added to order"
        );

        Ok(BundleLinesAdded {
            order_id: order_id.to_string(),
            bundle_key,
            allocation,
            availability,
            lines,
        })
    }

    /// Re-prices an existing bundle purchase for a new quantity.
    ///
    /// The lines under `bundle_key` are replaced in the same transaction;
    /// the key itself is kept.
    pub async fn update_bundle_quantity(
        &self,
        order_id: &str,
        bundle_key: &str,
        qty: i64,
        now: DateTime<Utc>,
    ) -> DbResult<BundleLinesAdded> {
        let bundle_id: Option<String> = sqlx::query_scalar(
            r#"
            SELECT bundle_id FROM order_lines
            WHERE order_id = ?1 AND bundle_key = ?2 AND is_bundle_header = 1
            "#,
        )
        .bind(order_id)
        .bind(bundle_key)
        .fetch_optional(&self.pool)
        .await?;
        let bundle_id = bundle_id.ok_or_else(|| DbError::not_found("Bundle lines", bundle_key))?;

        let mut tx = self.pool.begin().await?;

        lock_bundle(&mut tx, &bundle_id).await?;
        let state = fetch_order_state(&mut tx, order_id).await?;
        ensure_editable(order_id, state)?;

        let (allocation, availability) = price_bundle(&mut tx, &bundle_id, qty, now).await?;

        sqlx::query("DELETE FROM order_lines WHERE order_id = ?1 AND bundle_key = ?2")
            .bind(order_id)
            .bind(bundle_key)
            .execute(&mut *tx)
            .await?;

        let lines = allocation.to_line_metadata(bundle_key);
        insert_lines(&mut tx, order_id, &lines, now).await?;

        tx.commit().await?;

        debug!(order_id = %order_id, bundle_key = %bundle_key, qty, "Bundle quantity updated");

        Ok(BundleLinesAdded {
            order_id: order_id.to_string(),
            bundle_key: bundle_key.to_string(),
            allocation,
            availability,
            lines,
        })
    }

    /// Lines of one bundle purchase, header first.
    pub async fn lines_for_bundle_key(&self, order_id: &str, bundle_key: &str) -> DbResult<Vec<BundleLineMetadata>> {
        let rows: Vec<LineRow> = sqlx::query_as(
            r#"
            SELECT bundle_key, bundle_id, variant_id, is_bundle_header, quantity,
                   base_unit_price_cents, effective_unit_price_cents, bundle_adj_cents,
                   bundle_pct_applied, bundle_share
            FROM order_lines
            WHERE order_id = ?1 AND bundle_key = ?2
            ORDER BY position ASC
            "#,
        )
        .bind(order_id)
        .bind(bundle_key)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BundleLineMetadata::from).collect())
    }

    /// Every bundle purchase on an order.
    pub async fn bundles_on_order(&self, order_id: &str) -> DbResult<Vec<OrderBundleRef>> {
        let refs = sqlx::query_as(
            r#"
            SELECT bundle_key, bundle_id, quantity
            FROM order_lines
            WHERE order_id = ?1 AND is_bundle_header = 1
            ORDER BY created_at ASC, bundle_key ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(refs)
    }

    /// Moves an order to `to_state`.
    ///
    /// Returns one [`OrderTransition`] per bundle on the order, for the
    /// reservation ledger. Bundles of the same id are summed.
    pub async fn transition(&self, order_id: &str, to_state: OrderState) -> DbResult<Vec<OrderTransition>> {
        let mut tx = self.pool.begin().await?;

        let from_state = fetch_order_state(&mut tx, order_id).await?;

        sqlx::query("UPDATE orders SET state = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(order_id)
            .bind(to_state)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        let bundles: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT bundle_id, SUM(quantity)
            FROM order_lines
            WHERE order_id = ?1 AND is_bundle_header = 1
            GROUP BY bundle_id
            ORDER BY bundle_id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            order_id = %order_id,
            from = from_state.as_str(),
            to = to_state.as_str(),
            bundles = bundles.len(),
            "Order transitioned"
        );

        Ok(bundles
            .into_iter()
            .map(|(bundle_id, quantity)| OrderTransition {
                order_id: order_id.to_string(),
                from_state,
                to_state,
                bundle_id,
                quantity,
            })
            .collect())
    }

    /// `findOpenOrdersContainingBundle(bundleId)`.
    pub async fn find_open_orders_containing_bundle(&self, bundle_id: &str) -> DbResult<Vec<OpenOrderRef>> {
        let mut conn = self.pool.acquire().await?;
        fetch_open_orders_containing_bundle(&mut conn, bundle_id).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{bundle, memory_db, stock_all};
    use combo_core::{ComponentStatus, CoreError};

    #[tokio::test]
    async fn test_add_bundle_lines_writes_header_and_components() {
        let db = memory_db().await;
        db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000), ("lamp", 2, 1000)])).await.unwrap();
        stock_all(&db, &[("tent", 10), ("lamp", 10)]).await;
        let order = db.orders().create_order().await.unwrap();

        let added = db.orders().add_bundle_lines(&order, "b-1", 2, Utc::now()).await.unwrap();
        assert_eq!(added.availability.max_quantity, 5);
        assert_eq!(added.allocation.total_discount.cents(), 800);

        let lines = db.orders().lines_for_bundle_key(&order, &added.bundle_key).await.unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].is_bundle_header);
        assert_eq!(lines[0].quantity, 2);
        let sum: i64 = lines.iter().map(|l| l.bundle_adj_amount.cents()).sum();
        assert_eq!(sum, -800);

        let refs = db.orders().bundles_on_order(&order).await.unwrap();
        assert_eq!(refs, vec![OrderBundleRef { bundle_key: added.bundle_key, bundle_id: "b-1".to_string(), quantity: 2 }]);
    }

    #[tokio::test]
    async fn test_add_rolls_back_on_shortfall() {
        let db = memory_db().await;
        db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000)])).await.unwrap();
        stock_all(&db, &[("tent", 1)]).await;
        let order = db.orders().create_order().await.unwrap();

        let err = db.orders().add_bundle_lines(&order, "b-1", 2, Utc::now()).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::InsufficientAvailability { requested: 2, available: 1, .. })
        ));
        assert!(db.orders().bundles_on_order(&order).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_stock_is_integrity_error() {
        let db = memory_db().await;
        db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000), ("ghost", 1, 100)])).await.unwrap();
        stock_all(&db, &[("tent", 5)]).await;
        let order = db.orders().create_order().await.unwrap();

        let err = db.orders().add_bundle_lines(&order, "b-1", 1, Utc::now()).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::Integrity { .. })));
    }

    #[tokio::test]
    async fn test_disabled_component_refuses_add() {
        let db = memory_db().await;
        db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000), ("lamp", 1, 500)])).await.unwrap();
        stock_all(&db, &[("tent", 10), ("lamp", 10)]).await;
        db.stock().set_status("lamp", ComponentStatus::Disabled).await.unwrap();
        let order = db.orders().create_order().await.unwrap();

        let err = db.orders().add_bundle_lines(&order, "b-1", 1, Utc::now()).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::InsufficientAvailability { requested: 1, available: 0, .. })
        ));
        assert!(db.orders().bundles_on_order(&order).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_quantity_keeps_key() {
        let db = memory_db().await;
        db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000)])).await.unwrap();
        stock_all(&db, &[("tent", 10)]).await;
        let order = db.orders().create_order().await.unwrap();
        let added = db.orders().add_bundle_lines(&order, "b-1", 1, Utc::now()).await.unwrap();

        let updated = db
            .orders()
            .update_bundle_quantity(&order, &added.bundle_key, 3, Utc::now())
            .await
            .unwrap();
        assert_eq!(updated.bundle_key, added.bundle_key);
        assert_eq!(updated.allocation.total_discount.cents(), 600);

        let lines = db.orders().lines_for_bundle_key(&order, &added.bundle_key).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].quantity, 3);
    }

    #[tokio::test]
    async fn test_transition_and_open_orders() {
        let db = memory_db().await;
        db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000)])).await.unwrap();
        stock_all(&db, &[("tent", 10)]).await;
        let order = db.orders().create_order().await.unwrap();
        db.orders().add_bundle_lines(&order, "b-1", 2, Utc::now()).await.unwrap();
        db.orders().add_bundle_lines(&order, "b-1", 1, Utc::now()).await.unwrap();

        let transitions = db.orders().transition(&order, OrderState::PaymentSettled).await.unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from_state, OrderState::AddingItems);
        assert_eq!(transitions[0].quantity, 3);
        assert_eq!(transitions[0].delta(), 3);

        let open = db.orders().find_open_orders_containing_bundle("b-1").await.unwrap();
        assert_eq!(open, vec![OpenOrderRef { order_id: order.clone(), quantity: 3 }]);

        // paid orders no longer accept bundle lines
        let err = db.orders().add_bundle_lines(&order, "b-1", 1, Utc::now()).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidState { .. }));

        db.orders().transition(&order, OrderState::Delivered).await.unwrap();
        assert!(db.orders().find_open_orders_containing_bundle("b-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_counts_open_orders() {
        let db = memory_db().await;
        db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000)])).await.unwrap();
        stock_all(&db, &[("tent", 10)]).await;
        let order = db.orders().create_order().await.unwrap();
        db.orders().add_bundle_lines(&order, "b-1", 4, Utc::now()).await.unwrap();
        db.orders().transition(&order, OrderState::PaymentAuthorized).await.unwrap();

        let outcome = db.reservations().reconcile("b-1").await.unwrap();
        assert_eq!(outcome.recomputed, 4);
        assert!(outcome.corrected);
        assert_eq!(db.reservations().get("b-1").await.unwrap(), 4);
    }
}
