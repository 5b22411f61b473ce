//! # Bundle Service
//!
//! What the host order system calls. Each operation reads fresh data,
//! runs the pure functions from `combo-core` and commits through
//! `combo-db`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Order System → BundleService                      │
//! │                                                                         │
//! │  admin        create_bundle ─► activate_bundle                          │
//! │  storefront   quote, availability                                       │
//! │  cart         add_bundle_to_order, update_bundle_quantity               │
//! │  checkout     verify_before_checkout                                    │
//! │  pricing      evaluate_promotion (policy read once per request)         │
//! │  lifecycle    transition_order ─► ReservationLedger                     │
//! │  catalog      component_changed ─► recompute queue                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use combo_core::validation::validate_bundle_definition;
use combo_core::{
    allocate, assess_health, compute_sellable, AllocationResult, AvailabilityResult, BundleDefinition,
    BundleStatus, CoreError, GuardResult, OrderState, PromotionCandidate, PromotionGuard,
};
use combo_db::{BundleLinesAdded, Database};

use crate::error::EngineResult;
use crate::ledger::ReservationLedger;

/// Reason recorded on recompute requests raised by catalog changes.
pub const COMPONENT_CHANGED: &str = "component_changed";

/// Entry point for the host order system.
#[derive(Debug, Clone)]
pub struct BundleService {
    db: Arc<Database>,
    ledger: ReservationLedger,
}

impl BundleService {
    /// Standalone service with its own ledger. Inside a running engine use
    /// [`EngineRuntime::service`](crate::EngineRuntime::service) instead.
    pub fn new(db: Arc<Database>) -> Self {
        let ledger = ReservationLedger::new(db.clone());
        Self::with_ledger(db, ledger)
    }

    pub fn with_ledger(db: Arc<Database>, ledger: ReservationLedger) -> Self {
        BundleService { db, ledger }
    }

    pub fn ledger(&self) -> &ReservationLedger {
        &self.ledger
    }

    // =========================================================================
    // Definitions
    // =========================================================================

    /// Stores a new bundle as a draft.
    ///
    /// The definition is validated before anything is written.
    pub async fn create_bundle(&self, mut definition: BundleDefinition) -> EngineResult<BundleDefinition> {
        definition.status = BundleStatus::Draft;
        definition.bundle_reserved_open = 0;
        validate_bundle_definition(&definition).map_err(CoreError::from)?;

        self.db.bundles().insert(&definition).await?;
        info!(bundle_id = %definition.id, name = %definition.name, "Bundle created");
        Ok(definition)
    }

    /// Moves a draft to active.
    ///
    /// Re-validates the stored definition and refuses bundles whose
    /// components are unusable.
    pub async fn activate_bundle(&self, bundle_id: &str) -> EngineResult<BundleDefinition> {
        let mut definition = self.db.bundles().get_required(bundle_id).await?;
        validate_bundle_definition(&definition).map_err(CoreError::from)?;

        let statuses = self.db.stock().component_statuses(&definition.variant_ids()).await?;
        let health = assess_health(&definition, &statuses, Utc::now());
        if let Some(broken) = health.broken_components.first() {
            return Err(CoreError::integrity(bundle_id, &broken.variant_id, broken.reason.as_str()).into());
        }

        self.db.bundles().set_status(bundle_id, BundleStatus::Active).await?;
        self.db.recompute_queue().enqueue(bundle_id, "activated").await?;
        definition.status = BundleStatus::Active;

        info!(bundle_id = %bundle_id, "Bundle activated");
        Ok(definition)
    }

    // =========================================================================
    // Pricing and Availability
    // =========================================================================

    /// Price breakdown for `qty` bundles at the stored snapshot prices.
    pub async fn quote(&self, bundle_id: &str, qty: i64) -> EngineResult<AllocationResult> {
        let definition = self.db.bundles().get_required(bundle_id).await?;
        Ok(allocate(&definition, qty)?)
    }

    /// Sellable quantity right now. Zero with reason `"broken"` while a
    /// component is disabled.
    pub async fn availability(&self, bundle_id: &str, now: DateTime<Utc>) -> EngineResult<AvailabilityResult> {
        let definition = self.db.bundles().get_required(bundle_id).await?;
        let variant_ids = definition.variant_ids();
        let stock = self.db.stock().snapshots_for(&variant_ids).await?;
        let statuses = self.db.stock().component_statuses(&variant_ids).await?;
        Ok(compute_sellable(
            &definition,
            &stock,
            &statuses,
            definition.bundle_reserved_open,
            now,
        )?)
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Adds `qty` bundles to an order being built.
    pub async fn add_bundle_to_order(
        &self,
        order_id: &str,
        bundle_id: &str,
        qty: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<BundleLinesAdded> {
        Ok(self.db.orders().add_bundle_lines(order_id, bundle_id, qty, now).await?)
    }

    /// Re-prices one bundle purchase for a new quantity.
    pub async fn update_bundle_quantity(
        &self,
        order_id: &str,
        bundle_key: &str,
        qty: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<BundleLinesAdded> {
        Ok(self.db.orders().update_bundle_quantity(order_id, bundle_key, qty, now).await?)
    }

    /// Re-checks every bundle on the order against fresh stock.
    ///
    /// Quantities of the same bundle under different keys are summed.
    ///
    /// ## Errors
    /// `Core(InsufficientAvailability)` for the first bundle that no longer fits.
    pub async fn verify_before_checkout(
        &self,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<AvailabilityResult>> {
        let mut wanted: BTreeMap<String, i64> = BTreeMap::new();
        for purchase in self.db.orders().bundles_on_order(order_id).await? {
            *wanted.entry(purchase.bundle_id).or_default() += purchase.quantity;
        }

        let mut results = Vec::with_capacity(wanted.len());
        for (bundle_id, qty) in wanted {
            let availability = self.availability(&bundle_id, now).await?;
            if let Err(e) = availability.ensure(qty) {
                warn!(
                    order_id = %order_id,
                    bundle_id = %bundle_id,
                    requested = qty,
                    available = availability.max_quantity,
                    "Bundle no longer available at checkout"
                );
                return Err(e.into());
            }
            results.push(availability);
        }

        debug!(order_id = %order_id, bundles = results.len(), "Checkout verified");
        Ok(results)
    }

    /// Guards a promotion against every bundle line of an order.
    ///
    /// The policy is read once and compiled once for the whole order.
    pub async fn evaluate_promotion(
        &self,
        order_id: &str,
        promotion: &PromotionCandidate,
    ) -> EngineResult<Vec<GuardResult>> {
        let policy = self.db.policy().get().await?;
        let guard = PromotionGuard::new(&policy)?;

        let mut results = Vec::new();
        for purchase in self.db.orders().bundles_on_order(order_id).await? {
            let lines = self.db.orders().lines_for_bundle_key(order_id, &purchase.bundle_key).await?;
            results.extend(lines.iter().map(|line| guard.evaluate(line, promotion)));
        }

        let allowed = results.iter().filter(|r| r.allowed).count();
        debug!(
            order_id = %order_id,
            promotion = %promotion.name,
            lines = results.len(),
            allowed,
            "Promotion evaluated against bundle lines"
        );
        Ok(results)
    }

    /// Moves an order and feeds the resulting transitions to the ledger.
    pub async fn transition_order(
        &self,
        order_id: &str,
        to_state: OrderState,
    ) -> EngineResult<Vec<Option<i64>>> {
        let transitions = self.db.orders().transition(order_id, to_state).await?;
        self.ledger.apply_transitions(&transitions).await
    }

    /// `adjustReservation(bundleId, delta)`.
    pub async fn adjust_reservation(&self, bundle_id: &str, delta: i64) -> EngineResult<i64> {
        self.ledger.adjust(bundle_id, delta).await
    }

    // =========================================================================
    // Catalog Notifications
    // =========================================================================

    /// Queues a recompute for every bundle that uses `variant_id`.
    ///
    /// Returns the affected bundle ids.
    pub async fn component_changed(&self, variant_id: &str) -> EngineResult<Vec<String>> {
        let bundle_ids = self.db.bundles().bundles_containing_variant(variant_id).await?;
        for bundle_id in &bundle_ids {
            self.db.recompute_queue().enqueue(bundle_id, COMPONENT_CHANGED).await?;
        }

        info!(variant_id = %variant_id, bundles = bundle_ids.len(), "Component change queued");
        Ok(bundle_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::recompute::process_batch;
    use crate::single_flight::SingleFlight;
    use crate::test_support::{bundle, engine_db};
    use crate::EngineConfig;
    use combo_core::guard::{BundleOverride, GlobalPromotionPolicy, GuardRule, PromotionAction};
    use combo_core::types::Percent;
    use combo_core::{AvailabilityStatus, ComponentStatus, PromotionPolicy};

    async fn service_with_stock(levels: &[(&str, i64)]) -> BundleService {
        let db = engine_db().await;
        for (variant, on_hand) in levels {
            db.stock().set_level(variant, variant, *on_hand, 0).await.unwrap();
        }
        BundleService::new(db)
    }

    fn ten_percent_coupon() -> PromotionCandidate {
        PromotionCandidate {
            code: Some("SAVE10".to_string()),
            name: "Save 10".to_string(),
            action: PromotionAction::PercentOff(Percent::from_bps(1000)),
            promotion_override: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_create_then_activate() {
        let service = service_with_stock(&[("tent", 10)]).await;

        let created = service.create_bundle(bundle("b-1", &[("tent", 1, 2000)])).await.unwrap();
        assert_eq!(created.status, BundleStatus::Draft);

        let draft = service.availability("b-1", Utc::now()).await.unwrap();
        assert_eq!(draft.status, AvailabilityStatus::Draft);
        assert_eq!(draft.max_quantity, 0);

        let active = service.activate_bundle("b-1").await.unwrap();
        assert_eq!(active.status, BundleStatus::Active);
        assert_eq!(service.availability("b-1", Utc::now()).await.unwrap().max_quantity, 10);
    }

    #[tokio::test]
    async fn test_invalid_definition_is_rejected() {
        let service = service_with_stock(&[]).await;
        let mut definition = bundle("b-1", &[("tent", 1, 2000)]);
        definition.fixed_price_cents = Some(1500);

        let err = service.create_bundle(definition).await.unwrap_err();
        assert!(err.is_config_error());
        assert!(service.db.bundles().get_by_id("b-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_activation_refuses_broken_component() {
        let service = service_with_stock(&[("tent", 10)]).await;
        service.create_bundle(bundle("b-1", &[("tent", 1, 2000), ("lamp", 1, 500)])).await.unwrap();

        let err = service.activate_bundle("b-1").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::Integrity { ref variant_id, .. }) if variant_id == "lamp"
        ));
        let stored = service.db.bundles().get_required("b-1").await.unwrap();
        assert_eq!(stored.status, BundleStatus::Draft);
    }

    #[tokio::test]
    async fn test_disabled_component_stops_sales() {
        let service = service_with_stock(&[("tent", 10), ("lamp", 10)]).await;
        service.db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000), ("lamp", 1, 500)])).await.unwrap();
        let order = service.db.orders().create_order().await.unwrap();
        assert_eq!(service.availability("b-1", Utc::now()).await.unwrap().max_quantity, 10);

        service.db.stock().set_status("lamp", ComponentStatus::Disabled).await.unwrap();

        let availability = service.availability("b-1", Utc::now()).await.unwrap();
        assert!(!availability.is_available);
        assert_eq!(availability.max_quantity, 0);
        assert_eq!(availability.status, AvailabilityStatus::Broken);
        assert_eq!(availability.reason.as_deref(), Some("broken"));

        let err = service.add_bundle_to_order(&order, "b-1", 1, Utc::now()).await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::InsufficientAvailability { .. })));

        service.db.stock().set_status("lamp", ComponentStatus::Active).await.unwrap();
        assert!(service.add_bundle_to_order(&order, "b-1", 1, Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_quote_uses_snapshot_prices() {
        let service = service_with_stock(&[]).await;
        service.db.bundles().insert(&bundle("b-1", &[("a", 1, 2000), ("b", 1, 2000)])).await.unwrap();

        let quote = service.quote("b-1", 1).await.unwrap();
        assert_eq!(quote.total_discount.cents(), 400);
        assert!(quote.components.iter().all(|c| c.bundle_adj_amount.cents() == -200));

        let err = service.quote("b-1", 0).await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_capacity_gate_through_ledger() {
        let service = service_with_stock(&[("tent", 100)]).await;
        let mut capped = bundle("b-1", &[("tent", 1, 2000)]);
        capped.bundle_cap = Some(50);
        service.db.bundles().insert(&capped).await.unwrap();
        assert_eq!(service.adjust_reservation("b-1", 45).await.unwrap(), 45);

        let availability = service.availability("b-1", Utc::now()).await.unwrap();
        assert_eq!(availability.components_max, 100);
        assert_eq!(availability.max_quantity, 5);

        let order = service.db.orders().create_order().await.unwrap();
        let err = service.add_bundle_to_order(&order, "b-1", 6, Utc::now()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::InsufficientAvailability { requested: 6, available: 5, .. })
        ));
        service.add_bundle_to_order(&order, "b-1", 5, Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn test_order_lifecycle_feeds_counter() {
        let service = service_with_stock(&[("tent", 20)]).await;
        service.db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000)])).await.unwrap();

        let order = service.db.orders().create_order().await.unwrap();
        let added = service.add_bundle_to_order(&order, "b-1", 2, Utc::now()).await.unwrap();
        service.update_bundle_quantity(&order, &added.bundle_key, 3, Utc::now()).await.unwrap();

        service.transition_order(&order, OrderState::ArrangingPayment).await.unwrap();
        let paid = service.transition_order(&order, OrderState::PaymentAuthorized).await.unwrap();
        assert_eq!(paid, vec![Some(3)]);

        let shipped = service.transition_order(&order, OrderState::Shipped).await.unwrap();
        assert_eq!(shipped, vec![None]);

        let delivered = service.transition_order(&order, OrderState::Delivered).await.unwrap();
        assert_eq!(delivered, vec![Some(0)]);
    }

    #[tokio::test]
    async fn test_checkout_recheck_sees_stock_loss() {
        let service = service_with_stock(&[("tent", 4)]).await;
        service.db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000)])).await.unwrap();

        let order = service.db.orders().create_order().await.unwrap();
        service.add_bundle_to_order(&order, "b-1", 2, Utc::now()).await.unwrap();
        service.add_bundle_to_order(&order, "b-1", 1, Utc::now()).await.unwrap();
        assert_eq!(service.verify_before_checkout(&order, Utc::now()).await.unwrap().len(), 1);

        // Another channel sold most of the stock meanwhile.
        service.db.stock().set_level("tent", "tent", 4, 2).await.unwrap();
        let err = service.verify_before_checkout(&order, Utc::now()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::InsufficientAvailability { requested: 3, available: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_bundle_override_beats_global_allow() {
        let service = service_with_stock(&[("tent", 10), ("lamp", 10)]).await;
        service.db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000), ("lamp", 1, 500)])).await.unwrap();

        let mut policy = PromotionPolicy {
            default: GlobalPromotionPolicy::Allow,
            ..PromotionPolicy::default()
        };
        policy.bundle_overrides.insert("b-1".to_string(), BundleOverride::No);
        service.db.policy().save(&policy).await.unwrap();

        let order = service.db.orders().create_order().await.unwrap();
        service.add_bundle_to_order(&order, "b-1", 1, Utc::now()).await.unwrap();

        let results = service.evaluate_promotion(&order, &ten_percent_coupon()).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].deciding_rule, GuardRule::HeaderLine);
        for result in &results[1..] {
            assert!(!result.allowed);
            assert_eq!(result.deciding_rule, GuardRule::BundleOverride);
        }
    }

    #[tokio::test]
    async fn test_global_allow_lets_components_stack() {
        let service = service_with_stock(&[("tent", 10)]).await;
        service.db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000)])).await.unwrap();
        service
            .db
            .policy()
            .save(&PromotionPolicy {
                default: GlobalPromotionPolicy::Allow,
                ..PromotionPolicy::default()
            })
            .await
            .unwrap();

        let order = service.db.orders().create_order().await.unwrap();
        service.add_bundle_to_order(&order, "b-1", 1, Utc::now()).await.unwrap();

        let results = service.evaluate_promotion(&order, &ten_percent_coupon()).await.unwrap();
        assert!(!results[0].allowed);
        assert!(results[1].allowed);
    }

    #[tokio::test]
    async fn test_bad_exclusion_pattern_is_a_config_error() {
        let service = service_with_stock(&[]).await;
        service
            .db
            .policy()
            .save(&PromotionPolicy {
                exclusion_patterns: vec!["(".to_string()],
                ..PromotionPolicy::default()
            })
            .await
            .unwrap();
        let order = service.db.orders().create_order().await.unwrap();

        let err = service.evaluate_promotion(&order, &ten_percent_coupon()).await.unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_component_change_queues_recompute() {
        let service = service_with_stock(&[("tent", 10), ("lamp", 10)]).await;
        service.db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000), ("lamp", 1, 500)])).await.unwrap();
        service.db.bundles().insert(&bundle("b-2", &[("lamp", 2, 500)])).await.unwrap();
        service.db.bundles().insert(&bundle("b-3", &[("tent", 1, 2000)])).await.unwrap();

        service.db.stock().set_status("lamp", ComponentStatus::Disabled).await.unwrap();
        let affected = service.component_changed("lamp").await.unwrap();
        assert_eq!(affected, vec!["b-1".to_string(), "b-2".to_string()]);
        assert_eq!(service.db.recompute_queue().count_pending().await.unwrap(), 2);

        let report = process_batch(&service.db, &EngineConfig::default(), &SingleFlight::new())
            .await
            .unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(service.db.cache().broken_bundle_ids().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_bundle_is_not_found() {
        let service = service_with_stock(&[]).await;
        let err = service.availability("nope", Utc::now()).await.unwrap_err();
        assert!(matches!(err, EngineError::Database(combo_db::DbError::NotFound { .. })));
    }
}
