//! Multi-warehouse order allocation.
//!
//! Planning reads candidate stock and returns a split; it reserves nothing.
//! Committing a plan locks every allocated unit as one keyed ledger batch, so
//! a plan whose stock moved in the meantime is rejected as a whole.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use stockflow_core::{EngineError, EngineResult, SkuId};
use stockflow_warehouse::{
    ALLOCATION_KEY_PREFIX, AdjustmentBatch, AdjustmentReason, AllocationPlan, AllocationResult, BatchOutcome, Candidate,
    GeoPoint, IdempotencyKey, OrderLine, ShippingCostModel, WarehouseEvent, merge_lines,
    plan_allocation,
};

use crate::publisher::EventPublisher;
use crate::services::ledger::StockLedger;
use crate::store::{StockStore, WarehouseStore};

#[derive(Debug)]
pub struct OrderAllocator<S> {
    store: Arc<S>,
    ledger: StockLedger<S>,
    publisher: EventPublisher,
    shipping: ShippingCostModel,
}

impl<S> OrderAllocator<S>
where
    S: StockStore + WarehouseStore,
{
    pub fn new(
        store: Arc<S>,
        ledger: StockLedger<S>,
        publisher: EventPublisher,
        shipping: ShippingCostModel,
    ) -> Self {
        Self {
            store,
            ledger,
            publisher,
            shipping,
        }
    }

    /// Split `items` across active warehouses for delivery to (`latitude`, `longitude`).
    pub fn allocate_order(
        &self,
        items: &[OrderLine],
        latitude: f64,
        longitude: f64,
    ) -> EngineResult<Vec<AllocationResult>> {
        Ok(self.plan(items, latitude, longitude)?.results)
    }

    #[instrument(skip(self, items), fields(lines = items.len()), err)]
    pub fn plan(&self, items: &[OrderLine], latitude: f64, longitude: f64) -> EngineResult<AllocationPlan> {
        let origin = GeoPoint::new(latitude, longitude)?;
        let lines = merge_lines(items)?;

        let mut candidates: HashMap<SkuId, Vec<Candidate>> = HashMap::with_capacity(lines.len());
        for line in &lines {
            candidates.insert(line.sku_id, self.store.candidates_with_stock(line.sku_id, 1)?);
        }

        let plan = plan_allocation(&origin, &lines, &candidates, &self.shipping)?;
        debug!(
            warehouses = plan.warehouse_count(),
            ship_cost = plan.total_ship_cost(),
            "allocation planned"
        );
        Ok(plan)
    }

    /// Lock every unit of `plan` under `key`.
    ///
    /// Retrying with the same key and plan is a no-op returning `Duplicate`.
    /// If any warehouse left `Active` or any line no longer fits, nothing is
    /// locked and the call fails with `Conflict`.
    #[instrument(skip(self, plan), fields(warehouses = plan.warehouse_count()), err)]
    pub fn commit(&self, plan: &AllocationPlan, key: &str) -> EngineResult<BatchOutcome> {
        for result in &plan.results {
            let active = self
                .store
                .get_warehouse(result.warehouse_id)?
                .is_some_and(|w| w.is_active());
            if !active {
                return Err(EngineError::conflict(format!(
                    "warehouse {} is no longer active",
                    result.warehouse_code
                )));
            }
        }

        let batch = self.batch(plan, key, "lock", AdjustmentReason::AllocationLock)?;
        let outcome = self.ledger.apply(&batch).map_err(stale_plan)?;
        if !outcome.is_duplicate() {
            info!(key, units = units(plan), "allocation committed");
            self.publisher.publish(WarehouseEvent::AllocationCommitted {
                idempotency_key: key.to_string(),
                warehouse_ids: plan.results.iter().map(|r| r.warehouse_id).collect(),
                units: units(plan),
                occurred_at: Utc::now(),
            });
        }
        Ok(outcome)
    }

    /// Unlock a plan previously committed under `key`.
    ///
    /// Only the units locked by that commit are released: a key that was never
    /// committed is `NotFound`, and a plan other than the committed one is a
    /// `Conflict`.
    #[instrument(skip(self, plan), fields(warehouses = plan.warehouse_count()), err)]
    pub fn release(&self, plan: &AllocationPlan, key: &str) -> EngineResult<BatchOutcome> {
        let lock = self.batch(plan, key, "lock", AdjustmentReason::AllocationLock)?;
        let lock_key = lock
            .key
            .clone()
            .ok_or_else(|| EngineError::internal("allocation lock batch has no key"))?;
        let committed = self
            .store
            .applied_batch(&lock_key)?
            .ok_or_else(|| EngineError::not_found("allocation", key))?;
        if !committed.batch.same_effect(&lock) {
            return Err(EngineError::conflict(format!(
                "plan does not match the allocation committed under '{key}'"
            )));
        }

        let batch = self.batch(plan, key, "release", AdjustmentReason::AllocationRelease)?;
        let outcome = self.ledger.apply(&batch).map_err(stale_plan)?;
        if !outcome.is_duplicate() {
            info!(key, units = units(plan), "allocation released");
            self.publisher.publish(WarehouseEvent::AllocationReleased {
                idempotency_key: key.to_string(),
                warehouse_ids: plan.results.iter().map(|r| r.warehouse_id).collect(),
                units: units(plan),
                occurred_at: Utc::now(),
            });
        }
        Ok(outcome)
    }

    fn batch(
        &self,
        plan: &AllocationPlan,
        key: &str,
        phase: &str,
        reason: AdjustmentReason,
    ) -> EngineResult<AdjustmentBatch> {
        if plan.results.is_empty() {
            return Err(EngineError::invalid("allocation plan is empty"));
        }
        let lines = match reason {
            AdjustmentReason::AllocationRelease => plan.unlock_adjustments(),
            _ => plan.lock_adjustments(),
        };
        let key = IdempotencyKey::new(format!("{ALLOCATION_KEY_PREFIX}{key}:{phase}"))?;
        Ok(AdjustmentBatch::new(reason, lines).with_key(key))
    }
}

fn units(plan: &AllocationPlan) -> i64 {
    plan.results.iter().map(AllocationResult::units).sum()
}

fn stale_plan(err: EngineError) -> EngineError {
    match err {
        EngineError::InsufficientStock {
            sku_id,
            requested,
            available,
        } => EngineError::conflict(format!(
            "stock of sku {sku_id} changed since planning (requested {requested}, available {available})"
        )),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_core::{ErrorKind, WarehouseId};
    use stockflow_warehouse::{NewWarehouse, StockAdjustment, Warehouse, WarehouseStatus};

    use crate::store::InMemoryStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        allocator: OrderAllocator<InMemoryStore>,
        ledger: StockLedger<InMemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let ledger = StockLedger::new(store.clone(), EventPublisher::default());
        let allocator = OrderAllocator::new(
            store.clone(),
            ledger.clone(),
            EventPublisher::default(),
            ShippingCostModel::default(),
        );
        Fixture {
            store,
            allocator,
            ledger,
        }
    }

    fn warehouse(f: &Fixture, code: &str, lat: f64, lon: f64) -> Warehouse {
        let w = Warehouse::register(
            WarehouseId::new(),
            NewWarehouse::new(code, code).with_location(GeoPoint::new(lat, lon).unwrap()),
            Utc::now(),
        )
        .unwrap()
        .with_status(WarehouseStatus::Active, Utc::now())
        .unwrap();
        f.store.insert_warehouse(&w).unwrap();
        w
    }

    #[test]
    fn splits_a_line_no_single_warehouse_can_cover() {
        let f = fixture();
        let sku = SkuId::new();
        let a = warehouse(&f, "A", 0.0, 0.0);
        let b = warehouse(&f, "B", 0.0, 1.0);
        f.ledger.adjust_stock(a.id, sku, 6, 0).unwrap();
        f.ledger.adjust_stock(b.id, sku, 6, 0).unwrap();

        let results = f.allocator.allocate_order(&[OrderLine::new(sku, 10)], 0.0, 0.0).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].warehouse_id, a.id);
        assert_eq!(results[0].units(), 6);
        assert_eq!(results[1].units(), 4);
    }

    #[test]
    fn commit_locks_and_release_unlocks() {
        let f = fixture();
        let sku = SkuId::new();
        let a = warehouse(&f, "A", 0.0, 0.0);
        f.ledger.adjust_stock(a.id, sku, 10, 0).unwrap();

        let plan = f.allocator.plan(&[OrderLine::new(sku, 4)], 0.0, 0.0).unwrap();
        assert!(!f.allocator.commit(&plan, "order-1").unwrap().is_duplicate());
        assert!(f.allocator.commit(&plan, "order-1").unwrap().is_duplicate());
        assert_eq!(f.ledger.get_stock(a.id, sku).unwrap().locked, 4);

        f.allocator.release(&plan, "order-1").unwrap();
        let r = f.ledger.get_stock(a.id, sku).unwrap();
        assert_eq!((r.stock, r.locked), (10, 0));
    }

    #[test]
    fn stale_plan_is_conflict_and_locks_nothing() {
        let f = fixture();
        let sku = SkuId::new();
        let other = SkuId::new();
        let a = warehouse(&f, "A", 0.0, 0.0);
        f.ledger.adjust_stock(a.id, sku, 5, 0).unwrap();
        f.ledger.adjust_stock(a.id, other, 5, 0).unwrap();

        let plan = f
            .allocator
            .plan(&[OrderLine::new(other, 2), OrderLine::new(sku, 5)], 0.0, 0.0)
            .unwrap();
        f.ledger
            .apply(&AdjustmentBatch::single(
                AdjustmentReason::Manual,
                StockAdjustment::debit(a.id, sku, 1),
            ))
            .unwrap();

        let err = f.allocator.commit(&plan, "order-2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains(&sku.to_string()));
        assert_eq!(f.ledger.get_stock(a.id, other).unwrap().locked, 0);
    }

    #[test]
    fn release_without_commit_leaves_other_locks_alone() {
        let f = fixture();
        let sku = SkuId::new();
        let a = warehouse(&f, "A", 0.0, 0.0);
        f.ledger.adjust_stock(a.id, sku, 10, 0).unwrap();
        let plan = f.allocator.plan(&[OrderLine::new(sku, 4)], 0.0, 0.0).unwrap();
        f.ledger.adjust_stock(a.id, sku, 0, 4).unwrap();

        let err = f.allocator.release(&plan, "never-committed").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(f.ledger.get_stock(a.id, sku).unwrap().locked, 4);
    }

    #[test]
    fn release_with_another_plan_is_conflict() {
        let f = fixture();
        let sku = SkuId::new();
        let a = warehouse(&f, "A", 0.0, 0.0);
        f.ledger.adjust_stock(a.id, sku, 10, 0).unwrap();
        let committed = f.allocator.plan(&[OrderLine::new(sku, 2)], 0.0, 0.0).unwrap();
        f.allocator.commit(&committed, "order-4").unwrap();
        f.ledger.adjust_stock(a.id, sku, 0, 5).unwrap();

        let bigger = f.allocator.plan(&[OrderLine::new(sku, 3)], 0.0, 0.0).unwrap();
        let err = f.allocator.release(&bigger, "order-4").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(f.ledger.get_stock(a.id, sku).unwrap().locked, 7);

        f.allocator.release(&committed, "order-4").unwrap();
        assert_eq!(f.ledger.get_stock(a.id, sku).unwrap().locked, 5);
    }

    #[test]
    fn uncoverable_order_is_insufficient_stock() {
        let f = fixture();
        let sku = SkuId::new();
        let a = warehouse(&f, "A", 0.0, 0.0);
        f.ledger.adjust_stock(a.id, sku, 3, 0).unwrap();

        let err = f.allocator.allocate_order(&[OrderLine::new(sku, 4)], 0.0, 0.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
    }

    #[test]
    fn deactivated_warehouse_fails_commit() {
        let f = fixture();
        let sku = SkuId::new();
        let a = warehouse(&f, "A", 0.0, 0.0);
        f.ledger.adjust_stock(a.id, sku, 3, 0).unwrap();
        let plan = f.allocator.plan(&[OrderLine::new(sku, 3)], 0.0, 0.0).unwrap();

        let inactive = a.with_status(WarehouseStatus::Inactive, Utc::now()).unwrap();
        f.store
            .update_warehouse(&inactive, stockflow_core::ExpectedVersion::Exact(a.version))
            .unwrap();

        assert_eq!(f.allocator.commit(&plan, "order-3").unwrap_err().kind(), ErrorKind::Conflict);
    }
}
