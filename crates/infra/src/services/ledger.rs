//! Stock Ledger: the only writer of `stock` and `locked`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use stockflow_core::{EngineError, EngineResult, SkuId, WarehouseId};
use stockflow_warehouse::stock::final_states;
use stockflow_warehouse::{
    AdjustmentBatch, AdjustmentReason, BatchOutcome, StockAdjustment, StockRecord,
    WarehouseEvent,
};

use crate::publisher::EventPublisher;
use crate::store::{StockStore, WarehouseStore};

#[derive(Debug)]
pub struct StockLedger<S> {
    store: Arc<S>,
    publisher: EventPublisher,
}

impl<S> Clone for StockLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            publisher: self.publisher.clone(),
        }
    }
}

impl<S> StockLedger<S>
where
    S: StockStore + WarehouseStore,
{
    pub fn new(store: Arc<S>, publisher: EventPublisher) -> Self {
        Self { store, publisher }
    }

    /// Current record for a pair; `NotFound` if the pair was never adjusted.
    #[instrument(skip(self), fields(warehouse_id = %warehouse_id, sku_id = %sku_id), err)]
    pub fn get_stock(&self, warehouse_id: WarehouseId, sku_id: SkuId) -> EngineResult<StockRecord> {
        self.store
            .get_stock(warehouse_id, sku_id)?
            .ok_or_else(|| EngineError::not_found("stock record", format!("{warehouse_id}/{sku_id}")))
    }

    /// Apply both deltas to one pair as a single atomic step.
    #[instrument(skip(self), fields(warehouse_id = %warehouse_id, sku_id = %sku_id), err)]
    pub fn adjust_stock(
        &self,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
        delta_stock: i64,
        delta_locked: i64,
    ) -> EngineResult<StockRecord> {
        let line = StockAdjustment::new(warehouse_id, sku_id, delta_stock, delta_locked);
        if line.is_noop() {
            return Err(EngineError::invalid("adjustment changes nothing"));
        }

        let batch = AdjustmentBatch::single(AdjustmentReason::Manual, line);
        match self.apply(&batch)? {
            BatchOutcome::Applied(records) => records
                .into_iter()
                .last()
                .ok_or_else(|| EngineError::internal("ledger returned no record for a one-line batch")),
            BatchOutcome::Duplicate => Err(EngineError::internal("unkeyed batch reported as duplicate")),
        }
    }

    /// Apply a batch atomically, then log and publish the resulting records.
    ///
    /// Every warehouse named by the batch must exist.
    #[instrument(
        skip(self, batch),
        fields(reason = batch.reason.as_str(), lines = batch.lines.len(), key = ?batch.key.as_ref().map(|k| k.as_str())),
        err
    )]
    pub fn apply(&self, batch: &AdjustmentBatch) -> EngineResult<BatchOutcome> {
        if batch.lines.is_empty() {
            return Err(EngineError::invalid("adjustment batch has no lines"));
        }
        for line in &batch.lines {
            self.require_warehouse(line.warehouse_id)?;
        }

        let outcome = self.store.apply_batch(batch, Utc::now())?;
        match &outcome {
            BatchOutcome::Applied(records) => self.committed(batch, records),
            BatchOutcome::Duplicate => {
                warn!(
                    key = ?batch.key.as_ref().map(|k| k.as_str()),
                    "batch already applied under this idempotency key; skipped"
                );
            }
        }
        Ok(outcome)
    }

    /// Set replenishment thresholds. Zero disables a threshold.
    #[instrument(skip(self), fields(warehouse_id = %warehouse_id, sku_id = %sku_id), err)]
    pub fn set_stock_limits(
        &self,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
        safe_stock: i64,
        max_stock: i64,
    ) -> EngineResult<StockRecord> {
        if safe_stock < 0 || max_stock < 0 {
            return Err(EngineError::invalid("stock limits cannot be negative"));
        }
        if max_stock > 0 && safe_stock > max_stock {
            return Err(EngineError::invalid(format!(
                "safe stock {safe_stock} exceeds max stock {max_stock}"
            )));
        }
        self.require_warehouse(warehouse_id)?;

        let record = self
            .store
            .set_limits(warehouse_id, sku_id, safe_stock, max_stock, Utc::now())?;
        self.check_thresholds(&record);
        Ok(record)
    }

    pub fn list_stock(&self, warehouse_id: WarehouseId) -> EngineResult<Vec<StockRecord>> {
        self.require_warehouse(warehouse_id)?;
        Ok(self.store.list_stock_by_warehouse(warehouse_id)?)
    }

    pub fn list_stock_for_sku(&self, sku_id: SkuId) -> EngineResult<Vec<StockRecord>> {
        Ok(self.store.list_stock_by_sku(sku_id)?)
    }

    /// Log and publish records another component committed through the store
    /// (transfer transitions apply their batch together with the transfer row).
    pub(crate) fn committed(&self, batch: &AdjustmentBatch, records: &[StockRecord]) {
        let key = batch.key.as_ref().map(|k| k.to_string());
        for record in final_states(records) {
            info!(
                warehouse_id = %record.warehouse_id,
                sku_id = %record.sku_id,
                reason = batch.reason.as_str(),
                stock = record.stock,
                locked = record.locked,
                version = record.version,
                "stock adjusted"
            );
            self.check_thresholds(&record);
            self.publisher
                .publish(WarehouseEvent::stock_adjusted(&record, batch.reason, key.clone()));
        }
    }

    pub(crate) fn require_warehouse(&self, warehouse_id: WarehouseId) -> EngineResult<()> {
        match self.store.get_warehouse(warehouse_id)? {
            Some(_) => Ok(()),
            None => Err(EngineError::not_found("warehouse", warehouse_id)),
        }
    }

    fn check_thresholds(&self, record: &StockRecord) {
        if record.is_below_safe_stock() {
            warn!(
                warehouse_id = %record.warehouse_id,
                sku_id = %record.sku_id,
                available = record.available(),
                safe_stock = record.safe_stock,
                "available stock below safe level"
            );
        }
        if record.is_over_max_stock() {
            warn!(
                warehouse_id = %record.warehouse_id,
                sku_id = %record.sku_id,
                stock = record.stock,
                max_stock = record.max_stock,
                "stock above max level"
            );
        }
    }
}
