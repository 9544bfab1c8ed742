//! Saga compensation port: `DeductStock` / `RevertStock` for an external order saga.
//!
//! Every step carries the coordinator's idempotency key. A redelivered step is
//! answered with the step recorded the first time and touches no stock. The
//! first answer is read back from the store too, so every delivery returns
//! the same step.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use stockflow_core::{EngineError, EngineResult, SkuId, WarehouseId};
use stockflow_warehouse::{
    BatchOutcome, IdempotencyKey, SagaStep, SagaStepKind, SagaStepRequest, WarehouseEvent,
};

use crate::publisher::EventPublisher;
use crate::services::ledger::StockLedger;
use crate::store::{StockStore, WarehouseStore};

#[derive(Debug)]
pub struct SagaPort<S> {
    store: Arc<S>,
    ledger: StockLedger<S>,
    publisher: EventPublisher,
}

impl<S> SagaPort<S>
where
    S: StockStore + WarehouseStore,
{
    pub fn new(store: Arc<S>, ledger: StockLedger<S>, publisher: EventPublisher) -> Self {
        Self {
            store,
            ledger,
            publisher,
        }
    }

    /// Forward action: debit `quantity` from available stock.
    ///
    /// Locked units are never consumed, so the step fails with
    /// `InsufficientStock` when `stock - locked < quantity`.
    #[instrument(skip(self), fields(warehouse_id = %warehouse_id, sku_id = %sku_id), err)]
    pub fn deduct_stock(
        &self,
        key: &str,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
        quantity: i64,
    ) -> EngineResult<SagaStep> {
        let request = SagaStepRequest::new(
            IdempotencyKey::new(key)?,
            SagaStepKind::Deduct,
            warehouse_id,
            sku_id,
            quantity,
        )?;
        self.execute(request)
    }

    /// Compensation: credit `quantity` back.
    ///
    /// A pair with no record yet is created; that means the compensation
    /// overtook its forward step, which is logged.
    #[instrument(skip(self), fields(warehouse_id = %warehouse_id, sku_id = %sku_id), err)]
    pub fn revert_stock(
        &self,
        key: &str,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
        quantity: i64,
    ) -> EngineResult<SagaStep> {
        let request = SagaStepRequest::new(
            IdempotencyKey::new(key)?,
            SagaStepKind::Revert,
            warehouse_id,
            sku_id,
            quantity,
        )?;
        if self.store.get_stock(warehouse_id, sku_id)?.is_none() {
            warn!(
                key,
                warehouse_id = %warehouse_id,
                sku_id = %sku_id,
                quantity,
                "revert for a pair with no stock record; compensation ran ahead of its forward step"
            );
        }
        self.execute(request)
    }

    /// The step recorded under `key`, if any.
    pub fn saga_step(&self, key: &str) -> EngineResult<Option<SagaStep>> {
        let key = IdempotencyKey::new(key)?;
        Ok(self
            .store
            .applied_batch(&key)?
            .and_then(|applied| SagaStep::from_batch(applied.key, &applied.batch, applied.applied_at)))
    }

    fn execute(&self, request: SagaStepRequest) -> EngineResult<SagaStep> {
        match self.ledger.apply(&request.batch())? {
            BatchOutcome::Applied(_) => {
                let step = self.saga_step(request.key.as_str())?.ok_or_else(|| {
                    EngineError::internal(format!(
                        "saga step '{}' applied but not recorded",
                        request.key
                    ))
                })?;
                info!(
                    key = %step.key,
                    kind = step.kind.as_str(),
                    quantity = step.quantity,
                    "saga step applied"
                );
                self.publisher
                    .publish(WarehouseEvent::SagaStepApplied { step: step.clone() });
                Ok(step)
            }
            BatchOutcome::Duplicate => self.saga_step(request.key.as_str())?.ok_or_else(|| {
                EngineError::conflict(format!(
                    "idempotency key '{}' belongs to a non-saga adjustment",
                    request.key
                ))
            }),
        }
    }
}
