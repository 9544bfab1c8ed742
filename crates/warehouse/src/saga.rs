//! Saga compensation steps.
//!
//! An external order saga reserves stock with a forward `Deduct` step and undoes
//! it with a compensating `Revert` step. Each step carries a caller-supplied
//! idempotency key so a retried delivery is applied once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{EngineError, EngineResult, SkuId, WarehouseId};

use crate::stock::{
    AdjustmentBatch, AdjustmentReason, IdempotencyKey, StockAdjustment, validate_quantity,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStepKind {
    /// Forward action: debit `stock`.
    Deduct,
    /// Compensation: credit `stock` back.
    Revert,
}

impl SagaStepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStepKind::Deduct => "deduct",
            SagaStepKind::Revert => "revert",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deduct" => Some(SagaStepKind::Deduct),
            "revert" => Some(SagaStepKind::Revert),
            _ => None,
        }
    }

    fn reason(&self) -> AdjustmentReason {
        match self {
            SagaStepKind::Deduct => AdjustmentReason::SagaDeduct,
            SagaStepKind::Revert => AdjustmentReason::SagaRevert,
        }
    }
}

/// A requested saga step, before it reaches the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStepRequest {
    pub key: IdempotencyKey,
    pub kind: SagaStepKind,
    pub warehouse_id: WarehouseId,
    pub sku_id: SkuId,
    pub quantity: i64,
}

impl SagaStepRequest {
    pub fn new(
        key: IdempotencyKey,
        kind: SagaStepKind,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
        quantity: i64,
    ) -> EngineResult<Self> {
        validate_quantity(quantity)?;
        if key.is_engine_reserved() {
            return Err(EngineError::invalid(format!(
                "idempotency key '{key}' uses a prefix reserved for engine batches"
            )));
        }
        Ok(Self {
            key,
            kind,
            warehouse_id,
            sku_id,
            quantity,
        })
    }

    /// The ledger batch for this step, keyed by the step's idempotency key.
    pub fn batch(&self) -> AdjustmentBatch {
        let line = match self.kind {
            SagaStepKind::Deduct => StockAdjustment::debit(self.warehouse_id, self.sku_id, self.quantity),
            SagaStepKind::Revert => StockAdjustment::credit(self.warehouse_id, self.sku_id, self.quantity),
        };
        AdjustmentBatch::single(self.kind.reason(), line).with_key(self.key.clone())
    }
}

/// A saga step that has been applied to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStep {
    pub key: IdempotencyKey,
    pub kind: SagaStepKind,
    pub warehouse_id: WarehouseId,
    pub sku_id: SkuId,
    pub quantity: i64,
    pub applied_at: DateTime<Utc>,
}

impl SagaStep {
    /// Rebuild a step from the ledger's key log.
    pub fn from_batch(
        key: IdempotencyKey,
        batch: &AdjustmentBatch,
        applied_at: DateTime<Utc>,
    ) -> Option<Self> {
        let kind = match batch.reason {
            AdjustmentReason::SagaDeduct => SagaStepKind::Deduct,
            AdjustmentReason::SagaRevert => SagaStepKind::Revert,
            _ => return None,
        };
        let [line] = batch.lines.as_slice() else {
            return None;
        };
        Some(Self {
            key,
            kind,
            warehouse_id: line.warehouse_id,
            sku_id: line.sku_id,
            quantity: line.delta_stock.abs(),
            applied_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_core::ErrorKind;

    fn request(kind: SagaStepKind, quantity: i64) -> EngineResult<SagaStepRequest> {
        SagaStepRequest::new(
            IdempotencyKey::new("order-7:deduct").unwrap(),
            kind,
            WarehouseId::from_u128(1),
            SkuId::from_u128(2),
            quantity,
        )
    }

    #[test]
    fn deduct_debits_stock_and_revert_credits_it() {
        let deduct = request(SagaStepKind::Deduct, 4).unwrap().batch();
        assert_eq!(deduct.lines[0].delta_stock, -4);
        assert_eq!(deduct.lines[0].delta_locked, 0);
        assert_eq!(deduct.reason, AdjustmentReason::SagaDeduct);

        let revert = request(SagaStepKind::Revert, 4).unwrap().batch();
        assert_eq!(revert.lines[0].delta_stock, 4);
        assert!(revert.key.is_some());
    }

    #[test]
    fn engine_reserved_keys_are_rejected() {
        for key in ["allocation:order-1:lock", "transfer:42:complete"] {
            let err = SagaStepRequest::new(
                IdempotencyKey::new(key).unwrap(),
                SagaStepKind::Deduct,
                WarehouseId::from_u128(1),
                SkuId::from_u128(2),
                1,
            )
            .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let err = request(SagaStepKind::Deduct, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn step_rebuilds_from_its_batch() {
        let req = request(SagaStepKind::Deduct, 3).unwrap();
        let now = Utc::now();
        let step = SagaStep::from_batch(req.key.clone(), &req.batch(), now).unwrap();
        assert_eq!(step.kind, SagaStepKind::Deduct);
        assert_eq!((step.warehouse_id, step.sku_id, step.quantity), (req.warehouse_id, req.sku_id, 3));
        assert_eq!(step.applied_at, now);

        let manual = AdjustmentBatch::single(
            AdjustmentReason::Manual,
            StockAdjustment::credit(req.warehouse_id, req.sku_id, 1),
        );
        assert!(SagaStep::from_batch(req.key.clone(), &manual, now).is_none());
    }
}
