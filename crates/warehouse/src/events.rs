//! Facts published after engine state changes commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{SkuId, TransferId, WarehouseId};
use stockflow_events::Event;

use crate::saga::SagaStep;
use crate::stock::{AdjustmentReason, StockRecord};
use crate::transfer::{StockTransfer, TransferStatus};
use crate::warehouse::{Warehouse, WarehouseStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WarehouseEvent {
    WarehouseRegistered {
        warehouse_id: WarehouseId,
        code: String,
        name: String,
        occurred_at: DateTime<Utc>,
    },
    WarehouseStatusChanged {
        warehouse_id: WarehouseId,
        code: String,
        from: WarehouseStatus,
        to: WarehouseStatus,
        version: u64,
        occurred_at: DateTime<Utc>,
    },
    /// Final state of one `(warehouse, sku)` record after a committed batch.
    StockAdjusted {
        warehouse_id: WarehouseId,
        sku_id: SkuId,
        reason: AdjustmentReason,
        idempotency_key: Option<String>,
        stock: i64,
        locked: i64,
        version: u64,
        occurred_at: DateTime<Utc>,
    },
    TransferTransitioned {
        transfer_id: TransferId,
        transfer_no: String,
        from: Option<TransferStatus>,
        to: TransferStatus,
        version: u64,
        occurred_at: DateTime<Utc>,
    },
    AllocationCommitted {
        idempotency_key: String,
        warehouse_ids: Vec<WarehouseId>,
        units: i64,
        occurred_at: DateTime<Utc>,
    },
    AllocationReleased {
        idempotency_key: String,
        warehouse_ids: Vec<WarehouseId>,
        units: i64,
        occurred_at: DateTime<Utc>,
    },
    SagaStepApplied {
        step: SagaStep,
    },
}

impl WarehouseEvent {
    pub fn registered(w: &Warehouse) -> Self {
        WarehouseEvent::WarehouseRegistered {
            warehouse_id: w.id,
            code: w.code.clone(),
            name: w.name.clone(),
            occurred_at: w.created_at,
        }
    }

    pub fn status_changed(before: WarehouseStatus, after: &Warehouse) -> Self {
        WarehouseEvent::WarehouseStatusChanged {
            warehouse_id: after.id,
            code: after.code.clone(),
            from: before,
            to: after.status,
            version: after.version,
            occurred_at: after.updated_at,
        }
    }

    pub fn stock_adjusted(
        record: &StockRecord,
        reason: AdjustmentReason,
        idempotency_key: Option<String>,
    ) -> Self {
        WarehouseEvent::StockAdjusted {
            warehouse_id: record.warehouse_id,
            sku_id: record.sku_id,
            reason,
            idempotency_key,
            stock: record.stock,
            locked: record.locked,
            version: record.version,
            occurred_at: record.updated_at,
        }
    }

    pub fn transitioned(from: Option<TransferStatus>, t: &StockTransfer) -> Self {
        WarehouseEvent::TransferTransitioned {
            transfer_id: t.id,
            transfer_no: t.transfer_no.clone(),
            from,
            to: t.status,
            version: t.version,
            occurred_at: t.updated_at,
        }
    }

    /// Stream the event belongs to.
    pub fn aggregate_type(&self) -> &'static str {
        match self {
            WarehouseEvent::WarehouseRegistered { .. }
            | WarehouseEvent::WarehouseStatusChanged { .. } => "warehouse",
            WarehouseEvent::StockAdjusted { .. } => "warehouse.stock",
            WarehouseEvent::TransferTransitioned { .. } => "warehouse.transfer",
            WarehouseEvent::AllocationCommitted { .. }
            | WarehouseEvent::AllocationReleased { .. } => "warehouse.allocation",
            WarehouseEvent::SagaStepApplied { .. } => "warehouse.saga_step",
        }
    }

    pub fn aggregate_id(&self) -> String {
        match self {
            WarehouseEvent::WarehouseRegistered { warehouse_id, .. }
            | WarehouseEvent::WarehouseStatusChanged { warehouse_id, .. } => warehouse_id.to_string(),
            WarehouseEvent::StockAdjusted {
                warehouse_id,
                sku_id,
                ..
            } => format!("{warehouse_id}:{sku_id}"),
            WarehouseEvent::TransferTransitioned { transfer_id, .. } => transfer_id.to_string(),
            WarehouseEvent::AllocationCommitted {
                idempotency_key, ..
            }
            | WarehouseEvent::AllocationReleased {
                idempotency_key, ..
            } => idempotency_key.clone(),
            WarehouseEvent::SagaStepApplied { step } => step.key.to_string(),
        }
    }

    /// Position in the aggregate stream, where the aggregate is versioned.
    pub fn sequence_number(&self) -> u64 {
        match self {
            WarehouseEvent::WarehouseRegistered { .. } => 1,
            WarehouseEvent::WarehouseStatusChanged { version, .. }
            | WarehouseEvent::StockAdjusted { version, .. }
            | WarehouseEvent::TransferTransitioned { version, .. } => *version,
            WarehouseEvent::AllocationCommitted { .. } => 1,
            WarehouseEvent::AllocationReleased { .. } => 2,
            WarehouseEvent::SagaStepApplied { .. } => 1,
        }
    }
}

impl Event for WarehouseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WarehouseEvent::WarehouseRegistered { .. } => "warehouse.registered",
            WarehouseEvent::WarehouseStatusChanged { .. } => "warehouse.status_changed",
            WarehouseEvent::StockAdjusted { .. } => "warehouse.stock.adjusted",
            WarehouseEvent::TransferTransitioned { .. } => "warehouse.transfer.transitioned",
            WarehouseEvent::AllocationCommitted { .. } => "warehouse.allocation.committed",
            WarehouseEvent::AllocationReleased { .. } => "warehouse.allocation.released",
            WarehouseEvent::SagaStepApplied { .. } => "warehouse.saga_step.applied",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            WarehouseEvent::WarehouseRegistered { occurred_at, .. }
            | WarehouseEvent::WarehouseStatusChanged { occurred_at, .. }
            | WarehouseEvent::StockAdjusted { occurred_at, .. }
            | WarehouseEvent::TransferTransitioned { occurred_at, .. }
            | WarehouseEvent::AllocationCommitted { occurred_at, .. }
            | WarehouseEvent::AllocationReleased { occurred_at, .. } => *occurred_at,
            WarehouseEvent::SagaStepApplied { step } => step.applied_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::StockRecord;

    #[test]
    fn stock_events_are_keyed_by_pair_and_versioned_by_record() {
        let mut record =
            StockRecord::empty(WarehouseId::from_u128(1), SkuId::from_u128(2), Utc::now());
        record.version = 4;
        let e = WarehouseEvent::stock_adjusted(&record, AdjustmentReason::Manual, None);
        assert_eq!(e.aggregate_type(), "warehouse.stock");
        assert_eq!(
            e.aggregate_id(),
            format!("{}:{}", record.warehouse_id, record.sku_id)
        );
        assert_eq!(e.sequence_number(), 4);
        assert_eq!(e.event_type(), "warehouse.stock.adjusted");
    }
}
