use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockflow_core::{
    EngineError, ExpectedVersion, Page, Paged, SkuId, TransferId, WarehouseId,
};
use stockflow_warehouse::{
    AdjustmentBatch, BatchOutcome, Candidate, IdempotencyKey, StockRecord, StockTransfer,
    TransferFilter, Warehouse, WarehouseFilter,
};

/// Storage operation error.
///
/// These are **infrastructure errors** as seen by the services. Rule failures
/// found while applying a batch (shortfall, quantity out of range) surface as
/// `Rejected` carrying the engine error unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A ledger line would break `stock >= locked >= 0`.
    #[error("insufficient stock for sku {sku_id}: requested {requested}, available {available}")]
    InsufficientStock {
        sku_id: String,
        requested: i64,
        available: i64,
    },

    /// The batch failed validation.
    #[error("rejected: {0}")]
    Rejected(EngineError),

    /// Optimistic concurrency check failed or an idempotency key was reused
    /// with a different effect.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A unique column (warehouse code, transfer number, id) already exists.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend failure (connection, lock poisoning, decoding).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub(crate) fn from_rule(err: EngineError) -> Self {
        match err {
            EngineError::InsufficientStock {
                sku_id,
                requested,
                available,
            } => StoreError::InsufficientStock {
                sku_id,
                requested,
                available,
            },
            other => StoreError::Rejected(other),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            StoreError::InsufficientStock {
                sku_id,
                requested,
                available,
            } => EngineError::InsufficientStock {
                sku_id,
                requested,
                available,
            },
            StoreError::Rejected(err) => err,
            StoreError::Conflict(msg) | StoreError::DuplicateKey(msg) => EngineError::Conflict(msg),
            StoreError::Backend(msg) => EngineError::Internal(msg),
        }
    }
}

/// A batch recorded under its idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedBatch {
    pub key: IdempotencyKey,
    pub batch: AdjustmentBatch,
    pub applied_at: DateTime<Utc>,
}

/// Stock ledger persistence.
///
/// Implementations must apply a batch as one atomic unit: every line is checked
/// and written under the same lock or transaction, and the batch key (if any)
/// is recorded in that same unit.
pub trait StockStore: Send + Sync {
    fn get_stock(
        &self,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
    ) -> Result<Option<StockRecord>, StoreError>;

    /// Records of one warehouse, ordered by SKU.
    fn list_stock_by_warehouse(&self, warehouse_id: WarehouseId)
    -> Result<Vec<StockRecord>, StoreError>;

    /// Records of one SKU across warehouses, ordered by warehouse.
    fn list_stock_by_sku(&self, sku_id: SkuId) -> Result<Vec<StockRecord>, StoreError>;

    /// Apply every line of `batch` or none of them.
    ///
    /// A keyed batch whose key was already applied with the same lines returns
    /// `BatchOutcome::Duplicate` and changes nothing; with different lines it is
    /// a `Conflict`.
    fn apply_batch(
        &self,
        batch: &AdjustmentBatch,
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome, StoreError>;

    /// Set replenishment thresholds, creating an empty record if needed.
    fn set_limits(
        &self,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
        safe_stock: i64,
        max_stock: i64,
        now: DateTime<Utc>,
    ) -> Result<StockRecord, StoreError>;

    fn applied_batch(&self, key: &IdempotencyKey) -> Result<Option<AppliedBatch>, StoreError>;
}

/// Warehouse registry persistence.
pub trait WarehouseStore: Send + Sync {
    /// Fails with `DuplicateKey` when the id or code is taken.
    fn insert_warehouse(&self, warehouse: &Warehouse) -> Result<(), StoreError>;

    fn update_warehouse(
        &self,
        warehouse: &Warehouse,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError>;

    fn get_warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError>;

    fn get_warehouse_by_code(&self, code: &str) -> Result<Option<Warehouse>, StoreError>;

    /// Warehouses ordered by code.
    fn list_warehouses(
        &self,
        filter: WarehouseFilter,
        page: Page,
    ) -> Result<Paged<Warehouse>, StoreError>;

    /// Active warehouses whose available stock of `sku_id` is at least
    /// `min_available`, ordered by warehouse id.
    fn candidates_with_stock(
        &self,
        sku_id: SkuId,
        min_available: i64,
    ) -> Result<Vec<Candidate>, StoreError>;
}

/// Transfer persistence. A transfer row change and its ledger batch commit together.
pub trait TransferStore: Send + Sync {
    /// Insert a new transfer and apply its batch in one atomic unit.
    ///
    /// Returns the stock records the batch changed.
    fn insert_transfer(
        &self,
        transfer: &StockTransfer,
        batch: &AdjustmentBatch,
        now: DateTime<Utc>,
    ) -> Result<Vec<StockRecord>, StoreError>;

    /// Replace a transfer whose stored version matches `expected_version`,
    /// applying `batch` (if any) in the same atomic unit.
    fn transition_transfer(
        &self,
        transfer: &StockTransfer,
        expected_version: ExpectedVersion,
        batch: Option<&AdjustmentBatch>,
        now: DateTime<Utc>,
    ) -> Result<Vec<StockRecord>, StoreError>;

    fn get_transfer(&self, id: TransferId) -> Result<Option<StockTransfer>, StoreError>;

    fn get_transfer_by_no(&self, transfer_no: &str) -> Result<Option<StockTransfer>, StoreError>;

    /// Matching transfers, newest first.
    fn list_transfers(
        &self,
        filter: &TransferFilter,
        page: Page,
    ) -> Result<Paged<StockTransfer>, StoreError>;
}

/// Everything the engine persists.
pub trait EngineStore: StockStore + WarehouseStore + TransferStore {}

impl<S> EngineStore for S where S: StockStore + WarehouseStore + TransferStore {}

impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    fn get_stock(
        &self,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
    ) -> Result<Option<StockRecord>, StoreError> {
        (**self).get_stock(warehouse_id, sku_id)
    }

    fn list_stock_by_warehouse(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<StockRecord>, StoreError> {
        (**self).list_stock_by_warehouse(warehouse_id)
    }

    fn list_stock_by_sku(&self, sku_id: SkuId) -> Result<Vec<StockRecord>, StoreError> {
        (**self).list_stock_by_sku(sku_id)
    }

    fn apply_batch(
        &self,
        batch: &AdjustmentBatch,
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome, StoreError> {
        (**self).apply_batch(batch, now)
    }

    fn set_limits(
        &self,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
        safe_stock: i64,
        max_stock: i64,
        now: DateTime<Utc>,
    ) -> Result<StockRecord, StoreError> {
        (**self).set_limits(warehouse_id, sku_id, safe_stock, max_stock, now)
    }

    fn applied_batch(&self, key: &IdempotencyKey) -> Result<Option<AppliedBatch>, StoreError> {
        (**self).applied_batch(key)
    }
}

impl<S> WarehouseStore for Arc<S>
where
    S: WarehouseStore + ?Sized,
{
    fn insert_warehouse(&self, warehouse: &Warehouse) -> Result<(), StoreError> {
        (**self).insert_warehouse(warehouse)
    }

    fn update_warehouse(
        &self,
        warehouse: &Warehouse,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError> {
        (**self).update_warehouse(warehouse, expected_version)
    }

    fn get_warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        (**self).get_warehouse(id)
    }

    fn get_warehouse_by_code(&self, code: &str) -> Result<Option<Warehouse>, StoreError> {
        (**self).get_warehouse_by_code(code)
    }

    fn list_warehouses(
        &self,
        filter: WarehouseFilter,
        page: Page,
    ) -> Result<Paged<Warehouse>, StoreError> {
        (**self).list_warehouses(filter, page)
    }

    fn candidates_with_stock(
        &self,
        sku_id: SkuId,
        min_available: i64,
    ) -> Result<Vec<Candidate>, StoreError> {
        (**self).candidates_with_stock(sku_id, min_available)
    }
}

impl<S> TransferStore for Arc<S>
where
    S: TransferStore + ?Sized,
{
    fn insert_transfer(
        &self,
        transfer: &StockTransfer,
        batch: &AdjustmentBatch,
        now: DateTime<Utc>,
    ) -> Result<Vec<StockRecord>, StoreError> {
        (**self).insert_transfer(transfer, batch, now)
    }

    fn transition_transfer(
        &self,
        transfer: &StockTransfer,
        expected_version: ExpectedVersion,
        batch: Option<&AdjustmentBatch>,
        now: DateTime<Utc>,
    ) -> Result<Vec<StockRecord>, StoreError> {
        (**self).transition_transfer(transfer, expected_version, batch, now)
    }

    fn get_transfer(&self, id: TransferId) -> Result<Option<StockTransfer>, StoreError> {
        (**self).get_transfer(id)
    }

    fn get_transfer_by_no(&self, transfer_no: &str) -> Result<Option<StockTransfer>, StoreError> {
        (**self).get_transfer_by_no(transfer_no)
    }

    fn list_transfers(
        &self,
        filter: &TransferFilter,
        page: Page,
    ) -> Result<Paged<StockTransfer>, StoreError> {
        (**self).list_transfers(filter, page)
    }
}
