use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use stockflow_core::{ExpectedVersion, Page, Paged, SkuId, TransferId, WarehouseId};
use stockflow_warehouse::{
    AdjustmentBatch, BatchOutcome, Candidate, IdempotencyKey, StockRecord, StockTransfer,
    TransferFilter, Warehouse, WarehouseFilter, apply_lines,
};
use stockflow_warehouse::stock::final_states;

use super::r#trait::{
    AppliedBatch, StockStore, StoreError, TransferStore, WarehouseStore,
};

#[derive(Debug, Default)]
struct State {
    warehouses: HashMap<WarehouseId, Warehouse>,
    codes: HashMap<String, WarehouseId>,
    stock: HashMap<(WarehouseId, SkuId), StockRecord>,
    transfers: HashMap<TransferId, StockTransfer>,
    transfer_nos: HashMap<String, TransferId>,
    applied: HashMap<IdempotencyKey, AppliedBatch>,
}

impl State {
    /// Check and apply a batch. Nothing is written unless every line passes.
    fn apply(
        &mut self,
        batch: &AdjustmentBatch,
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome, StoreError> {
        if let Some(key) = &batch.key {
            if let Some(previous) = self.applied.get(key) {
                if previous.batch.same_effect(batch) {
                    return Ok(BatchOutcome::Duplicate);
                }
                return Err(StoreError::Conflict(format!(
                    "idempotency key '{key}' was already used for a different adjustment"
                )));
            }
        }

        let records = apply_lines(&batch.lines, now, |w, s| {
            Ok(self.stock.get(&(w, s)).cloned())
        })
        .map_err(StoreError::from_rule)?;

        for r in final_states(&records) {
            self.stock.insert((r.warehouse_id, r.sku_id), r);
        }
        if let Some(key) = &batch.key {
            self.applied.insert(
                key.clone(),
                AppliedBatch {
                    key: key.clone(),
                    batch: batch.clone(),
                    applied_at: now,
                },
            );
        }

        Ok(BatchOutcome::Applied(records))
    }
}

fn paginate<T>(items: Vec<T>, page: Page) -> Paged<T> {
    let total = items.len() as u64;
    let items = items
        .into_iter()
        .skip(page.offset())
        .take(page.limit())
        .collect();
    Paged { items, total }
}

/// In-memory engine store.
///
/// Intended for tests/dev. One lock guards every table, so a batch, its key and
/// any transfer row it belongs to are written as one step.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

impl StockStore for InMemoryStore {
    fn get_stock(
        &self,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
    ) -> Result<Option<StockRecord>, StoreError> {
        Ok(self.read()?.stock.get(&(warehouse_id, sku_id)).cloned())
    }

    fn list_stock_by_warehouse(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<StockRecord>, StoreError> {
        let state = self.read()?;
        let mut out: Vec<StockRecord> = state
            .stock
            .values()
            .filter(|r| r.warehouse_id == warehouse_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.sku_id);
        Ok(out)
    }

    fn list_stock_by_sku(&self, sku_id: SkuId) -> Result<Vec<StockRecord>, StoreError> {
        let state = self.read()?;
        let mut out: Vec<StockRecord> = state
            .stock
            .values()
            .filter(|r| r.sku_id == sku_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.warehouse_id);
        Ok(out)
    }

    fn apply_batch(
        &self,
        batch: &AdjustmentBatch,
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome, StoreError> {
        self.write()?.apply(batch, now)
    }

    fn set_limits(
        &self,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
        safe_stock: i64,
        max_stock: i64,
        now: DateTime<Utc>,
    ) -> Result<StockRecord, StoreError> {
        let mut state = self.write()?;
        let record = state
            .stock
            .entry((warehouse_id, sku_id))
            .or_insert_with(|| StockRecord::empty(warehouse_id, sku_id, now));
        record.safe_stock = safe_stock;
        record.max_stock = max_stock;
        record.version += 1;
        record.updated_at = now;
        Ok(record.clone())
    }

    fn applied_batch(&self, key: &IdempotencyKey) -> Result<Option<AppliedBatch>, StoreError> {
        Ok(self.read()?.applied.get(key).cloned())
    }
}

impl WarehouseStore for InMemoryStore {
    fn insert_warehouse(&self, warehouse: &Warehouse) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.warehouses.contains_key(&warehouse.id) {
            return Err(StoreError::DuplicateKey(format!(
                "warehouse id {} already exists",
                warehouse.id
            )));
        }
        if state.codes.contains_key(&warehouse.code) {
            return Err(StoreError::DuplicateKey(format!(
                "warehouse code {} already exists",
                warehouse.code
            )));
        }
        state.codes.insert(warehouse.code.clone(), warehouse.id);
        state.warehouses.insert(warehouse.id, warehouse.clone());
        Ok(())
    }

    fn update_warehouse(
        &self,
        warehouse: &Warehouse,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let current = state
            .warehouses
            .get_mut(&warehouse.id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "warehouse",
                id: warehouse.id.to_string(),
            })?;
        if !expected_version.matches(current.version) {
            return Err(StoreError::Conflict(format!(
                "warehouse {}: expected {expected_version:?}, found {}",
                warehouse.code, current.version
            )));
        }
        if current.code != warehouse.code {
            return Err(StoreError::Rejected(stockflow_core::EngineError::invalid(
                "warehouse code is immutable",
            )));
        }
        *current = warehouse.clone();
        Ok(())
    }

    fn get_warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        Ok(self.read()?.warehouses.get(&id).cloned())
    }

    fn get_warehouse_by_code(&self, code: &str) -> Result<Option<Warehouse>, StoreError> {
        let state = self.read()?;
        Ok(state
            .codes
            .get(code)
            .and_then(|id| state.warehouses.get(id))
            .cloned())
    }

    fn list_warehouses(
        &self,
        filter: WarehouseFilter,
        page: Page,
    ) -> Result<Paged<Warehouse>, StoreError> {
        let state = self.read()?;
        let mut items: Vec<Warehouse> = state
            .warehouses
            .values()
            .filter(|w| filter.status.is_none_or(|s| w.status == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(paginate(items, page))
    }

    fn candidates_with_stock(
        &self,
        sku_id: SkuId,
        min_available: i64,
    ) -> Result<Vec<Candidate>, StoreError> {
        let state = self.read()?;
        let mut out: Vec<Candidate> = state
            .warehouses
            .values()
            .filter(|w| w.is_active())
            .filter_map(|w| {
                let available = state.stock.get(&(w.id, sku_id))?.available();
                (available >= min_available).then(|| Candidate {
                    warehouse: w.clone(),
                    available,
                })
            })
            .collect();
        out.sort_by_key(|c| c.warehouse.id);
        Ok(out)
    }
}

impl TransferStore for InMemoryStore {
    fn insert_transfer(
        &self,
        transfer: &StockTransfer,
        batch: &AdjustmentBatch,
        now: DateTime<Utc>,
    ) -> Result<Vec<StockRecord>, StoreError> {
        let mut state = self.write()?;
        if state.transfers.contains_key(&transfer.id) {
            return Err(StoreError::DuplicateKey(format!(
                "transfer id {} already exists",
                transfer.id
            )));
        }
        if state.transfer_nos.contains_key(&transfer.transfer_no) {
            return Err(StoreError::DuplicateKey(format!(
                "transfer number {} already exists",
                transfer.transfer_no
            )));
        }

        let records = match state.apply(batch, now)? {
            BatchOutcome::Applied(records) => records,
            BatchOutcome::Duplicate => {
                return Err(StoreError::Conflict(format!(
                    "stock for transfer {} was already locked",
                    transfer.transfer_no
                )));
            }
        };

        state
            .transfer_nos
            .insert(transfer.transfer_no.clone(), transfer.id);
        state.transfers.insert(transfer.id, transfer.clone());
        Ok(records)
    }

    fn transition_transfer(
        &self,
        transfer: &StockTransfer,
        expected_version: ExpectedVersion,
        batch: Option<&AdjustmentBatch>,
        now: DateTime<Utc>,
    ) -> Result<Vec<StockRecord>, StoreError> {
        let mut state = self.write()?;
        let current_version = state
            .transfers
            .get(&transfer.id)
            .map(|t| t.version)
            .ok_or_else(|| StoreError::NotFound {
                entity: "transfer",
                id: transfer.id.to_string(),
            })?;
        if !expected_version.matches(current_version) {
            return Err(StoreError::Conflict(format!(
                "transfer {}: expected {expected_version:?}, found {current_version}",
                transfer.transfer_no
            )));
        }

        let records = match batch {
            Some(batch) => state.apply(batch, now)?.records().to_vec(),
            None => Vec::new(),
        };
        state.transfers.insert(transfer.id, transfer.clone());
        Ok(records)
    }

    fn get_transfer(&self, id: TransferId) -> Result<Option<StockTransfer>, StoreError> {
        Ok(self.read()?.transfers.get(&id).cloned())
    }

    fn get_transfer_by_no(&self, transfer_no: &str) -> Result<Option<StockTransfer>, StoreError> {
        let state = self.read()?;
        Ok(state
            .transfer_nos
            .get(transfer_no)
            .and_then(|id| state.transfers.get(id))
            .cloned())
    }

    fn list_transfers(
        &self,
        filter: &TransferFilter,
        page: Page,
    ) -> Result<Paged<StockTransfer>, StoreError> {
        let state = self.read()?;
        let mut items: Vec<StockTransfer> = state
            .transfers
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(paginate(items, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_warehouse::{AdjustmentReason, StockAdjustment};

    fn pair() -> (WarehouseId, SkuId) {
        (WarehouseId::from_u128(1), SkuId::from_u128(1))
    }

    fn key(k: &str) -> IdempotencyKey {
        IdempotencyKey::new(k).unwrap()
    }

    #[test]
    fn failed_batch_writes_nothing() {
        let store = InMemoryStore::new();
        let (w, s) = pair();
        let other = SkuId::from_u128(2);
        store
            .apply_batch(
                &AdjustmentBatch::single(AdjustmentReason::Manual, StockAdjustment::credit(w, s, 5)),
                Utc::now(),
            )
            .unwrap();

        let batch = AdjustmentBatch::new(
            AdjustmentReason::AllocationLock,
            vec![StockAdjustment::lock(w, s, 5), StockAdjustment::lock(w, other, 1)],
        );
        let err = store.apply_batch(&batch, Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::InsufficientStock { .. }));

        let record = store.get_stock(w, s).unwrap().unwrap();
        assert_eq!(record.locked, 0);
        assert!(store.get_stock(w, other).unwrap().is_none());
    }

    #[test]
    fn keyed_batch_applies_once() {
        let store = InMemoryStore::new();
        let (w, s) = pair();
        let batch = AdjustmentBatch::single(AdjustmentReason::SagaRevert, StockAdjustment::credit(w, s, 3))
            .with_key(key("k1"));

        assert!(!store.apply_batch(&batch, Utc::now()).unwrap().is_duplicate());
        assert!(store.apply_batch(&batch, Utc::now()).unwrap().is_duplicate());
        assert_eq!(store.get_stock(w, s).unwrap().unwrap().stock, 3);
        assert!(store.applied_batch(&key("k1")).unwrap().is_some());
    }

    #[test]
    fn reused_key_with_different_lines_conflicts() {
        let store = InMemoryStore::new();
        let (w, s) = pair();
        let first = AdjustmentBatch::single(AdjustmentReason::Manual, StockAdjustment::credit(w, s, 3))
            .with_key(key("k1"));
        let second = AdjustmentBatch::single(AdjustmentReason::Manual, StockAdjustment::credit(w, s, 4))
            .with_key(key("k1"));

        store.apply_batch(&first, Utc::now()).unwrap();
        let err = store.apply_batch(&second, Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn limits_create_an_empty_record() {
        let store = InMemoryStore::new();
        let (w, s) = pair();
        let r = store.set_limits(w, s, 5, 50, Utc::now()).unwrap();
        assert_eq!((r.stock, r.safe_stock, r.max_stock), (0, 5, 50));
    }
}
