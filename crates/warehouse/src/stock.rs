//! Per-(warehouse, sku) stock accounting.
//!
//! The arithmetic here is pure. Stores apply it under a row lock or inside a
//! single transaction so the check and the write are one atomic step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{EngineError, EngineResult, SkuId, WarehouseId};

/// Upper bound on any single quantity or delta accepted by the engine.
pub const MAX_QUANTITY: i64 = 1_000_000_000;

/// Stock held by one warehouse for one SKU.
///
/// Invariant after every committed change: `stock >= locked >= 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub warehouse_id: WarehouseId,
    pub sku_id: SkuId,
    pub stock: i64,
    pub locked: i64,
    /// Replenishment threshold; zero disables the check.
    pub safe_stock: i64,
    /// Storage ceiling; zero disables the check.
    pub max_stock: i64,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Why an adjustment failed the non-negativity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockError {
    /// The adjustment needs `requested` units but only `available` are there.
    Shortfall { requested: i64, available: i64 },
    /// The result does not fit the engine's quantity range.
    Overflow,
}

impl StockError {
    pub fn into_engine_error(self, sku_id: SkuId) -> EngineError {
        match self {
            StockError::Shortfall {
                requested,
                available,
            } => EngineError::insufficient(sku_id, requested, available),
            StockError::Overflow => {
                EngineError::invalid(format!("stock for sku {sku_id} would exceed {MAX_QUANTITY}"))
            }
        }
    }
}

impl StockRecord {
    /// An empty record, the implicit state of a pair that was never adjusted.
    pub fn empty(warehouse_id: WarehouseId, sku_id: SkuId, now: DateTime<Utc>) -> Self {
        Self {
            warehouse_id,
            sku_id,
            stock: 0,
            locked: 0,
            safe_stock: 0,
            max_stock: 0,
            version: 0,
            updated_at: now,
        }
    }

    /// Quantity that can still be reserved.
    pub fn available(&self) -> i64 {
        self.stock - self.locked
    }

    pub fn is_below_safe_stock(&self) -> bool {
        self.safe_stock > 0 && self.available() < self.safe_stock
    }

    pub fn is_over_max_stock(&self) -> bool {
        self.max_stock > 0 && self.stock > self.max_stock
    }

    /// Compute the record after applying both deltas, or explain why it would
    /// break `stock >= locked >= 0`.
    pub fn adjusted(
        &self,
        delta_stock: i64,
        delta_locked: i64,
        now: DateTime<Utc>,
    ) -> Result<StockRecord, StockError> {
        let stock = self
            .stock
            .checked_add(delta_stock)
            .ok_or(StockError::Overflow)?;
        let locked = self
            .locked
            .checked_add(delta_locked)
            .ok_or(StockError::Overflow)?;

        if locked < 0 {
            return Err(StockError::Shortfall {
                requested: -delta_locked,
                available: self.locked,
            });
        }
        if stock < 0 {
            return Err(StockError::Shortfall {
                requested: -delta_stock,
                available: self.stock,
            });
        }
        if stock < locked {
            return Err(StockError::Shortfall {
                requested: delta_locked - delta_stock,
                available: self.available(),
            });
        }
        if stock > MAX_QUANTITY {
            return Err(StockError::Overflow);
        }

        Ok(StockRecord {
            stock,
            locked,
            version: self.version + 1,
            updated_at: now,
            ..self.clone()
        })
    }
}

/// One line of a ledger batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub warehouse_id: WarehouseId,
    pub sku_id: SkuId,
    pub delta_stock: i64,
    pub delta_locked: i64,
}

impl StockAdjustment {
    pub fn new(warehouse_id: WarehouseId, sku_id: SkuId, delta_stock: i64, delta_locked: i64) -> Self {
        Self {
            warehouse_id,
            sku_id,
            delta_stock,
            delta_locked,
        }
    }

    /// Reserve `quantity` without moving it.
    pub fn lock(warehouse_id: WarehouseId, sku_id: SkuId, quantity: i64) -> Self {
        Self::new(warehouse_id, sku_id, 0, quantity)
    }

    /// Release a reservation of `quantity`.
    pub fn unlock(warehouse_id: WarehouseId, sku_id: SkuId, quantity: i64) -> Self {
        Self::new(warehouse_id, sku_id, 0, -quantity)
    }

    /// Ship `quantity` that was previously locked.
    pub fn consume_locked(warehouse_id: WarehouseId, sku_id: SkuId, quantity: i64) -> Self {
        Self::new(warehouse_id, sku_id, -quantity, -quantity)
    }

    pub fn credit(warehouse_id: WarehouseId, sku_id: SkuId, quantity: i64) -> Self {
        Self::new(warehouse_id, sku_id, quantity, 0)
    }

    pub fn debit(warehouse_id: WarehouseId, sku_id: SkuId, quantity: i64) -> Self {
        Self::new(warehouse_id, sku_id, -quantity, 0)
    }

    pub fn is_noop(&self) -> bool {
        self.delta_stock == 0 && self.delta_locked == 0
    }
}

/// What caused a ledger batch. Persisted with applied keys and published on events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    Manual,
    TransferLock,
    TransferComplete,
    TransferRelease,
    AllocationLock,
    AllocationRelease,
    SagaDeduct,
    SagaRevert,
}

impl AdjustmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentReason::Manual => "manual",
            AdjustmentReason::TransferLock => "transfer_lock",
            AdjustmentReason::TransferComplete => "transfer_complete",
            AdjustmentReason::TransferRelease => "transfer_release",
            AdjustmentReason::AllocationLock => "allocation_lock",
            AdjustmentReason::AllocationRelease => "allocation_release",
            AdjustmentReason::SagaDeduct => "saga_deduct",
            AdjustmentReason::SagaRevert => "saga_revert",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "manual" => AdjustmentReason::Manual,
            "transfer_lock" => AdjustmentReason::TransferLock,
            "transfer_complete" => AdjustmentReason::TransferComplete,
            "transfer_release" => AdjustmentReason::TransferRelease,
            "allocation_lock" => AdjustmentReason::AllocationLock,
            "allocation_release" => AdjustmentReason::AllocationRelease,
            "saga_deduct" => AdjustmentReason::SagaDeduct,
            "saga_revert" => AdjustmentReason::SagaRevert,
            _ => return None,
        })
    }
}

pub const MAX_KEY_LEN: usize = 128;

/// Caller-supplied idempotency token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

/// Prefix of keys the engine derives for allocation lock/release batches.
pub const ALLOCATION_KEY_PREFIX: &str = "allocation:";
/// Prefix of keys the engine derives for transfer lock/complete/release batches.
pub const TRANSFER_KEY_PREFIX: &str = "transfer:";

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> EngineResult<Self> {
        let key = key.into();
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(EngineError::invalid("idempotency key cannot be empty"));
        }
        if trimmed.len() > MAX_KEY_LEN {
            return Err(EngineError::invalid(format!(
                "idempotency key longer than {MAX_KEY_LEN} bytes"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key lies in a namespace the engine derives its own keys in.
    pub fn is_engine_reserved(&self) -> bool {
        self.0.starts_with(ALLOCATION_KEY_PREFIX) || self.0.starts_with(TRANSFER_KEY_PREFIX)
    }
}

impl core::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A set of adjustments that commit together or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentBatch {
    pub key: Option<IdempotencyKey>,
    pub reason: AdjustmentReason,
    pub lines: Vec<StockAdjustment>,
}

impl AdjustmentBatch {
    pub fn new(reason: AdjustmentReason, lines: Vec<StockAdjustment>) -> Self {
        Self {
            key: None,
            reason,
            lines,
        }
    }

    pub fn single(reason: AdjustmentReason, line: StockAdjustment) -> Self {
        Self::new(reason, vec![line])
    }

    pub fn with_key(mut self, key: IdempotencyKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Two batches carrying the same key must describe the same change.
    pub fn same_effect(&self, other: &AdjustmentBatch) -> bool {
        self.reason == other.reason && self.lines == other.lines
    }
}

/// Result of applying a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The batch committed; records after the change, in line order.
    Applied(Vec<StockRecord>),
    /// The key had already been applied with the same effect; nothing changed.
    Duplicate,
}

impl BatchOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, BatchOutcome::Duplicate)
    }

    pub fn records(&self) -> &[StockRecord] {
        match self {
            BatchOutcome::Applied(records) => records,
            BatchOutcome::Duplicate => &[],
        }
    }
}

/// Apply `lines` in order to a working set of records, all-or-nothing.
///
/// `load` returns the current record for a pair (or `None` if it was never
/// adjusted). Lines touching the same pair see the effect of earlier lines.
/// Returns the resulting records in line order; the caller persists them only
/// if this returns `Ok`.
pub fn apply_lines<F>(
    lines: &[StockAdjustment],
    now: DateTime<Utc>,
    mut load: F,
) -> EngineResult<Vec<StockRecord>>
where
    F: FnMut(WarehouseId, SkuId) -> EngineResult<Option<StockRecord>>,
{
    let mut working: Vec<StockRecord> = Vec::new();
    let mut results = Vec::with_capacity(lines.len());

    for line in lines {
        validate_delta(line.delta_stock)?;
        validate_delta(line.delta_locked)?;

        let current = match working
            .iter()
            .find(|r| r.warehouse_id == line.warehouse_id && r.sku_id == line.sku_id)
        {
            Some(r) => r.clone(),
            None => load(line.warehouse_id, line.sku_id)?
                .unwrap_or_else(|| StockRecord::empty(line.warehouse_id, line.sku_id, now)),
        };

        let next = current
            .adjusted(line.delta_stock, line.delta_locked, now)
            .map_err(|e| e.into_engine_error(line.sku_id))?;

        match working
            .iter_mut()
            .find(|r| r.warehouse_id == line.warehouse_id && r.sku_id == line.sku_id)
        {
            Some(slot) => *slot = next.clone(),
            None => working.push(next.clone()),
        }
        results.push(next);
    }

    Ok(results)
}

/// Records touched by a batch, deduplicated to the final state of each pair.
pub fn final_states(records: &[StockRecord]) -> Vec<StockRecord> {
    let mut out: Vec<StockRecord> = Vec::new();
    for r in records {
        match out
            .iter_mut()
            .find(|o| o.warehouse_id == r.warehouse_id && o.sku_id == r.sku_id)
        {
            Some(slot) => *slot = r.clone(),
            None => out.push(r.clone()),
        }
    }
    out
}

pub fn validate_quantity(quantity: i64) -> EngineResult<()> {
    if quantity <= 0 {
        return Err(EngineError::invalid(format!(
            "quantity must be positive (got {quantity})"
        )));
    }
    if quantity > MAX_QUANTITY {
        return Err(EngineError::invalid(format!(
            "quantity {quantity} exceeds {MAX_QUANTITY}"
        )));
    }
    Ok(())
}

fn validate_delta(delta: i64) -> EngineResult<()> {
    if delta.unsigned_abs() > MAX_QUANTITY as u64 {
        return Err(EngineError::invalid(format!(
            "delta {delta} exceeds {MAX_QUANTITY} in magnitude"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stockflow_core::ErrorKind;

    fn record(stock: i64, locked: i64) -> StockRecord {
        StockRecord {
            stock,
            locked,
            ..StockRecord::empty(WarehouseId::from_u128(1), SkuId::from_u128(1), Utc::now())
        }
    }

    #[test]
    fn locking_reduces_available_only() {
        let r = record(10, 0).adjusted(0, 3, Utc::now()).unwrap();
        assert_eq!((r.stock, r.locked, r.available()), (10, 3, 7));
        assert_eq!(r.version, 1);
    }

    #[test]
    fn locking_more_than_available_is_a_shortfall() {
        let err = record(10, 8).adjusted(0, 3, Utc::now()).unwrap_err();
        assert_eq!(
            err,
            StockError::Shortfall {
                requested: 3,
                available: 2
            }
        );
    }

    #[test]
    fn debit_cannot_eat_into_locked_stock() {
        let err = record(10, 5).adjusted(-6, 0, Utc::now()).unwrap_err();
        assert_eq!(
            err,
            StockError::Shortfall {
                requested: 6,
                available: 5
            }
        );
    }

    #[test]
    fn releasing_more_than_locked_fails() {
        let err = record(10, 2).adjusted(0, -3, Utc::now()).unwrap_err();
        assert_eq!(
            err,
            StockError::Shortfall {
                requested: 3,
                available: 2
            }
        );
    }

    #[test]
    fn missing_record_with_negative_delta_is_insufficient() {
        let lines = [StockAdjustment::debit(
            WarehouseId::from_u128(1),
            SkuId::from_u128(7),
            1,
        )];
        let err = apply_lines(&lines, Utc::now(), |_, _| Ok(None)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
    }

    #[test]
    fn missing_record_with_positive_deltas_is_created() {
        let lines = [StockAdjustment::new(
            WarehouseId::from_u128(1),
            SkuId::from_u128(7),
            5,
            2,
        )];
        let out = apply_lines(&lines, Utc::now(), |_, _| Ok(None)).unwrap();
        assert_eq!((out[0].stock, out[0].locked), (5, 2));
    }

    #[test]
    fn lines_on_the_same_pair_compose() {
        let w = WarehouseId::from_u128(1);
        let s = SkuId::from_u128(1);
        let lines = [
            StockAdjustment::credit(w, s, 4),
            StockAdjustment::lock(w, s, 4),
            StockAdjustment::consume_locked(w, s, 4),
        ];
        let out = apply_lines(&lines, Utc::now(), |_, _| Ok(None)).unwrap();
        let last = final_states(&out);
        assert_eq!(last.len(), 1);
        assert_eq!((last[0].stock, last[0].locked, last[0].version), (0, 0, 3));
    }

    #[test]
    fn a_failing_line_fails_the_whole_batch() {
        let w = WarehouseId::from_u128(1);
        let s = SkuId::from_u128(1);
        let lines = [StockAdjustment::credit(w, s, 4), StockAdjustment::debit(w, s, 5)];
        assert!(apply_lines(&lines, Utc::now(), |_, _| Ok(None)).is_err());
    }

    #[test]
    fn thresholds() {
        let mut r = record(10, 6);
        r.safe_stock = 5;
        r.max_stock = 8;
        assert!(r.is_below_safe_stock());
        assert!(r.is_over_max_stock());
    }

    #[test]
    fn keys_are_trimmed_and_bounded() {
        assert_eq!(IdempotencyKey::new(" saga-1 ").unwrap().as_str(), "saga-1");
        assert!(IdempotencyKey::new("  ").is_err());
        assert!(IdempotencyKey::new("k".repeat(MAX_KEY_LEN + 1)).is_err());
        assert!(IdempotencyKey::new("allocation:o-1:lock").unwrap().is_engine_reserved());
        assert!(IdempotencyKey::new("transfer:1:lock").unwrap().is_engine_reserved());
        assert!(!IdempotencyKey::new("order-1:allocation").unwrap().is_engine_reserved());
    }

    #[test]
    fn quantity_validation() {
        assert!(validate_quantity(1).is_ok());
        assert_eq!(validate_quantity(0).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(validate_quantity(-4).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert!(validate_quantity(MAX_QUANTITY + 1).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever sequence of adjustments is attempted, every
        /// successfully applied one leaves `stock >= locked >= 0`.
        #[test]
        fn successful_adjustments_preserve_invariant(
            deltas in prop::collection::vec((-50i64..50, -50i64..50), 1..40)
        ) {
            let mut current = record(0, 0);
            for (ds, dl) in deltas {
                if let Ok(next) = current.adjusted(ds, dl, Utc::now()) {
                    prop_assert!(next.stock >= next.locked);
                    prop_assert!(next.locked >= 0);
                    current = next;
                }
            }
        }
    }
}
