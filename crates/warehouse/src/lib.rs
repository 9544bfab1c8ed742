//! Warehouse domain (pure logic).
//!
//! Stock arithmetic, geometry, selection and allocation planning, the transfer
//! state machine and saga steps. No IO, no storage; `stockflow-infra` runs these
//! rules against a store.

pub mod allocation;
pub mod events;
pub mod geo;
pub mod saga;
pub mod selection;
pub mod stock;
pub mod transfer;
pub mod warehouse;

pub use allocation::{
    AllocatedLine, AllocationPlan, AllocationResult, OrderLine, ShippingCostModel, merge_lines,
    plan_allocation,
};
pub use events::WarehouseEvent;
pub use geo::{DISTANCE_EPSILON_KM, EARTH_RADIUS_KM, GeoPoint, compare_distance, haversine_km};
pub use saga::{SagaStep, SagaStepKind, SagaStepRequest};
pub use selection::{Candidate, Selection, select_optimal};
pub use stock::{
    ALLOCATION_KEY_PREFIX, AdjustmentBatch, AdjustmentReason, BatchOutcome, IdempotencyKey,
    MAX_QUANTITY, TRANSFER_KEY_PREFIX,
    StockAdjustment, StockRecord, apply_lines, validate_quantity,
};
pub use transfer::{
    CreateTransfer, StockTransfer, TransferCommand, TransferCreated, TransferEvent,
    TransferFilter, TransferStatus,
};
pub use warehouse::{
    NewWarehouse, Warehouse, WarehouseFilter, WarehouseProfile, WarehouseStatus, normalize_code,
};
