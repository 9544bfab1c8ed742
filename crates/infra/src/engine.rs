//! `WarehouseEngine`: the operations the engine exposes to its callers.
//!
//! The facade wires every service to one store, one transfer-number generator
//! and one event publisher. Transport layers (gRPC, HTTP) sit outside and call
//! these methods.

use std::sync::Arc;

use chrono::Duration;

use stockflow_core::{
    EngineError, EngineResult, Page, Paged, SequenceGenerator, SkuId, SnowflakeGenerator,
    TransferId, UserId, WarehouseId,
};
use stockflow_warehouse::{
    AllocationPlan, AllocationResult, BatchOutcome, Candidate, NewWarehouse, OrderLine,
    SagaStep, Selection, StockRecord, StockTransfer, TransferFilter, Warehouse, WarehouseFilter,
    WarehouseProfile, WarehouseStatus,
};

use crate::config::EngineConfig;
use crate::publisher::EventPublisher;
use crate::services::{
    OrderAllocator, PageLimits, SagaPort, StockLedger, TransferWorkflow, WarehouseRegistry,
    WarehouseSelector,
};
use crate::store::{EngineStore, InMemoryStore, PostgresStore};

#[derive(Debug)]
pub struct WarehouseEngine<S, G = SnowflakeGenerator> {
    ledger: StockLedger<S>,
    registry: WarehouseRegistry<S>,
    selector: WarehouseSelector<S>,
    allocator: OrderAllocator<S>,
    transfers: TransferWorkflow<S, G>,
    saga: SagaPort<S>,
}

impl WarehouseEngine<InMemoryStore> {
    /// Engine over a fresh in-memory store.
    pub fn in_memory(config: &EngineConfig, publisher: EventPublisher) -> EngineResult<Self> {
        let generator = SnowflakeGenerator::new(config.node_id)?;
        Ok(Self::new(Arc::new(InMemoryStore::new()), generator, publisher, config))
    }
}

impl WarehouseEngine<PostgresStore> {
    /// Connect to `config.database_url` and create the schema if needed.
    pub async fn connect(config: &EngineConfig, publisher: EventPublisher) -> EngineResult<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| EngineError::invalid("STOCKFLOW_DATABASE_URL is not set"))?;
        let store = PostgresStore::connect(url).await?;
        store.migrate().await?;
        let generator = SnowflakeGenerator::new(config.node_id)?;
        Ok(Self::new(Arc::new(store), generator, publisher, config))
    }
}

impl<S, G> WarehouseEngine<S, G>
where
    S: EngineStore,
    G: SequenceGenerator,
{
    pub fn new(store: Arc<S>, generator: G, publisher: EventPublisher, config: &EngineConfig) -> Self {
        let limits = PageLimits::new(config.default_page_size, config.max_page_size);
        let ledger = StockLedger::new(store.clone(), publisher.clone());

        Self {
            registry: WarehouseRegistry::new(store.clone(), publisher.clone(), limits),
            selector: WarehouseSelector::new(store.clone()),
            allocator: OrderAllocator::new(
                store.clone(),
                ledger.clone(),
                publisher.clone(),
                config.shipping,
            ),
            transfers: TransferWorkflow::new(
                store.clone(),
                ledger.clone(),
                generator,
                publisher.clone(),
                config.transfer_prefix.clone(),
                limits,
            ),
            saga: SagaPort::new(store, ledger.clone(), publisher),
            ledger,
        }
    }

    // Warehouses

    pub fn create_warehouse(&self, code: &str, name: &str) -> EngineResult<Warehouse> {
        self.registry.create(code, name)
    }

    pub fn register_warehouse(&self, input: NewWarehouse) -> EngineResult<Warehouse> {
        self.registry.register(input)
    }

    /// Warehouses ordered by code; `page_size` 0 uses the configured default.
    pub fn list_warehouses(
        &self,
        status: Option<WarehouseStatus>,
        page: u32,
        page_size: u32,
    ) -> EngineResult<Paged<Warehouse>> {
        self.registry
            .list(WarehouseFilter { status }, Page::new(page, page_size))
    }

    pub fn get_warehouse(&self, id: WarehouseId) -> EngineResult<Warehouse> {
        self.registry.get(id)
    }

    pub fn get_warehouse_by_code(&self, code: &str) -> EngineResult<Warehouse> {
        self.registry.get_by_code(code)
    }

    pub fn update_warehouse_profile(
        &self,
        id: WarehouseId,
        profile: WarehouseProfile,
    ) -> EngineResult<Warehouse> {
        self.registry.update_profile(id, profile)
    }

    pub fn activate_warehouse(&self, id: WarehouseId) -> EngineResult<Warehouse> {
        self.registry.activate(id)
    }

    pub fn deactivate_warehouse(&self, id: WarehouseId) -> EngineResult<Warehouse> {
        self.registry.deactivate(id)
    }

    pub fn set_warehouse_maintenance(&self, id: WarehouseId) -> EngineResult<Warehouse> {
        self.registry.set_maintenance(id)
    }

    pub fn list_candidates_with_stock(
        &self,
        sku_id: SkuId,
        min_available: i64,
    ) -> EngineResult<Vec<Candidate>> {
        self.registry.list_candidates_with_stock(sku_id, min_available)
    }

    // Stock

    pub fn get_stock(&self, warehouse_id: WarehouseId, sku_id: SkuId) -> EngineResult<StockRecord> {
        self.ledger.get_stock(warehouse_id, sku_id)
    }

    /// Change on-hand stock by `quantity_delta`, leaving `locked` alone.
    pub fn adjust_stock(
        &self,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
        quantity_delta: i64,
    ) -> EngineResult<StockRecord> {
        self.ledger.adjust_stock(warehouse_id, sku_id, quantity_delta, 0)
    }

    pub fn set_stock_limits(
        &self,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
        safe_stock: i64,
        max_stock: i64,
    ) -> EngineResult<StockRecord> {
        self.ledger
            .set_stock_limits(warehouse_id, sku_id, safe_stock, max_stock)
    }

    pub fn list_stock(&self, warehouse_id: WarehouseId) -> EngineResult<Vec<StockRecord>> {
        self.ledger.list_stock(warehouse_id)
    }

    pub fn list_stock_for_sku(&self, sku_id: SkuId) -> EngineResult<Vec<StockRecord>> {
        self.ledger.list_stock_for_sku(sku_id)
    }

    // Selection and allocation

    pub fn select_optimal_warehouse(
        &self,
        sku_id: SkuId,
        quantity: i64,
        latitude: f64,
        longitude: f64,
    ) -> EngineResult<Selection> {
        self.selector
            .select_optimal_warehouse(sku_id, quantity, latitude, longitude)
    }

    pub fn allocate_order(
        &self,
        items: &[OrderLine],
        latitude: f64,
        longitude: f64,
    ) -> EngineResult<Vec<AllocationResult>> {
        self.allocator.allocate_order(items, latitude, longitude)
    }

    pub fn plan_allocation(
        &self,
        items: &[OrderLine],
        latitude: f64,
        longitude: f64,
    ) -> EngineResult<AllocationPlan> {
        self.allocator.plan(items, latitude, longitude)
    }

    pub fn commit_allocation(&self, plan: &AllocationPlan, key: &str) -> EngineResult<BatchOutcome> {
        self.allocator.commit(plan, key)
    }

    pub fn release_allocation(&self, plan: &AllocationPlan, key: &str) -> EngineResult<BatchOutcome> {
        self.allocator.release(plan, key)
    }

    // Transfers

    pub fn create_transfer(
        &self,
        from: WarehouseId,
        to: WarehouseId,
        sku_id: SkuId,
        quantity: i64,
        created_by: Option<UserId>,
    ) -> EngineResult<StockTransfer> {
        self.transfers.create(from, to, sku_id, quantity, created_by)
    }

    pub fn approve_transfer(&self, id: TransferId) -> EngineResult<StockTransfer> {
        self.transfers.approve(id)
    }

    pub fn ship_transfer(&self, id: TransferId) -> EngineResult<StockTransfer> {
        self.transfers.ship(id)
    }

    pub fn receive_transfer(&self, id: TransferId) -> EngineResult<StockTransfer> {
        self.transfers.receive(id)
    }

    pub fn complete_transfer(&self, id: TransferId) -> EngineResult<StockTransfer> {
        self.transfers.complete(id)
    }

    pub fn cancel_transfer(&self, id: TransferId, reason: Option<String>) -> EngineResult<StockTransfer> {
        self.transfers.cancel(id, reason)
    }

    pub fn get_transfer(&self, id: TransferId) -> EngineResult<StockTransfer> {
        self.transfers.get(id)
    }

    pub fn get_transfer_by_no(&self, transfer_no: &str) -> EngineResult<StockTransfer> {
        self.transfers.get_by_no(transfer_no)
    }

    pub fn list_transfers(
        &self,
        filter: &TransferFilter,
        page: Page,
    ) -> EngineResult<Paged<StockTransfer>> {
        self.transfers.list(filter, page)
    }

    pub fn stale_transfers(&self, older_than: Duration, page: Page) -> EngineResult<Paged<StockTransfer>> {
        self.transfers.stale_transfers(older_than, page)
    }

    // Saga port

    pub fn deduct_stock(
        &self,
        key: &str,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
        quantity: i64,
    ) -> EngineResult<SagaStep> {
        self.saga.deduct_stock(key, warehouse_id, sku_id, quantity)
    }

    pub fn revert_stock(
        &self,
        key: &str,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
        quantity: i64,
    ) -> EngineResult<SagaStep> {
        self.saga.revert_stock(key, warehouse_id, sku_id, quantity)
    }

    pub fn saga_step(&self, key: &str) -> EngineResult<Option<SagaStep>> {
        self.saga.saga_step(key)
    }
}
