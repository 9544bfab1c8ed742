//! Warehouse registry: registration, metadata and lifecycle.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use stockflow_core::{EngineError, EngineResult, ExpectedVersion, Page, Paged, SkuId, WarehouseId};
use stockflow_warehouse::{
    Candidate, NewWarehouse, Warehouse, WarehouseEvent, WarehouseFilter, WarehouseProfile,
    WarehouseStatus, normalize_code,
};

use crate::publisher::EventPublisher;
use crate::services::PageLimits;
use crate::store::{StoreError, WarehouseStore};

#[derive(Debug)]
pub struct WarehouseRegistry<S> {
    store: Arc<S>,
    publisher: EventPublisher,
    limits: PageLimits,
}

impl<S> WarehouseRegistry<S>
where
    S: WarehouseStore,
{
    pub fn new(store: Arc<S>, publisher: EventPublisher, limits: PageLimits) -> Self {
        Self {
            store,
            publisher,
            limits,
        }
    }

    /// Register a warehouse with only a code and a name. It starts `Inactive`.
    pub fn create(&self, code: &str, name: &str) -> EngineResult<Warehouse> {
        self.register(NewWarehouse::new(code, name))
    }

    #[instrument(skip(self, input), fields(code = %input.code), err)]
    pub fn register(&self, input: NewWarehouse) -> EngineResult<Warehouse> {
        let warehouse = Warehouse::register(WarehouseId::new(), input, Utc::now())?;
        match self.store.insert_warehouse(&warehouse) {
            Ok(()) => {}
            Err(StoreError::DuplicateKey(_)) => {
                return Err(EngineError::conflict(format!(
                    "warehouse code {} already registered",
                    warehouse.code
                )));
            }
            Err(err) => return Err(err.into()),
        }

        info!(warehouse_id = %warehouse.id, code = %warehouse.code, "warehouse registered");
        self.publisher.publish(WarehouseEvent::registered(&warehouse));
        Ok(warehouse)
    }

    pub fn get(&self, id: WarehouseId) -> EngineResult<Warehouse> {
        self.store
            .get_warehouse(id)?
            .ok_or_else(|| EngineError::not_found("warehouse", id))
    }

    /// Lookup by code; the code is normalized first so `sh-01` finds `SH-01`.
    pub fn get_by_code(&self, code: &str) -> EngineResult<Warehouse> {
        let code = normalize_code(code)?;
        self.store
            .get_warehouse_by_code(&code)?
            .ok_or_else(|| EngineError::not_found("warehouse", code))
    }

    pub fn list(&self, filter: WarehouseFilter, page: Page) -> EngineResult<Paged<Warehouse>> {
        let page = page.normalized(self.limits.default_size, self.limits.max_size);
        Ok(self.store.list_warehouses(filter, page)?)
    }

    #[instrument(skip(self, profile), fields(warehouse_id = %id), err)]
    pub fn update_profile(&self, id: WarehouseId, profile: WarehouseProfile) -> EngineResult<Warehouse> {
        let current = self.get(id)?;
        let next = current.with_profile(profile, Utc::now())?;
        self.store
            .update_warehouse(&next, ExpectedVersion::Exact(current.version))?;
        info!(warehouse_id = %id, version = next.version, "warehouse profile updated");
        Ok(next)
    }

    pub fn activate(&self, id: WarehouseId) -> EngineResult<Warehouse> {
        self.set_status(id, WarehouseStatus::Active)
    }

    pub fn deactivate(&self, id: WarehouseId) -> EngineResult<Warehouse> {
        self.set_status(id, WarehouseStatus::Inactive)
    }

    pub fn set_maintenance(&self, id: WarehouseId) -> EngineResult<Warehouse> {
        self.set_status(id, WarehouseStatus::Maintenance)
    }

    /// Active warehouses whose available stock of `sku_id` is at least `min_available`.
    pub fn list_candidates_with_stock(
        &self,
        sku_id: SkuId,
        min_available: i64,
    ) -> EngineResult<Vec<Candidate>> {
        if min_available < 0 {
            return Err(EngineError::invalid("minimum available cannot be negative"));
        }
        Ok(self.store.candidates_with_stock(sku_id, min_available)?)
    }

    #[instrument(skip(self), fields(warehouse_id = %id, status = %status), err)]
    fn set_status(&self, id: WarehouseId, status: WarehouseStatus) -> EngineResult<Warehouse> {
        let current = self.get(id)?;
        if current.status == status {
            return Ok(current);
        }

        let next = current.with_status(status, Utc::now())?;
        self.store
            .update_warehouse(&next, ExpectedVersion::Exact(current.version))?;

        info!(
            warehouse_id = %id,
            code = %next.code,
            from = %current.status,
            to = %next.status,
            "warehouse status changed"
        );
        self.publisher
            .publish(WarehouseEvent::status_changed(current.status, &next));
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use stockflow_core::ErrorKind;
    use stockflow_warehouse::GeoPoint;

    fn registry() -> WarehouseRegistry<InMemoryStore> {
        WarehouseRegistry::new(
            Arc::new(InMemoryStore::new()),
            EventPublisher::default(),
            PageLimits::new(2, 10),
        )
    }

    #[test]
    fn create_registers_inactive_warehouse() {
        let reg = registry();
        let w = reg.create("sh-01", "Shanghai").unwrap();
        assert_eq!(w.code, "SH-01");
        assert_eq!(w.status, WarehouseStatus::Inactive);
        assert_eq!(reg.get(w.id).unwrap(), w);
        assert_eq!(reg.get_by_code(" sh-01 ").unwrap().id, w.id);
    }

    #[test]
    fn duplicate_code_is_conflict() {
        let reg = registry();
        reg.create("SH", "Shanghai").unwrap();
        let err = reg.create("sh", "Shanghai again").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn activation_requires_location() {
        let reg = registry();
        let w = reg.create("BJ", "Beijing").unwrap();
        assert_eq!(reg.activate(w.id).unwrap_err().kind(), ErrorKind::InvalidArgument);

        reg.update_profile(
            w.id,
            WarehouseProfile {
                location: Some(GeoPoint::new(39.9, 116.4).unwrap()),
                ..WarehouseProfile::default()
            },
        )
        .unwrap();
        let active = reg.activate(w.id).unwrap();
        assert!(active.is_active());
        assert_eq!(active.version, 3);

        // Same status is a no-op.
        assert_eq!(reg.activate(w.id).unwrap().version, 3);
        assert_eq!(reg.set_maintenance(w.id).unwrap().status, WarehouseStatus::Maintenance);
        assert_eq!(reg.deactivate(w.id).unwrap().status, WarehouseStatus::Inactive);
    }

    #[test]
    fn list_uses_default_page_size_and_filter() {
        let reg = registry();
        for code in ["C", "A", "B"] {
            reg.create(code, code).unwrap();
        }
        let page = reg.list(WarehouseFilter::default(), Page::default()).unwrap();
        assert_eq!(page.total, 3);
        let codes: Vec<_> = page.items.iter().map(|w| w.code.as_str()).collect();
        assert_eq!(codes, vec!["A", "B"]);

        let active = reg
            .list(
                WarehouseFilter {
                    status: Some(WarehouseStatus::Active),
                },
                Page::default(),
            )
            .unwrap();
        assert_eq!(active.total, 0);
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let reg = registry();
        assert_eq!(reg.get(WarehouseId::new()).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(reg.get_by_code("NOPE").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(reg.deactivate(WarehouseId::new()).unwrap_err().kind(), ErrorKind::NotFound);
    }
}
