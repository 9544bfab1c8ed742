//! Optimal warehouse selection for a single SKU.

use std::sync::Arc;

use tracing::{debug, instrument};

use stockflow_core::{EngineResult, SkuId};
use stockflow_warehouse::{GeoPoint, Selection, select_optimal, validate_quantity};

use crate::store::WarehouseStore;

#[derive(Debug)]
pub struct WarehouseSelector<S> {
    store: Arc<S>,
}

impl<S> WarehouseSelector<S>
where
    S: WarehouseStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Nearest active warehouse able to ship all `quantity` units of `sku_id`
    /// to (`latitude`, `longitude`).
    ///
    /// The result reflects stock at read time; it reserves nothing.
    #[instrument(skip(self), err)]
    pub fn select_optimal_warehouse(
        &self,
        sku_id: SkuId,
        quantity: i64,
        latitude: f64,
        longitude: f64,
    ) -> EngineResult<Selection> {
        validate_quantity(quantity)?;
        let origin = GeoPoint::new(latitude, longitude)?;

        let candidates = self.store.candidates_with_stock(sku_id, quantity)?;
        debug!(candidates = candidates.len(), "selection candidates loaded");

        let selection = select_optimal(sku_id, quantity, &origin, candidates)?;
        debug!(
            warehouse_id = %selection.warehouse.id,
            code = %selection.warehouse.code,
            distance_km = selection.distance_km,
            "warehouse selected"
        );
        Ok(selection)
    }
}
