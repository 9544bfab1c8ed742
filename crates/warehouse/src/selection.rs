//! Single-warehouse selection: nearest active warehouse that can ship the whole quantity.

use core::cmp::Ordering;

use serde::{Deserialize, Serialize};

use stockflow_core::{EngineError, EngineResult, SkuId};

use crate::geo::{GeoPoint, compare_distance};
use crate::warehouse::Warehouse;

/// An active warehouse holding a SKU, with its current available quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub warehouse: Warehouse,
    pub available: i64,
}

/// The chosen warehouse for a `(sku, quantity)` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub warehouse: Warehouse,
    pub distance_km: f64,
    pub available: i64,
}

/// A candidate paired with its distance to the requester.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub candidate: Candidate,
    pub distance_km: f64,
}

/// Attach distances and drop candidates that cannot be ranked (no location).
pub fn rank(origin: &GeoPoint, candidates: Vec<Candidate>) -> Vec<RankedCandidate> {
    candidates
        .into_iter()
        .filter_map(|candidate| {
            let location = candidate.warehouse.location?;
            Some(RankedCandidate {
                distance_km: origin.distance_km(&location),
                candidate,
            })
        })
        .collect()
}

/// Selection order: nearer first, then higher priority, then lower id.
pub fn selection_order(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    compare_distance(a.distance_km, b.distance_km)
        .then_with(|| b.candidate.warehouse.priority.cmp(&a.candidate.warehouse.priority))
        .then_with(|| a.candidate.warehouse.id.cmp(&b.candidate.warehouse.id))
}

/// Pick the best warehouse among `candidates` for `quantity` units of `sku_id`.
///
/// Candidates that are not active or cannot cover the full quantity are
/// ignored; if none remain the result is `NoWarehouseAvailable`.
pub fn select_optimal(
    sku_id: SkuId,
    quantity: i64,
    origin: &GeoPoint,
    candidates: Vec<Candidate>,
) -> EngineResult<Selection> {
    let eligible: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| c.warehouse.is_active() && c.available >= quantity)
        .collect();

    let best = rank(origin, eligible)
        .into_iter()
        .min_by(selection_order)
        .ok_or_else(|| EngineError::no_warehouse(sku_id, quantity))?;

    Ok(Selection {
        warehouse: best.candidate.warehouse,
        distance_km: best.distance_km,
        available: best.candidate.available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{NewWarehouse, WarehouseStatus};
    use chrono::Utc;
    use stockflow_core::{ErrorKind, WarehouseId};

    fn warehouse(id: u128, code: &str, lat: f64, lon: f64, priority: i32) -> Warehouse {
        let w = Warehouse::register(
            WarehouseId::from_u128(id),
            NewWarehouse::new(code, code)
                .with_location(GeoPoint::new(lat, lon).unwrap())
                .with_priority(priority),
            Utc::now(),
        )
        .unwrap();
        w.with_status(WarehouseStatus::Active, Utc::now()).unwrap()
    }

    fn candidate(w: Warehouse, available: i64) -> Candidate {
        Candidate {
            warehouse: w,
            available,
        }
    }

    fn origin(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    #[test]
    fn nearest_warehouse_wins() {
        let near = warehouse(2, "NEAR", 0.0, 0.0, 0);
        let far = warehouse(1, "FAR", 1.0, 1.0, 10);
        let sel = select_optimal(
            SkuId::from_u128(1),
            5,
            &origin(0.0, 0.0),
            vec![candidate(far, 100), candidate(near.clone(), 5)],
        )
        .unwrap();
        assert_eq!(sel.warehouse.id, near.id);
        assert_eq!(sel.distance_km, 0.0);
        assert_eq!(sel.available, 5);
    }

    #[test]
    fn shanghai_beats_beijing_for_a_shanghai_requester() {
        let a = warehouse(1, "A", 31.23, 121.47, 0);
        let b = warehouse(2, "B", 39.90, 116.40, 0);
        let sel = select_optimal(
            SkuId::from_u128(1),
            5,
            &origin(31.0, 121.0),
            vec![candidate(b, 5), candidate(a.clone(), 10)],
        )
        .unwrap();
        assert_eq!(sel.warehouse.id, a.id);
        assert_eq!(sel.available, 10);
    }

    #[test]
    fn equal_distance_prefers_priority_then_lowest_id() {
        let low_priority = warehouse(1, "LOW", 10.0, 10.0, 1);
        let high_priority = warehouse(3, "HIGH", 10.0, 10.0, 5);
        let high_priority_twin = warehouse(2, "TWIN", 10.0, 10.0, 5);

        let sel = select_optimal(
            SkuId::from_u128(1),
            1,
            &origin(0.0, 0.0),
            vec![
                candidate(low_priority, 9),
                candidate(high_priority, 9),
                candidate(high_priority_twin.clone(), 9),
            ],
        )
        .unwrap();
        assert_eq!(sel.warehouse.id, high_priority_twin.id);
    }

    #[test]
    fn insufficient_or_inactive_candidates_are_skipped() {
        let short = warehouse(1, "SHORT", 0.0, 0.0, 0);
        let inactive = warehouse(2, "OFF", 0.0, 0.0, 0)
            .with_status(WarehouseStatus::Maintenance, Utc::now())
            .unwrap();
        let far = warehouse(3, "FAR", 20.0, 20.0, 0);

        let sel = select_optimal(
            SkuId::from_u128(1),
            10,
            &origin(0.0, 0.0),
            vec![candidate(short, 9), candidate(inactive, 50), candidate(far.clone(), 10)],
        )
        .unwrap();
        assert_eq!(sel.warehouse.id, far.id);
    }

    #[test]
    fn empty_candidate_set_is_no_warehouse_available() {
        let err = select_optimal(SkuId::from_u128(1), 1, &origin(0.0, 0.0), vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoWarehouseAvailable);
    }
}
