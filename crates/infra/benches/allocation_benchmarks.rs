use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::Utc;
use std::collections::HashMap;

use stockflow_core::{SkuId, WarehouseId};
use stockflow_infra::{EngineConfig, EventPublisher, WarehouseEngine};
use stockflow_warehouse::{
    Candidate, GeoPoint, NewWarehouse, OrderLine, ShippingCostModel, Warehouse, WarehouseStatus,
    plan_allocation, select_optimal,
};

/// `count` active warehouses spread over a lat/lon grid, each holding `available` units.
fn candidates(count: usize, available: i64) -> Vec<Candidate> {
    (0..count)
        .map(|i| {
            let lat = (i % 60) as f64 - 30.0;
            let lon = (i / 60) as f64 * 3.0 - 90.0;
            let warehouse = Warehouse::register(
                WarehouseId::from_u128(i as u128 + 1),
                NewWarehouse::new(format!("W{i}"), format!("Warehouse {i}"))
                    .with_location(GeoPoint::new(lat, lon).unwrap()),
                Utc::now(),
            )
            .unwrap()
            .with_status(WarehouseStatus::Active, Utc::now())
            .unwrap();
            Candidate { warehouse, available }
        })
        .collect()
}

fn bench_select_optimal(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_optimal");
    let origin = GeoPoint::new(31.0, 121.0).unwrap();
    let sku = SkuId::from_u128(1);

    for count in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        let pool = candidates(*count, 50);
        group.bench_with_input(BenchmarkId::new("candidates", count), &pool, |b, pool| {
            b.iter(|| black_box(select_optimal(sku, black_box(10), &origin, pool.clone()).unwrap()));
        });
    }

    group.finish();
}

fn bench_plan_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_allocation");
    let origin = GeoPoint::new(0.0, 0.0).unwrap();
    let cost = ShippingCostModel::default();

    for lines in [1, 10, 50].iter() {
        // Every line needs stock from several warehouses.
        let skus: Vec<SkuId> = (0..*lines).map(|i| SkuId::from_u128(i as u128 + 1)).collect();
        let pool = candidates(100, 7);
        let by_sku: HashMap<SkuId, Vec<Candidate>> =
            skus.iter().map(|s| (*s, pool.clone())).collect();
        let order: Vec<OrderLine> = skus.iter().map(|s| OrderLine::new(*s, 40)).collect();

        group.throughput(Throughput::Elements(*lines as u64));
        group.bench_with_input(BenchmarkId::new("split_lines", lines), &order, |b, order| {
            b.iter(|| black_box(plan_allocation(&origin, order, &by_sku, &cost).unwrap()));
        });
    }

    group.finish();
}

fn bench_ledger_adjustments(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger");
    group.throughput(Throughput::Elements(1));

    group.bench_function("adjust_stock_in_memory", |b| {
        let engine = WarehouseEngine::in_memory(&EngineConfig::default(), EventPublisher::default()).unwrap();
        let w = engine.create_warehouse("BENCH", "Bench").unwrap();
        let sku = SkuId::new();

        b.iter(|| {
            black_box(engine.adjust_stock(w.id, sku, black_box(1)).unwrap());
        });
    });

    group.bench_function("transfer_create_and_cancel", |b| {
        let engine = WarehouseEngine::in_memory(&EngineConfig::default(), EventPublisher::default()).unwrap();
        let from = engine.create_warehouse("FROM", "From").unwrap();
        let to = engine.create_warehouse("TO", "To").unwrap();
        let sku = SkuId::new();
        engine.adjust_stock(from.id, sku, 1_000).unwrap();

        b.iter(|| {
            let t = engine.create_transfer(from.id, to.id, sku, 1, None).unwrap();
            black_box(engine.cancel_transfer(t.id, None).unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_select_optimal,
    bench_plan_allocation,
    bench_ledger_adjustments
);
criterion_main!(benches);
