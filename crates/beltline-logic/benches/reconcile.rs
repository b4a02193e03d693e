//! Benchmarks for multi-instance reconciliation and action item paging.

use std::hint::black_box;

use beltline_logic::activity::ActivityFeed;
use beltline_logic::config::EngineConfig;
use beltline_logic::entity::{Delivery, DeliveryStatus, Entity, MemoryEntityStore, ProductAmount};
use beltline_logic::feed::{ActionItemFeed, PagedActionItems};
use beltline_logic::ledger::TransactionLedger;
use beltline_logic::location::{EntityLabel, LocationRef};
use beltline_logic::managers::{DeliveryManager, DeliveryRequest, DeliveryScope, Sources};
use criterion::{criterion_group, criterion_main, Criterion};

fn delivery_world(deliveries: u64, pending: u64) -> (MemoryEntityStore, TransactionLedger) {
    let mut store = MemoryEntityStore::new();
    for id in 1..=deliveries {
        let mut e = Entity::new(EntityLabel::Delivery, id);
        e.delivery = Some(Delivery {
            status: DeliveryStatus::Sent,
            origin: LocationRef::building(5),
            origin_slot: 1,
            dest: LocationRef::building(9 + id % 4),
            dest_slot: 1,
            contents: vec![ProductAmount {
                product: 1,
                amount: 10,
            }],
            finish_time: Some(1_000 + id),
        });
        store.upsert(e);
    }

    let mut ledger = TransactionLedger::new();
    let manager = DeliveryManager::new(DeliveryScope::default(), Some(LocationRef::crew(1)));
    for i in 0..pending {
        manager.send(
            &mut ledger,
            &DeliveryRequest {
                origin: LocationRef::building(5),
                origin_slot: 1,
                dest: LocationRef::building(20 + i),
                dest_slot: 1,
                contents: Vec::new(),
            },
        );
    }
    (store, ledger)
}

fn delivery_reconcile_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("delivery_reconcile");
    let activities = ActivityFeed::new(Vec::new());

    for count in [10_u64, 100, 1_000] {
        let (store, ledger) = delivery_world(count, count / 10);
        let manager = DeliveryManager::new(
            DeliveryScope {
                origin: Some(LocationRef::building(5)),
                ..DeliveryScope::default()
            },
            Some(LocationRef::crew(1)),
        );
        group.bench_function(format!("deliveries_{count}"), |b| {
            b.iter(|| {
                let src = Sources::new(1_050, &store, &ledger, &activities);
                black_box(manager.reconcile(&src).len());
            });
        });
    }

    group.finish();
}

fn paging_benchmark(c: &mut Criterion) {
    let (store, ledger) = delivery_world(0, 500);
    let activities = ActivityFeed::new(Vec::new());
    let config = EngineConfig::default();
    let crew = LocationRef::crew(1);
    let src = Sources::new(0, &store, &ledger, &activities);
    let feed = ActionItemFeed::collect(&crew, &src, &config);
    let paged = PagedActionItems::new(&config);

    c.bench_function("page_action_items_500", |b| {
        b.iter(|| black_box(paged.query(&feed).data.total));
    });
}

criterion_group!(benches, delivery_reconcile_benchmark, paging_benchmark);
criterion_main!(benches);
