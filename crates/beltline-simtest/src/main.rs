//! Beltline Headless Scenario Harness
//!
//! Drives every action manager through seeded lifecycles against an
//! in-memory ledger, entity cache and activity feed. Runs entirely
//! in-process: no chain, no networking, no rendering.
//!
//! Usage:
//!   cargo run -p beltline-simtest
//!   cargo run -p beltline-simtest -- --verbose --seed 7
//!   cargo run -p beltline-simtest -- --config engine.json
//!
//! Engine logs go to stderr at `warn` (`info` with `--verbose`);
//! `RUST_LOG` overrides either.

use std::collections::HashSet;
use std::path::Path;

use beltline_logic::activity::{Activity, ActivityFeed, EventName};
use beltline_logic::config::{validate_config, EngineConfig};
use beltline_logic::entity::{
    Building, BuildingStatus, Delivery, DeliveryStatus as EntityDelivery, Entity, Extractor,
    ExtractorStatus, MemoryEntityStore, ProductAmount,
};
use beltline_logic::feed::{ActionItemFeed, PagedActionItems};
use beltline_logic::ledger::TransactionLedger;
use beltline_logic::location::{lot_id, EntityLabel, LocationRef};
use beltline_logic::managers::{
    ConstructionManager, DeliveryManager, DeliveryRequest, DeliveryScope, DeliveryStatus,
    ExtractionManager, Sources,
};
use beltline_logic::registry::get_activity_config;
use beltline_logic::stage::{ActionStatus, Stage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_SEED: u64 = 0xBE17;

// ── World ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct World {
    store: MemoryEntityStore,
    ledger: TransactionLedger,
    feed: ActivityFeed,
    now: u64,
}

impl World {
    fn sources(&self) -> Sources<'_> {
        Sources::new(self.now, &self.store, &self.ledger, &self.feed)
    }

    fn confirm_all(&mut self) {
        let hashes: Vec<String> = self
            .ledger
            .pending
            .iter()
            .filter_map(|tx| tx.tx_hash.clone())
            .collect();
        for hash in hashes {
            self.ledger.confirm(&hash);
        }
    }
}

fn crew() -> LocationRef {
    LocationRef::crew(1)
}

// ── Test harness ────────────────────────────────────────────────────────

struct TestResult {
    name: String,
    passed: bool,
    detail: String,
}

struct Args {
    verbose: bool,
    seed: u64,
    config: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        verbose: false,
        seed: DEFAULT_SEED,
        config: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--verbose" => args.verbose = true,
            "--seed" => {
                let raw = iter.next().ok_or("--seed needs a value")?;
                args.seed = raw
                    .parse()
                    .map_err(|e| format!("bad --seed '{}': {}", raw, e))?;
            }
            "--config" => args.config = Some(iter.next().ok_or("--config needs a path")?),
            other => return Err(format!("unknown argument '{}'", other)),
        }
    }
    Ok(args)
}

fn main() {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };
    let default_level = if args.verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = match &args.config {
        Some(path) => match EngineConfig::load(Path::new(path)) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("config: {}", e);
                std::process::exit(2);
            }
        },
        None => EngineConfig::default(),
    };

    println!("=== Beltline Scenario Harness (seed {}) ===\n", args.seed);
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut results = Vec::new();

    // 1. Configuration
    results.extend(validate_engine_config(&config));

    // 2. Construction under chain-time sweeps
    results.extend(validate_construction_sweep(&mut rng, args.verbose));

    // 3. Repeated extraction cycles
    results.extend(validate_extraction_cycles(&mut rng));

    // 4. Delivery merge under partial confirmation
    results.extend(validate_delivery_merge(&mut rng));

    // 5. Action item paging
    results.extend(validate_action_item_paging(&mut rng, &config));

    // 6. Registry coverage
    results.extend(validate_registry());

    // ── Summary ──
    println!();
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.iter().filter(|r| !r.passed).count();
    let total = results.len();

    for r in &results {
        let icon = if r.passed { "✓" } else { "✗" };
        if !r.passed || args.verbose {
            println!("  {} {}: {}", icon, r.name, r.detail);
        }
    }

    println!(
        "\n=== RESULT: {}/{} passed, {} failed ===",
        passed, total, failed
    );

    if failed > 0 {
        std::process::exit(1);
    }
}

// ── 1. Configuration ────────────────────────────────────────────────────

fn validate_engine_config(config: &EngineConfig) -> Vec<TestResult> {
    println!("--- Configuration ---");
    let errors = validate_config(config);
    vec![TestResult {
        name: "config_valid".into(),
        passed: errors.is_empty(),
        detail: if errors.is_empty() {
            format!(
                "page_size={} notice_window={}s",
                config.page_size, config.agreement_notice_window
            )
        } else {
            format!("{:?}", errors)
        },
    }]
}

// ── 2. Construction sweep ───────────────────────────────────────────────

fn validate_construction_sweep(rng: &mut StdRng, verbose: bool) -> Vec<TestResult> {
    println!("--- Construction Time Sweep ---");
    let mut results = Vec::new();

    let lot = LocationRef::lot(lot_id(1, 7));
    let finish_time: u64 = rng.gen_range(1_000..100_000);
    let mut world = World::default();
    let mut site = Entity::new(EntityLabel::Building, 5)
        .with_location(lot)
        .with_controller(crew());
    site.building = Some(Building {
        building_type: 2,
        status: BuildingStatus::UnderConstruction,
        planned_at: Some(0),
        grace_period_end: Some(0),
        finish_time: Some(finish_time),
    });
    world.store.upsert(site);
    let manager = ConstructionManager::new(lot, Some(crew()));

    let steps = 500;
    let mut wrong_stage = 0;
    let mut regressions = 0;
    let mut rewinds = 0;
    let mut not_idempotent = 0;
    let mut prev = Stage::NotStarted;
    for _ in 0..steps {
        // Mostly forward, occasionally a clock correction backwards.
        if rng.gen_bool(0.1) {
            world.now = world.now.saturating_sub(rng.gen_range(0..finish_time));
            rewinds += 1;
            prev = Stage::NotStarted;
        } else {
            world.now += rng.gen_range(0..finish_time / 20 + 1);
        }

        let state = manager.reconcile(&world.sources());
        if state != manager.reconcile(&world.sources()) {
            not_idempotent += 1;
        }
        let expected = if world.now >= finish_time {
            Stage::ReadyToComplete
        } else {
            Stage::InProgress
        };
        if state.stage != expected {
            wrong_stage += 1;
        }
        if state.stage < prev {
            regressions += 1;
        }
        prev = state.stage;
    }

    results.push(TestResult {
        name: "construction_stage_tracks_network_time".into(),
        passed: wrong_stage == 0,
        detail: format!("{} of {} steps off (finish at {})", wrong_stage, steps, finish_time),
    });
    results.push(TestResult {
        name: "construction_monotonic_between_rewinds".into(),
        passed: regressions == 0,
        detail: format!("{} regressions across {} rewinds", regressions, rewinds),
    });
    results.push(TestResult {
        name: "construction_idempotent".into(),
        passed: not_idempotent == 0,
        detail: format!("{} differing repeat reads", not_idempotent),
    });

    if verbose {
        let state = manager.reconcile(&world.sources());
        println!("  Final: t={} status={}", world.now, state.status.label());
    }

    results
}

// ── 3. Extraction cycles ────────────────────────────────────────────────

fn set_extractor(world: &mut World, status: ExtractorStatus, finish_time: u64) {
    let mut e = Entity::new(EntityLabel::Building, 5).with_controller(crew());
    e.extractors.push(Extractor {
        slot: 1,
        status,
        resource: Some(1),
        yield_amount: 100,
        deposit: None,
        destination: None,
        destination_slot: None,
        start_time: Some(world.now),
        finish_time: Some(finish_time),
    });
    world.store.upsert(e);
}

fn validate_extraction_cycles(rng: &mut StdRng) -> Vec<TestResult> {
    println!("--- Extraction Cycles ---");
    let mut world = World::default();
    let manager = ExtractionManager::new(LocationRef::building(5), 1, Some(crew()));
    let expected = [
        Stage::NotStarted,
        Stage::Starting,
        Stage::InProgress,
        Stage::ReadyToComplete,
        Stage::Completing,
        Stage::NotStarted,
    ];

    let cycles = 20;
    let mut bad_cycles = Vec::new();
    for cycle in 0..cycles {
        let mut seen = vec![manager.reconcile(&world.sources()).stage];
        manager.start(
            &mut world.ledger,
            LocationRef::deposit(cycle + 1),
            rng.gen_range(1..1_000),
            LocationRef::building(6),
            1,
        );
        seen.push(manager.reconcile(&world.sources()).stage);

        let finish_time = world.now + rng.gen_range(60..86_400);
        set_extractor(&mut world, ExtractorStatus::Running, finish_time);
        world.confirm_all();
        seen.push(manager.reconcile(&world.sources()).stage);

        world.now = finish_time + rng.gen_range(0..600);
        seen.push(manager.reconcile(&world.sources()).stage);
        manager.finish(&mut world.ledger);
        seen.push(manager.reconcile(&world.sources()).stage);

        set_extractor(&mut world, ExtractorStatus::Idle, finish_time);
        world.confirm_all();
        seen.push(manager.reconcile(&world.sources()).stage);

        if seen != expected {
            bad_cycles.push(cycle);
        }
    }

    vec![TestResult {
        name: "extraction_cycles_repeat".into(),
        passed: bad_cycles.is_empty(),
        detail: if bad_cycles.is_empty() {
            format!("{} full cycles", cycles)
        } else {
            format!("cycles off: {:?}", bad_cycles)
        },
    }]
}

// ── 4. Delivery merge ───────────────────────────────────────────────────

fn validate_delivery_merge(rng: &mut StdRng) -> Vec<TestResult> {
    println!("--- Delivery Merge ---");
    let mut results = Vec::new();
    let mut world = World::default();
    let origin = LocationRef::building(5);
    let manager = DeliveryManager::new(
        DeliveryScope {
            origin: Some(origin),
            ..DeliveryScope::default()
        },
        Some(crew()),
    );

    let count: u64 = rng.gen_range(5..30);
    for i in 0..count {
        manager.package(
            &mut world.ledger,
            &DeliveryRequest {
                origin,
                origin_slot: 1,
                dest: LocationRef::building(100 + i),
                dest_slot: 1,
                contents: vec![ProductAmount {
                    product: rng.gen_range(1..250),
                    amount: rng.gen_range(1..10_000),
                }],
            },
        );
    }
    let before = manager.reconcile(&world.sources());
    results.push(TestResult {
        name: "delivery_pending_all_proposals".into(),
        passed: before.len() as u64 == count
            && before.iter().all(|e| e.status == DeliveryStatus::Packaging),
        detail: format!("{} entries for {} submissions", before.len(), count),
    });

    // Confirm a random subset: the entity and its event land while the
    // pending entry is still in the ledger.
    let submitted: Vec<(String, LocationRef)> = world
        .ledger
        .pending
        .iter()
        .filter_map(|tx| Some((tx.tx_hash.clone()?, tx.var("dest")?)))
        .collect();
    let mut confirmed = 0;
    for (i, (hash, dest)) in submitted.iter().enumerate() {
        if !rng.gen_bool(0.5) {
            continue;
        }
        let delivery = LocationRef::delivery(1_000 + i as u64);
        let mut e = Entity::new(EntityLabel::Delivery, delivery.id);
        e.delivery = Some(Delivery {
            status: EntityDelivery::Packaged,
            origin,
            origin_slot: 1,
            dest: *dest,
            dest_slot: 1,
            contents: Vec::new(),
            finish_time: None,
        });
        world.store.upsert(e);
        world.feed.push(
            Activity::new(
                EventName::DeliveryPackaged.name(),
                json!({
                    "delivery": delivery,
                    "origin": origin,
                    "dest": dest,
                    "caller_crew": crew(),
                }),
                world.now,
            )
            .with_tx_hash(hash.clone()),
        );
        confirmed += 1;
    }

    let during = manager.reconcile(&world.sources());
    let confirmed_entries = during.iter().filter(|e| e.action.delivery.is_some()).count();
    results.push(TestResult {
        name: "delivery_no_duplicates_mid_confirmation".into(),
        passed: during.len() as u64 == count && confirmed_entries == confirmed,
        detail: format!(
            "{} entries, {} confirmed of {} submissions",
            during.len(),
            confirmed_entries,
            count
        ),
    });

    let hashes: Vec<String> = during
        .iter()
        .filter(|e| e.action.delivery.is_some())
        .filter_map(|e| e.action.tx_hash.clone())
        .collect();
    for hash in &hashes {
        world.ledger.confirm(hash);
    }
    let after = manager.reconcile(&world.sources());
    results.push(TestResult {
        name: "delivery_stable_after_ledger_clears".into(),
        passed: after.len() as u64 == count
            && after
                .iter()
                .filter(|e| e.status == DeliveryStatus::Packaged)
                .count()
                == confirmed,
        detail: format!("{} entries after {} confirmations", after.len(), hashes.len()),
    });

    results
}

// ── 5. Action item paging ───────────────────────────────────────────────

fn validate_action_item_paging(rng: &mut StdRng, config: &EngineConfig) -> Vec<TestResult> {
    println!("--- Action Item Paging ---");
    let mut results = Vec::new();
    let mut world = World::default();
    world.now = 50_000;
    world.feed.loaded = true;

    let submissions = rng.gen_range(10..80);
    for i in 0..submissions {
        let lot = LocationRef::lot(lot_id(rng.gen_range(1..4), i));
        ConstructionManager::new(lot, Some(crew())).plan(&mut world.ledger, rng.gen_range(1..10));
    }
    let timed = rng.gen_range(10..80);
    for i in 0..timed {
        world.feed.push(Activity::new(
            EventName::ConstructionStarted.name(),
            json!({
                "building": LocationRef::building(500 + i),
                "caller_crew": crew(),
                "finish_time": rng.gen_range(0..100_000u64),
            }),
            rng.gen_range(0..50_000),
        ));
    }

    let feed = ActionItemFeed::collect(&crew(), &world.sources(), config);
    let mut view = PagedActionItems::new(config);
    let mut keys = HashSet::new();
    let mut paged = 0;
    let mut page = 1;
    loop {
        view.set_page(page);
        let result = view.query(&feed);
        if result.data.hits.is_empty() {
            break;
        }
        for item in &result.data.hits {
            keys.insert(item.key.clone());
        }
        paged += result.data.hits.len();
        page += 1;
    }

    results.push(TestResult {
        name: "paging_covers_every_item_once".into(),
        passed: paged == feed.items.len() && keys.len() == paged,
        detail: format!(
            "{} items over {} pages of {}",
            feed.items.len(),
            page - 1,
            config.page_size
        ),
    });

    let ordered = feed.all_visible_items();
    let grouped = ordered.windows(2).all(|w| w[0].item_type <= w[1].item_type);
    results.push(TestResult {
        name: "time_sort_groups_by_type".into(),
        passed: grouped,
        detail: format!(
            "{} need attention, {} ready",
            feed.action_items().len(),
            feed.ready_items().len()
        ),
    });

    results
}

// ── 6. Registry ─────────────────────────────────────────────────────────

fn validate_registry() -> Vec<TestResult> {
    println!("--- Registry ---");
    let store = MemoryEntityStore::new();
    let unconfigured: Vec<&str> = EventName::all()
        .iter()
        .filter(|e| {
            let activity = Activity::new(e.name(), json!({}), 0);
            get_activity_config(&activity, &store, None).is_none()
        })
        .map(|e| e.name())
        .collect();
    let unknown = Activity::new("NotARealEvent", json!({}), 0);

    vec![
        TestResult {
            name: "registry_total".into(),
            passed: unconfigured.is_empty(),
            detail: if unconfigured.is_empty() {
                format!("{} events registered", EventName::all().len())
            } else {
                format!("missing: {}", unconfigured.join(", "))
            },
        },
        TestResult {
            name: "registry_unknown_event".into(),
            passed: get_activity_config(&unknown, &store, None).is_none(),
            detail: "unregistered events yield no descriptor".into(),
        },
    ]
}
