//! Per-kind status managers.
//!
//! Each manager is bound to one `(location, crew)` pair and derives
//! `{status, stage, current_action}` from a [`Sources`] snapshot. Derivation
//! is a pure function of the snapshot: calling `reconcile` twice with the
//! same inputs yields the same output, and calling it on every feed, ledger,
//! entity or chain-time update is the intended use.
//!
//! Precedence is fixed across kinds. Once the authoritative entity shows any
//! progress, it decides the stage and pending transactions only refine it
//! (a pending finish moves a running action to `Completing`). Pending
//! transactions decide the stage alone only while the entity shows nothing.
//! This keeps a confirmed start and its not-yet-cleared pending entry in
//! agreement instead of regressing to `Ready`.
//!
//! Mutations hand a transaction to an [`Executor`](crate::ledger::Executor)
//! and return; the new pending entry is observed on the next reconcile.

pub mod construction;
pub mod core_sample;
pub mod delivery;
pub mod extraction;
pub mod market_order;
pub mod scan;
pub mod station_crew;

pub use construction::{ConstructionManager, ConstructionStatus, CurrentConstruction};
pub use core_sample::{CoreSampleManager, CoreSampleStatus, CurrentCoreSample};
pub use delivery::{
    CurrentDelivery, DeliveryManager, DeliveryRequest, DeliveryScope, DeliveryStatus,
};
pub use extraction::{CurrentExtraction, ExtractionManager, ExtractionStatus};
pub use market_order::{CurrentOrder, MarketOrderManager, NewOrder, OrderStatusLabel};
pub use scan::{CurrentScan, ScanManager, ScanStatusLabel, ScanType};
pub use station_crew::{CurrentStationing, StationCrewManager, StationCrewStatus};

use serde_json::{Map, Value};

use crate::activity::ActivityFeed;
use crate::entity::EntityStore;
use crate::ledger::{Executor, TransactionKey, TransactionLedger};
use crate::location::LocationRef;
use crate::stage::Stage;

/// Read-only snapshot of every input a manager reconciles.
#[derive(Clone, Copy)]
pub struct Sources<'a> {
    /// Network time. Never substituted with wall-clock time.
    pub live_block_time: u64,
    pub entities: &'a dyn EntityStore,
    pub ledger: &'a TransactionLedger,
    pub activities: &'a ActivityFeed,
}

impl<'a> Sources<'a> {
    pub fn new(
        live_block_time: u64,
        entities: &'a dyn EntityStore,
        ledger: &'a TransactionLedger,
        activities: &'a ActivityFeed,
    ) -> Self {
        Self {
            live_block_time,
            entities,
            ledger,
            activities,
        }
    }
}

/// Status labels for the three running stages of a timed action.
pub(crate) struct RunningLabels<S> {
    pub in_progress: S,
    pub ready: S,
    pub completing: S,
}

impl<S: Copy> RunningLabels<S> {
    /// Label for a stage derived from [`Progress::Running`](crate::stage::Progress).
    pub fn for_stage(&self, stage: Stage) -> S {
        match stage {
            Stage::ReadyToComplete => self.ready,
            Stage::Completing => self.completing,
            _ => self.in_progress,
        }
    }
}

/// JSON object from `(key, value)` pairs, skipping absent values.
pub(crate) fn vars(pairs: &[(&str, Option<Value>)]) -> Value {
    let mut map = Map::new();
    for (k, v) in pairs {
        if let Some(v) = v {
            map.insert((*k).to_string(), v.clone());
        }
    }
    Value::Object(map)
}

pub(crate) fn loc(location: &LocationRef) -> Option<Value> {
    serde_json::to_value(location).ok()
}

pub(crate) fn num(n: u64) -> Option<Value> {
    Some(Value::from(n))
}

/// Meta attached to every submission so the action item feed can place
/// pending entries on an asteroid.
pub(crate) fn meta_for(location: &LocationRef, asteroid_id: Option<u64>) -> Option<Value> {
    let asteroid_id = asteroid_id.or_else(|| location.asteroid_id());
    Some(vars(&[
        ("location", loc(location)),
        ("asteroid_id", asteroid_id.and_then(num)),
    ]))
}

pub(crate) fn submit(
    executor: &mut dyn Executor,
    key: TransactionKey,
    vars: Value,
    meta: Option<Value>,
) {
    log::info!("{} requested with {}", key, vars);
    executor.execute(key, vars, meta);
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::activity::ActivityFeed;
    use crate::entity::MemoryEntityStore;
    use crate::ledger::TransactionLedger;

    use super::Sources;

    /// Owned inputs for manager tests.
    #[derive(Default)]
    pub struct World {
        pub store: MemoryEntityStore,
        pub ledger: TransactionLedger,
        pub feed: ActivityFeed,
        pub now: u64,
    }

    impl World {
        pub fn sources(&self) -> Sources<'_> {
            Sources::new(self.now, &self.store, &self.ledger, &self.feed)
        }

        /// Confirm the oldest pending transaction.
        pub fn confirm_first(&mut self) {
            let hash = self.ledger.pending[0].tx_hash.clone().unwrap();
            self.ledger.confirm(&hash);
        }
    }
}
