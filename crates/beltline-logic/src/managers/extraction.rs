//! Resource extraction on one extractor slot of a building.
//!
//! Slots are reusable: once a confirmed finish leaves the extractor idle the
//! next derivation is a fresh `READY` cycle.

use serde::Serialize;
use serde_json::Value;

use crate::activity::EventName;
use crate::entity::ExtractorStatus;
use crate::ledger::{Executor, TransactionKey};
use crate::location::LocationRef;
use crate::stage::{derive_stage, ActionState, ActionStatus, Progress, Stage};

use super::{loc, meta_for, num, submit, vars, RunningLabels, Sources};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtractionStatus {
    Ready,
    Starting,
    Extracting,
    ReadyToFinish,
    Finishing,
}

impl ActionStatus for ExtractionStatus {
    fn stage(self) -> Stage {
        match self {
            Self::Ready => Stage::NotStarted,
            Self::Starting => Stage::Starting,
            Self::Extracting => Stage::InProgress,
            Self::ReadyToFinish => Stage::ReadyToComplete,
            Self::Finishing => Stage::Completing,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Starting => "STARTING",
            Self::Extracting => "EXTRACTING",
            Self::ReadyToFinish => "READY_TO_FINISH",
            Self::Finishing => "FINISHING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentExtraction {
    pub extractor: LocationRef,
    pub slot: u64,
    pub deposit: Option<LocationRef>,
    pub resource: Option<u64>,
    pub yield_amount: u64,
    pub destination: Option<LocationRef>,
    pub destination_slot: Option<u64>,
    pub caller_crew: Option<LocationRef>,
    pub crewmates: Vec<u64>,
    pub start_time: Option<u64>,
    pub finish_time: Option<u64>,
    pub tx_hash: Option<String>,
}

pub struct ExtractionManager {
    extractor: LocationRef,
    slot: u64,
    crew: Option<LocationRef>,
}

impl ExtractionManager {
    pub fn new(extractor: LocationRef, slot: u64, crew: Option<LocationRef>) -> Self {
        Self {
            extractor,
            slot,
            crew,
        }
    }

    fn slot_vars(&self) -> Value {
        vars(&[
            ("extractor", loc(&self.extractor)),
            ("extractor_slot", num(self.slot)),
        ])
    }

    pub fn reconcile(&self, src: &Sources) -> ActionState<ExtractionStatus, CurrentExtraction> {
        let subset = self.slot_vars();
        let running = src
            .entities
            .get(&self.extractor)
            .and_then(|e| e.extractor(self.slot))
            .filter(|x| x.status == ExtractorStatus::Running);

        let Some(extractor) = running else {
            return match src.ledger.pending_tx(TransactionKey::ExtractResourceStart, &subset) {
                Some(tx) => ActionState::new(
                    ExtractionStatus::Starting,
                    Some(CurrentExtraction {
                        extractor: self.extractor,
                        slot: self.slot,
                        deposit: tx.var("deposit"),
                        resource: None,
                        yield_amount: tx.var("amount").unwrap_or(0),
                        destination: tx.var("destination"),
                        destination_slot: tx.var("destination_slot"),
                        caller_crew: tx.var("caller_crew"),
                        crewmates: Vec::new(),
                        start_time: None,
                        finish_time: None,
                        tx_hash: tx.tx_hash.clone(),
                    }),
                ),
                None => ActionState::new(ExtractionStatus::Ready, None),
            };
        };

        let finish = src.ledger.pending_tx(TransactionKey::ExtractResourceFinish, &subset);
        let mut current = CurrentExtraction {
            extractor: self.extractor,
            slot: self.slot,
            deposit: extractor.deposit,
            resource: extractor.resource,
            yield_amount: extractor.yield_amount,
            destination: extractor.destination,
            destination_slot: extractor.destination_slot,
            caller_crew: None,
            crewmates: Vec::new(),
            start_time: extractor.start_time,
            finish_time: extractor.finish_time,
            tx_hash: finish.and_then(|tx| tx.tx_hash.clone()),
        };
        if let Some(started) = src
            .activities
            .find_latest(EventName::ResourceExtractionStarted, &subset)
        {
            current.caller_crew = started.caller_crew();
            current.crewmates = started.crewmates();
            current.start_time = current.start_time.or(Some(started.timestamp()));
        }

        let stage = derive_stage(
            Progress::Running {
                finish_time: extractor.finish_time,
                finish_pending: finish.is_some(),
            },
            src.live_block_time,
        );
        let status = RunningLabels {
            in_progress: ExtractionStatus::Extracting,
            ready: ExtractionStatus::ReadyToFinish,
            completing: ExtractionStatus::Finishing,
        }
        .for_stage(stage);

        ActionState::new(status, Some(current))
    }

    /// Begin extracting `amount` from `deposit` into the destination
    /// inventory slot.
    pub fn start(
        &self,
        executor: &mut dyn Executor,
        deposit: LocationRef,
        amount: u64,
        destination: LocationRef,
        destination_slot: u64,
    ) {
        submit(
            executor,
            TransactionKey::ExtractResourceStart,
            vars(&[
                ("extractor", loc(&self.extractor)),
                ("extractor_slot", num(self.slot)),
                ("deposit", loc(&deposit)),
                ("amount", num(amount)),
                ("destination", loc(&destination)),
                ("destination_slot", num(destination_slot)),
                ("caller_crew", self.crew.as_ref().and_then(loc)),
            ]),
            meta_for(&self.extractor, None),
        );
    }

    pub fn finish(&self, executor: &mut dyn Executor) {
        submit(
            executor,
            TransactionKey::ExtractResourceFinish,
            vars(&[
                ("extractor", loc(&self.extractor)),
                ("extractor_slot", num(self.slot)),
                ("caller_crew", self.crew.as_ref().and_then(loc)),
            ]),
            meta_for(&self.extractor, None),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::Activity;
    use crate::entity::{Entity, Extractor};
    use crate::location::EntityLabel;
    use crate::managers::fixtures::World;
    use serde_json::json;

    fn manager() -> ExtractionManager {
        ExtractionManager::new(LocationRef::building(5), 1, Some(LocationRef::crew(2)))
    }

    fn put_extractor(world: &mut World, status: ExtractorStatus, finish_time: Option<u64>) {
        let mut e = Entity::new(EntityLabel::Building, 5).with_controller(LocationRef::crew(2));
        e.extractors.push(Extractor {
            slot: 1,
            status,
            resource: Some(8),
            yield_amount: 400,
            deposit: Some(LocationRef::deposit(31)),
            destination: Some(LocationRef::building(6)),
            destination_slot: Some(2),
            start_time: Some(1000),
            finish_time,
        });
        world.store.upsert(e);
    }

    fn start(world: &mut World) {
        manager().start(
            &mut world.ledger,
            LocationRef::deposit(31),
            400,
            LocationRef::building(6),
            2,
        );
    }

    #[test]
    fn test_idle_slot_is_ready() {
        let mut world = World::default();
        put_extractor(&mut world, ExtractorStatus::Idle, None);
        let state = manager().reconcile(&world.sources());
        assert_eq!(state.status, ExtractionStatus::Ready);
        assert_eq!(state.stage, Stage::NotStarted);
    }

    #[test]
    fn test_pending_start_reads_vars() {
        let mut world = World::default();
        start(&mut world);
        let state = manager().reconcile(&world.sources());
        assert_eq!(state.status, ExtractionStatus::Starting);
        let current = state.current_action.unwrap();
        assert_eq!(current.yield_amount, 400);
        assert_eq!(current.deposit, Some(LocationRef::deposit(31)));
        assert_eq!(current.caller_crew, Some(LocationRef::crew(2)));
    }

    #[test]
    fn test_pending_start_on_other_slot_ignored() {
        let mut world = World::default();
        start(&mut world);
        let other = ExtractionManager::new(LocationRef::building(5), 2, None);
        assert_eq!(
            other.reconcile(&world.sources()).status,
            ExtractionStatus::Ready
        );
    }

    #[test]
    fn test_full_cycle() {
        let mut world = World::default();
        start(&mut world);
        world.confirm_first();
        put_extractor(&mut world, ExtractorStatus::Running, Some(2000));
        world.now = 1500;
        assert_eq!(
            manager().reconcile(&world.sources()).status,
            ExtractionStatus::Extracting
        );
        world.now = 2000;
        assert_eq!(
            manager().reconcile(&world.sources()).status,
            ExtractionStatus::ReadyToFinish
        );
        manager().finish(&mut world.ledger);
        let state = manager().reconcile(&world.sources());
        assert_eq!(state.status, ExtractionStatus::Finishing);
        assert!(state.current_action.unwrap().tx_hash.is_some());

        world.confirm_first();
        put_extractor(&mut world, ExtractorStatus::Idle, None);
        let state = manager().reconcile(&world.sources());
        assert_eq!(state.status, ExtractionStatus::Ready);
        assert!(state.current_action.is_none());
    }

    #[test]
    fn test_activity_fills_gaps() {
        let mut world = World::default();
        put_extractor(&mut world, ExtractorStatus::Running, Some(2000));
        world.feed.push(Activity::new(
            "ResourceExtractionStarted",
            json!({
                "extractor": { "label": "BLD", "id": 5 },
                "extractor_slot": 1,
                "caller_crew": { "label": "CRW", "id": 2 },
                "crewmates": [11, 12],
                "finish_time": 2500,
            }),
            1000,
        ));
        let current = manager()
            .reconcile(&world.sources())
            .current_action
            .unwrap();
        assert_eq!(current.crewmates, vec![11, 12]);
        assert_eq!(current.caller_crew, Some(LocationRef::crew(2)));
        assert_eq!(current.finish_time, Some(2000));
    }
}
