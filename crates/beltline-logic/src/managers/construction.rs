//! Construction lifecycle on one lot: plan → start → finish, with a cancel
//! branch while planned and deconstruction once operational.
//!
//! A planned site is protected for a grace period. Once network time passes
//! the grace-period end without construction having started, the site is
//! "at risk": its planner still sees `PLANNED`, every other crew sees the
//! record flagged `is_at_risk` and may plan over it.

use serde::Serialize;
use serde_json::json;

use crate::activity::EventName;
use crate::entity::{BuildingStatus, Entity, EntityMatch};
use crate::ledger::{Executor, PendingTransaction, TransactionKey};
use crate::location::{EntityLabel, LocationRef};
use crate::stage::{derive_stage, ActionState, ActionStatus, Progress, Stage};

use super::{loc, meta_for, num, submit, vars, RunningLabels, Sources};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstructionStatus {
    ReadyToPlan,
    Planning,
    Planned,
    Canceling,
    Starting,
    UnderConstruction,
    ReadyToFinish,
    Finishing,
    Operational,
    Deconstructing,
}

impl ActionStatus for ConstructionStatus {
    fn stage(self) -> Stage {
        match self {
            Self::ReadyToPlan => Stage::NotStarted,
            Self::Planning | Self::Planned | Self::Starting => Stage::Starting,
            Self::UnderConstruction => Stage::InProgress,
            Self::ReadyToFinish => Stage::ReadyToComplete,
            Self::Finishing | Self::Canceling => Stage::Completing,
            Self::Operational | Self::Deconstructing => Stage::Completed,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::ReadyToPlan => "READY_TO_PLAN",
            Self::Planning => "PLANNING",
            Self::Planned => "PLANNED",
            Self::Canceling => "CANCELING",
            Self::Starting => "STARTING",
            Self::UnderConstruction => "UNDER_CONSTRUCTION",
            Self::ReadyToFinish => "READY_TO_FINISH",
            Self::Finishing => "FINISHING",
            Self::Operational => "OPERATIONAL",
            Self::Deconstructing => "DECONSTRUCTING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentConstruction {
    pub lot: LocationRef,
    pub building: Option<LocationRef>,
    pub building_type: Option<u64>,
    pub caller_crew: Option<LocationRef>,
    pub crewmates: Vec<u64>,
    pub planned_at: Option<u64>,
    pub grace_period_end: Option<u64>,
    pub start_time: Option<u64>,
    pub finish_time: Option<u64>,
    pub is_at_risk: bool,
    pub tx_hash: Option<String>,
}

impl CurrentConstruction {
    fn from_plan_tx(lot: LocationRef, tx: &PendingTransaction) -> Self {
        Self {
            lot,
            building: None,
            building_type: tx.var("building_type"),
            caller_crew: tx.var("caller_crew"),
            crewmates: Vec::new(),
            planned_at: None,
            grace_period_end: None,
            start_time: None,
            finish_time: None,
            is_at_risk: false,
            tx_hash: tx.tx_hash.clone(),
        }
    }
}

pub struct ConstructionManager {
    lot: LocationRef,
    crew: Option<LocationRef>,
}

impl ConstructionManager {
    pub fn new(lot: LocationRef, crew: Option<LocationRef>) -> Self {
        Self { lot, crew }
    }

    /// The lot's building record, if one has been planned.
    pub fn building<'s>(&self, src: &Sources<'s>) -> Option<&'s Entity> {
        src.entities
            .query(&EntityMatch::AtLocation {
                label: EntityLabel::Building,
                location: self.lot,
            })
            .into_iter()
            .find(|e| {
                e.building
                    .as_ref()
                    .is_some_and(|b| b.status != BuildingStatus::Unplanned)
            })
    }

    fn pending_plan<'s>(&self, src: &Sources<'s>) -> Option<&'s PendingTransaction> {
        let subset = vars(&[
            ("lot", loc(&self.lot)),
            ("caller_crew", self.crew.as_ref().and_then(loc)),
        ]);
        src.ledger.pending_tx(TransactionKey::ConstructionPlan, &subset)
    }

    pub fn reconcile(&self, src: &Sources) -> ActionState<ConstructionStatus, CurrentConstruction> {
        let Some(entity) = self.building(src) else {
            return match self.pending_plan(src) {
                Some(tx) => ActionState::new(
                    ConstructionStatus::Planning,
                    Some(CurrentConstruction::from_plan_tx(self.lot, tx)),
                ),
                None => ActionState::new(ConstructionStatus::ReadyToPlan, None),
            };
        };
        let Some(building) = entity.building.as_ref() else {
            return ActionState::new(ConstructionStatus::ReadyToPlan, None);
        };

        let building_ref = entity.location_ref();
        let by_building = json!({ "building": building_ref });
        let pending = |key| src.ledger.pending_tx(key, &by_building);

        let mut current = CurrentConstruction {
            lot: self.lot,
            building: Some(building_ref),
            building_type: Some(building.building_type),
            caller_crew: entity.controller(),
            crewmates: Vec::new(),
            planned_at: building.planned_at,
            grace_period_end: building.grace_period_end,
            start_time: None,
            finish_time: building.finish_time,
            is_at_risk: false,
            tx_hash: None,
        };
        if let Some(started) = src
            .activities
            .find_latest(EventName::ConstructionStarted, &by_building)
        {
            current.crewmates = started.crewmates();
            current.start_time = Some(started.timestamp());
            current.caller_crew = current.caller_crew.or_else(|| started.caller_crew());
        }

        let status = match building.status {
            BuildingStatus::Unplanned => ConstructionStatus::ReadyToPlan,
            BuildingStatus::Planned => {
                let expired = building
                    .grace_period_end
                    .is_some_and(|end| src.live_block_time > end);
                let planner = entity.controller();
                let is_planner = self.crew.is_some() && self.crew == planner;
                current.is_at_risk = expired && !is_planner;

                if current.is_at_risk {
                    match self.pending_plan(src) {
                        Some(tx) => {
                            // The viewer is replanning over someone else's expired site.
                            current.building_type = tx.var("building_type");
                            current.caller_crew = self.crew;
                            current.tx_hash = tx.tx_hash.clone();
                            ConstructionStatus::Planning
                        }
                        None => ConstructionStatus::Planned,
                    }
                } else if let Some(tx) = pending(TransactionKey::ConstructionAbandon) {
                    current.tx_hash = tx.tx_hash.clone();
                    ConstructionStatus::Canceling
                } else if let Some(tx) = pending(TransactionKey::ConstructionStart) {
                    current.tx_hash = tx.tx_hash.clone();
                    ConstructionStatus::Starting
                } else {
                    ConstructionStatus::Planned
                }
            }
            BuildingStatus::UnderConstruction => {
                let finish = pending(TransactionKey::ConstructionFinish);
                current.tx_hash = finish.and_then(|tx| tx.tx_hash.clone());
                let stage = derive_stage(
                    Progress::Running {
                        finish_time: building.finish_time,
                        finish_pending: finish.is_some(),
                    },
                    src.live_block_time,
                );
                RunningLabels {
                    in_progress: ConstructionStatus::UnderConstruction,
                    ready: ConstructionStatus::ReadyToFinish,
                    completing: ConstructionStatus::Finishing,
                }
                .for_stage(stage)
            }
            BuildingStatus::Operational => match pending(TransactionKey::ConstructionDeconstruct) {
                Some(tx) => {
                    current.tx_hash = tx.tx_hash.clone();
                    ConstructionStatus::Deconstructing
                }
                None => ConstructionStatus::Operational,
            },
        };

        ActionState::new(status, Some(current))
    }

    fn crew_var(&self) -> Option<serde_json::Value> {
        self.crew.as_ref().and_then(loc)
    }

    pub fn plan(&self, executor: &mut dyn Executor, building_type: u64) {
        submit(
            executor,
            TransactionKey::ConstructionPlan,
            vars(&[
                ("lot", loc(&self.lot)),
                ("building_type", num(building_type)),
                ("caller_crew", self.crew_var()),
            ]),
            meta_for(&self.lot, None),
        );
    }

    /// Abandon a planned site.
    pub fn cancel(&self, executor: &mut dyn Executor, building: LocationRef) {
        self.building_tx(executor, TransactionKey::ConstructionAbandon, building);
    }

    pub fn start(&self, executor: &mut dyn Executor, building: LocationRef) {
        self.building_tx(executor, TransactionKey::ConstructionStart, building);
    }

    pub fn finish(&self, executor: &mut dyn Executor, building: LocationRef) {
        self.building_tx(executor, TransactionKey::ConstructionFinish, building);
    }

    pub fn deconstruct(&self, executor: &mut dyn Executor, building: LocationRef) {
        self.building_tx(executor, TransactionKey::ConstructionDeconstruct, building);
    }

    fn building_tx(&self, executor: &mut dyn Executor, key: TransactionKey, building: LocationRef) {
        submit(
            executor,
            key,
            vars(&[("building", loc(&building)), ("caller_crew", self.crew_var())]),
            meta_for(&self.lot, None),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::Activity;
    use crate::entity::Building;
    use crate::managers::fixtures::World;

    const LOT: u64 = 4_294_967_297; // asteroid 1, lot 1

    fn crew_a() -> LocationRef {
        LocationRef::crew(1)
    }

    fn crew_b() -> LocationRef {
        LocationRef::crew(2)
    }

    fn put_building(world: &mut World, status: BuildingStatus, finish_time: Option<u64>) {
        let mut e = Entity::new(EntityLabel::Building, 50)
            .with_location(LocationRef::lot(LOT))
            .with_controller(crew_a());
        e.building = Some(Building {
            building_type: 3,
            status,
            planned_at: Some(100),
            grace_period_end: Some(1000),
            finish_time,
        });
        world.store.upsert(e);
    }

    fn manager(crew: LocationRef) -> ConstructionManager {
        ConstructionManager::new(LocationRef::lot(LOT), Some(crew))
    }

    #[test]
    fn test_empty_lot_is_ready() {
        let world = World::default();
        let state = manager(crew_a()).reconcile(&world.sources());
        assert_eq!(state.status, ConstructionStatus::ReadyToPlan);
        assert_eq!(state.stage, Stage::NotStarted);
        assert!(state.current_action.is_none());
    }

    #[test]
    fn test_pending_plan_is_planning() {
        let mut world = World::default();
        manager(crew_a()).plan(&mut world.ledger, 7);
        let state = manager(crew_a()).reconcile(&world.sources());
        assert_eq!(state.status, ConstructionStatus::Planning);
        assert_eq!(state.stage, Stage::Starting);
        let current = state.current_action.unwrap();
        assert_eq!(current.building_type, Some(7));
        assert!(current.tx_hash.is_some());
    }

    #[test]
    fn test_other_crews_plan_is_not_ours() {
        let mut world = World::default();
        manager(crew_b()).plan(&mut world.ledger, 7);
        let state = manager(crew_a()).reconcile(&world.sources());
        assert_eq!(state.status, ConstructionStatus::ReadyToPlan);
    }

    #[test]
    fn test_grace_period_is_crew_relative() {
        let mut world = World::default();
        put_building(&mut world, BuildingStatus::Planned, None);
        world.now = 1500;

        let a = manager(crew_a()).reconcile(&world.sources());
        assert_eq!(a.status, ConstructionStatus::Planned);
        assert!(!a.current_action.unwrap().is_at_risk);

        let b = manager(crew_b()).reconcile(&world.sources());
        assert_eq!(b.status, ConstructionStatus::Planned);
        assert!(b.current_action.unwrap().is_at_risk);

        manager(crew_b()).plan(&mut world.ledger, 9);
        let b = manager(crew_b()).reconcile(&world.sources());
        assert_eq!(b.status, ConstructionStatus::Planning);
        assert_eq!(b.stage, Stage::Starting);
        let current = b.current_action.unwrap();
        assert!(current.is_at_risk);
        assert_eq!(current.building_type, Some(9));
        assert_eq!(current.caller_crew, Some(crew_b()));
    }

    #[test]
    fn test_within_grace_period_not_at_risk() {
        let mut world = World::default();
        put_building(&mut world, BuildingStatus::Planned, None);
        world.now = 1000;
        let b = manager(crew_b()).reconcile(&world.sources());
        assert!(!b.current_action.unwrap().is_at_risk);
    }

    #[test]
    fn test_abandon_is_canceling() {
        let mut world = World::default();
        put_building(&mut world, BuildingStatus::Planned, None);
        manager(crew_a()).cancel(&mut world.ledger, LocationRef::building(50));
        let state = manager(crew_a()).reconcile(&world.sources());
        assert_eq!(state.status, ConstructionStatus::Canceling);
        assert_eq!(state.stage, Stage::Completing);
    }

    #[test]
    fn test_confirmed_start_with_stale_pending_stays_in_progress() {
        let mut world = World::default();
        put_building(&mut world, BuildingStatus::UnderConstruction, Some(2000));
        manager(crew_a()).start(&mut world.ledger, LocationRef::building(50));
        world.now = 1200;
        let state = manager(crew_a()).reconcile(&world.sources());
        assert_eq!(state.status, ConstructionStatus::UnderConstruction);
        assert_eq!(state.stage, Stage::InProgress);
    }

    #[test]
    fn test_time_gate_and_finish() {
        let mut world = World::default();
        put_building(&mut world, BuildingStatus::UnderConstruction, Some(2000));
        world.now = 1999;
        assert_eq!(
            manager(crew_a()).reconcile(&world.sources()).status,
            ConstructionStatus::UnderConstruction
        );
        world.now = 2000;
        assert_eq!(
            manager(crew_a()).reconcile(&world.sources()).status,
            ConstructionStatus::ReadyToFinish
        );
        manager(crew_a()).finish(&mut world.ledger, LocationRef::building(50));
        assert_eq!(
            manager(crew_a()).reconcile(&world.sources()).status,
            ConstructionStatus::Finishing
        );
    }

    #[test]
    fn test_activity_fills_crewmates_only() {
        let mut world = World::default();
        put_building(&mut world, BuildingStatus::UnderConstruction, Some(2000));
        world.feed.push(Activity::new(
            "ConstructionStarted",
            json!({
                "building": { "label": "BLD", "id": 50 },
                "finish_time": 9999,
                "caller_crew": { "label": "CRW", "id": 8 },
                "crewmates": [4, 5, 6],
            }),
            1100,
        ));
        let current = manager(crew_a())
            .reconcile(&world.sources())
            .current_action
            .unwrap();
        assert_eq!(current.crewmates, vec![4, 5, 6]);
        assert_eq!(current.start_time, Some(1100));
        // Entity fields win over the event's copies.
        assert_eq!(current.finish_time, Some(2000));
        assert_eq!(current.caller_crew, Some(crew_a()));
    }

    #[test]
    fn test_operational_and_deconstruct() {
        let mut world = World::default();
        put_building(&mut world, BuildingStatus::Operational, Some(2000));
        let state = manager(crew_a()).reconcile(&world.sources());
        assert_eq!(state.status, ConstructionStatus::Operational);
        assert_eq!(state.stage, Stage::Completed);
        manager(crew_a()).deconstruct(&mut world.ledger, LocationRef::building(50));
        assert_eq!(
            manager(crew_a()).reconcile(&world.sources()).status,
            ConstructionStatus::Deconstructing
        );
    }

    #[test]
    fn test_revert_restores_prior_stage() {
        let mut world = World::default();
        put_building(&mut world, BuildingStatus::Planned, None);
        manager(crew_a()).start(&mut world.ledger, LocationRef::building(50));
        assert_eq!(
            manager(crew_a()).reconcile(&world.sources()).status,
            ConstructionStatus::Starting
        );
        let hash = world.ledger.pending[0].tx_hash.clone().unwrap();
        world.ledger.revert(&hash);
        assert_eq!(
            manager(crew_a()).reconcile(&world.sources()).status,
            ConstructionStatus::Planned
        );
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(ConstructionStatus::ReadyToFinish.label(), "READY_TO_FINISH");
        assert_eq!(
            serde_json::to_value(ConstructionStatus::UnderConstruction).unwrap(),
            json!("UNDER_CONSTRUCTION")
        );
    }
}
