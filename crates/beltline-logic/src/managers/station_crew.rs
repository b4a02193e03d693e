//! Moving a crew to a new station (habitat or ship).
//!
//! There is no finish transaction: the crew is stationed once the ledger
//! shows it at the destination and its travel time (`ready_at`) has passed.

use serde::Serialize;
use serde_json::json;

use crate::activity::EventName;
use crate::ledger::{Executor, TransactionKey};
use crate::location::LocationRef;
use crate::stage::{is_due, ActionState, ActionStatus, Stage};

use super::{loc, meta_for, submit, vars, Sources};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StationCrewStatus {
    Ready,
    Stationing,
    Arriving,
    Stationed,
}

impl ActionStatus for StationCrewStatus {
    fn stage(self) -> Stage {
        match self {
            Self::Ready => Stage::NotStarted,
            Self::Stationing => Stage::Starting,
            Self::Arriving => Stage::InProgress,
            Self::Stationed => Stage::Completed,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Stationing => "STATIONING",
            Self::Arriving => "ARRIVING",
            Self::Stationed => "STATIONED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentStationing {
    pub crew: LocationRef,
    pub destination: LocationRef,
    pub crewmates: Vec<u64>,
    pub start_time: Option<u64>,
    pub finish_time: Option<u64>,
    pub tx_hash: Option<String>,
}

pub struct StationCrewManager {
    destination: LocationRef,
    crew: LocationRef,
}

impl StationCrewManager {
    pub fn new(destination: LocationRef, crew: LocationRef) -> Self {
        Self { destination, crew }
    }

    pub fn reconcile(&self, src: &Sources) -> ActionState<StationCrewStatus, CurrentStationing> {
        let mut current = CurrentStationing {
            crew: self.crew,
            destination: self.destination,
            crewmates: Vec::new(),
            start_time: None,
            finish_time: None,
            tx_hash: None,
        };

        let arrived = src
            .entities
            .get(&self.crew)
            .filter(|e| e.location == Some(self.destination));
        let Some(crew) = arrived else {
            let subset = json!({ "crew": self.crew, "destination": self.destination });
            return match src.ledger.pending_tx(TransactionKey::StationCrew, &subset) {
                Some(tx) => {
                    current.tx_hash = tx.tx_hash.clone();
                    ActionState::new(StationCrewStatus::Stationing, Some(current))
                }
                None => ActionState::new(StationCrewStatus::Ready, None),
            };
        };

        let ready_at = crew.crew.as_ref().map_or(0, |c| c.ready_at);
        current.finish_time = Some(ready_at);
        current.crewmates = crew.crew.as_ref().map(|c| c.roster.clone()).unwrap_or_default();
        if let Some(stationed) = src.activities.find_latest(
            EventName::CrewStationed,
            &json!({ "station": self.destination, "caller_crew": self.crew }),
        ) {
            current.start_time = Some(stationed.timestamp());
            current.tx_hash = stationed.tx_hash().map(str::to_string);
        }

        let status = if is_due(ready_at, src.live_block_time) {
            StationCrewStatus::Stationed
        } else {
            StationCrewStatus::Arriving
        };
        ActionState::new(status, Some(current))
    }

    pub fn station(&self, executor: &mut dyn Executor) {
        submit(
            executor,
            TransactionKey::StationCrew,
            vars(&[
                ("crew", loc(&self.crew)),
                ("destination", loc(&self.destination)),
                ("caller_crew", loc(&self.crew)),
            ]),
            meta_for(&self.destination, None),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{CrewInfo, Entity};
    use crate::location::EntityLabel;
    use crate::managers::fixtures::World;

    fn habitat() -> LocationRef {
        LocationRef::building(40)
    }

    fn put_crew(world: &mut World, at: LocationRef, ready_at: u64) {
        let mut e = Entity::new(EntityLabel::Crew, 6).with_location(at);
        e.crew = Some(CrewInfo {
            roster: vec![1, 2, 3],
            ready_at,
        });
        world.store.upsert(e);
    }

    #[test]
    fn test_stationing_lifecycle() {
        let mut world = World::default();
        let m = StationCrewManager::new(habitat(), LocationRef::crew(6));
        put_crew(&mut world, LocationRef::ship(2), 0);
        assert_eq!(m.reconcile(&world.sources()).status, StationCrewStatus::Ready);

        m.station(&mut world.ledger);
        let state = m.reconcile(&world.sources());
        assert_eq!(state.status, StationCrewStatus::Stationing);
        assert_eq!(state.stage, Stage::Starting);

        world.confirm_first();
        put_crew(&mut world, habitat(), 800);
        world.now = 700;
        let state = m.reconcile(&world.sources());
        assert_eq!(state.status, StationCrewStatus::Arriving);
        assert_eq!(state.current_action.unwrap().crewmates, vec![1, 2, 3]);

        world.now = 800;
        let state = m.reconcile(&world.sources());
        assert_eq!(state.status, StationCrewStatus::Stationed);
        assert_eq!(state.stage, Stage::Completed);
    }

    #[test]
    fn test_pending_for_other_destination_ignored() {
        let mut world = World::default();
        StationCrewManager::new(LocationRef::ship(9), LocationRef::crew(6))
            .station(&mut world.ledger);
        let m = StationCrewManager::new(habitat(), LocationRef::crew(6));
        assert_eq!(m.reconcile(&world.sources()).status, StationCrewStatus::Ready);
    }
}
