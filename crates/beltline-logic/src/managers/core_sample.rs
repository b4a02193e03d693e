//! Core sampling on a lot.
//!
//! Without a deposit id the manager answers "can this crew sample this lot
//! right now", and restarts at `READY` once a sample finishes. Addressed by
//! deposit id it follows that one sample (or its improvement) through to
//! `FINISHED`.

use serde::Serialize;
use serde_json::{json, Value};

use crate::activity::EventName;
use crate::entity::{DepositStatus, Entity, EntityMatch};
use crate::ledger::{Executor, PendingTransaction, TransactionKey};
use crate::location::{EntityLabel, LocationRef};
use crate::stage::{derive_stage, ActionState, ActionStatus, Progress, Stage};

use super::{loc, meta_for, num, submit, vars, RunningLabels, Sources};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoreSampleStatus {
    Ready,
    Starting,
    Sampling,
    ReadyToFinish,
    Finishing,
    Finished,
}

impl ActionStatus for CoreSampleStatus {
    fn stage(self) -> Stage {
        match self {
            Self::Ready => Stage::NotStarted,
            Self::Starting => Stage::Starting,
            Self::Sampling => Stage::InProgress,
            Self::ReadyToFinish => Stage::ReadyToComplete,
            Self::Finishing => Stage::Completing,
            Self::Finished => Stage::Completed,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Starting => "STARTING",
            Self::Sampling => "SAMPLING",
            Self::ReadyToFinish => "READY_TO_FINISH",
            Self::Finishing => "FINISHING",
            Self::Finished => "FINISHED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentCoreSample {
    pub lot: LocationRef,
    pub deposit: Option<LocationRef>,
    pub resource: Option<u64>,
    pub initial_yield: Option<u64>,
    pub is_improvement: bool,
    pub caller_crew: Option<LocationRef>,
    pub crewmates: Vec<u64>,
    pub start_time: Option<u64>,
    pub finish_time: Option<u64>,
    pub tx_hash: Option<String>,
}

impl CurrentCoreSample {
    fn from_tx(lot: LocationRef, tx: &PendingTransaction) -> Self {
        Self {
            lot,
            deposit: tx.var("deposit"),
            resource: tx.var("resource"),
            initial_yield: None,
            is_improvement: tx.key == TransactionKey::SampleDepositImprove,
            caller_crew: tx.var("caller_crew"),
            crewmates: Vec::new(),
            start_time: None,
            finish_time: None,
            tx_hash: tx.tx_hash.clone(),
        }
    }
}

pub struct CoreSampleManager {
    lot: LocationRef,
    crew: Option<LocationRef>,
    deposit: Option<LocationRef>,
}

impl CoreSampleManager {
    pub fn new(lot: LocationRef, crew: Option<LocationRef>) -> Self {
        Self {
            lot,
            crew,
            deposit: None,
        }
    }

    /// Follow one sample instead of the lot as a whole.
    pub fn with_deposit(mut self, deposit_id: u64) -> Self {
        self.deposit = Some(LocationRef::deposit(deposit_id));
        self
    }

    fn crew_var(&self) -> Option<Value> {
        self.crew.as_ref().and_then(loc)
    }

    /// The deposit this view follows: the addressed one, or the crew's
    /// sample currently underway on the lot.
    fn tracked<'s>(&self, src: &Sources<'s>) -> Option<&'s Entity> {
        if let Some(deposit) = self.deposit {
            return src.entities.get(&deposit);
        }
        src.entities
            .query(&EntityMatch::AtLocation {
                label: EntityLabel::Deposit,
                location: self.lot,
            })
            .into_iter()
            .filter(|e| self.crew.map_or(true, |c| e.is_controlled_by(&c)))
            .find(|e| {
                e.deposit
                    .as_ref()
                    .is_some_and(|d| d.status == DepositStatus::Sampling)
            })
    }

    fn pending_start<'s>(&self, src: &Sources<'s>) -> Option<&'s PendingTransaction> {
        if let Some(deposit) = self.deposit {
            return src
                .ledger
                .pending_tx(TransactionKey::SampleDepositImprove, &json!({ "deposit": deposit }));
        }
        let subset = vars(&[("lot", loc(&self.lot)), ("caller_crew", self.crew_var())]);
        src.ledger.pending_tx(TransactionKey::SampleDepositStart, &subset)
    }

    pub fn reconcile(&self, src: &Sources) -> ActionState<CoreSampleStatus, CurrentCoreSample> {
        let idle = || match self.pending_start(src) {
            Some(tx) => ActionState::new(
                CoreSampleStatus::Starting,
                Some(CurrentCoreSample::from_tx(self.lot, tx)),
            ),
            None => ActionState::new(CoreSampleStatus::Ready, None),
        };

        let Some(entity) = self.tracked(src) else {
            return idle();
        };
        let Some(deposit) = entity.deposit.as_ref() else {
            return idle();
        };

        let deposit_ref = entity.location_ref();
        let by_deposit = json!({ "deposit": deposit_ref });
        let mut current = CurrentCoreSample {
            lot: self.lot,
            deposit: Some(deposit_ref),
            resource: Some(deposit.resource),
            initial_yield: Some(deposit.initial_yield).filter(|y| *y > 0),
            is_improvement: false,
            caller_crew: entity.controller(),
            crewmates: Vec::new(),
            start_time: None,
            finish_time: deposit.finish_time,
            tx_hash: None,
        };
        let started = [
            EventName::SamplingDepositStarted,
            EventName::SamplingDepositStartedImprove,
        ]
        .into_iter()
        .filter_map(|name| src.activities.find_latest(name, &by_deposit))
        .max_by_key(|a| a.timestamp());
        if let Some(started) = started {
            current.is_improvement =
                started.event_name() == Some(EventName::SamplingDepositStartedImprove);
            current.crewmates = started.crewmates();
            current.start_time = Some(started.timestamp());
            current.caller_crew = current.caller_crew.or_else(|| started.caller_crew());
        }

        let status = match deposit.status {
            DepositStatus::Undiscovered => return idle(),
            DepositStatus::Sampling => {
                let finish = src
                    .ledger
                    .pending_tx(TransactionKey::SampleDepositFinish, &by_deposit);
                current.tx_hash = finish.and_then(|tx| tx.tx_hash.clone());
                let stage = derive_stage(
                    Progress::Running {
                        finish_time: deposit.finish_time,
                        finish_pending: finish.is_some(),
                    },
                    src.live_block_time,
                );
                RunningLabels {
                    in_progress: CoreSampleStatus::Sampling,
                    ready: CoreSampleStatus::ReadyToFinish,
                    completing: CoreSampleStatus::Finishing,
                }
                .for_stage(stage)
            }
            DepositStatus::Sampled | DepositStatus::Used => {
                // A finished sample can be improved, which starts a new cycle.
                if let Some(tx) = self.pending_start(src) {
                    return ActionState::new(
                        CoreSampleStatus::Starting,
                        Some(CurrentCoreSample::from_tx(self.lot, tx)),
                    );
                }
                CoreSampleStatus::Finished
            }
        };

        ActionState::new(status, Some(current))
    }

    /// Drill a new sample for `resource` using a core drill from `origin`.
    pub fn start(
        &self,
        executor: &mut dyn Executor,
        resource: u64,
        origin: LocationRef,
        origin_slot: u64,
    ) {
        submit(
            executor,
            TransactionKey::SampleDepositStart,
            vars(&[
                ("lot", loc(&self.lot)),
                ("resource", num(resource)),
                ("origin", loc(&origin)),
                ("origin_slot", num(origin_slot)),
                ("caller_crew", self.crew_var()),
            ]),
            meta_for(&self.lot, None),
        );
    }

    /// Re-sample an existing deposit to raise its yield estimate.
    pub fn improve(
        &self,
        executor: &mut dyn Executor,
        deposit: LocationRef,
        origin: LocationRef,
        origin_slot: u64,
    ) {
        submit(
            executor,
            TransactionKey::SampleDepositImprove,
            vars(&[
                ("deposit", loc(&deposit)),
                ("lot", loc(&self.lot)),
                ("origin", loc(&origin)),
                ("origin_slot", num(origin_slot)),
                ("caller_crew", self.crew_var()),
            ]),
            meta_for(&self.lot, None),
        );
    }

    pub fn finish(&self, executor: &mut dyn Executor, deposit: LocationRef) {
        submit(
            executor,
            TransactionKey::SampleDepositFinish,
            vars(&[("deposit", loc(&deposit)), ("caller_crew", self.crew_var())]),
            meta_for(&self.lot, None),
        );
    }
}
