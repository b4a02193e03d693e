//! Surface and resource scans of an asteroid.

use serde::Serialize;
use serde_json::{json, Value};

use crate::activity::EventName;
use crate::entity::ScanStatus;
use crate::ledger::{Executor, TransactionKey};
use crate::location::LocationRef;
use crate::stage::{derive_stage, ActionState, ActionStatus, Progress, Stage};

use super::{loc, meta_for, submit, vars, RunningLabels, Sources};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanType {
    Surface,
    Resources,
}

impl ScanType {
    fn start_key(self) -> TransactionKey {
        match self {
            Self::Surface => TransactionKey::ScanSurfaceStart,
            Self::Resources => TransactionKey::ScanResourcesStart,
        }
    }

    fn finish_key(self) -> TransactionKey {
        match self {
            Self::Surface => TransactionKey::ScanSurfaceFinish,
            Self::Resources => TransactionKey::ScanResourcesFinish,
        }
    }

    fn started_event(self) -> EventName {
        match self {
            Self::Surface => EventName::SurfaceScanStarted,
            Self::Resources => EventName::ResourceScanStarted,
        }
    }

    /// (running, done) markers on the asteroid's scan progression.
    fn markers(self) -> (ScanStatus, ScanStatus) {
        match self {
            Self::Surface => (ScanStatus::SurfaceScanning, ScanStatus::SurfaceScanned),
            Self::Resources => (ScanStatus::ResourceScanning, ScanStatus::ResourceScanned),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatusLabel {
    Ready,
    Starting,
    Scanning,
    ReadyToFinish,
    Finishing,
    Finished,
}

impl ActionStatus for ScanStatusLabel {
    fn stage(self) -> Stage {
        match self {
            Self::Ready => Stage::NotStarted,
            Self::Starting => Stage::Starting,
            Self::Scanning => Stage::InProgress,
            Self::ReadyToFinish => Stage::ReadyToComplete,
            Self::Finishing => Stage::Completing,
            Self::Finished => Stage::Completed,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Starting => "STARTING",
            Self::Scanning => "SCANNING",
            Self::ReadyToFinish => "READY_TO_FINISH",
            Self::Finishing => "FINISHING",
            Self::Finished => "FINISHED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentScan {
    pub asteroid: LocationRef,
    pub scan_type: ScanType,
    pub caller_crew: Option<LocationRef>,
    pub crewmates: Vec<u64>,
    pub start_time: Option<u64>,
    pub finish_time: Option<u64>,
    pub tx_hash: Option<String>,
}

pub struct ScanManager {
    asteroid: LocationRef,
    scan_type: ScanType,
    crew: Option<LocationRef>,
}

impl ScanManager {
    pub fn new(asteroid: LocationRef, scan_type: ScanType, crew: Option<LocationRef>) -> Self {
        Self {
            asteroid,
            scan_type,
            crew,
        }
    }

    fn current(&self) -> CurrentScan {
        CurrentScan {
            asteroid: self.asteroid,
            scan_type: self.scan_type,
            caller_crew: None,
            crewmates: Vec::new(),
            start_time: None,
            finish_time: None,
            tx_hash: None,
        }
    }

    pub fn reconcile(&self, src: &Sources) -> ActionState<ScanStatusLabel, CurrentScan> {
        let by_asteroid = json!({ "asteroid": self.asteroid });
        let (running, done) = self.scan_type.markers();
        let celestial = src
            .entities
            .get(&self.asteroid)
            .and_then(|e| e.celestial.as_ref());
        let scan_status = celestial.map_or(ScanStatus::Unscanned, |c| c.scan_status);

        if scan_status >= done {
            return ActionState::new(ScanStatusLabel::Finished, Some(self.current()));
        }

        if scan_status < running {
            return match src.ledger.pending_tx(self.scan_type.start_key(), &by_asteroid) {
                Some(tx) => {
                    let mut current = self.current();
                    current.caller_crew = tx.var("caller_crew");
                    current.tx_hash = tx.tx_hash.clone();
                    ActionState::new(ScanStatusLabel::Starting, Some(current))
                }
                None => ActionState::new(ScanStatusLabel::Ready, None),
            };
        }

        let finish_time = celestial.and_then(|c| c.scan_finish_time);
        let finish = src.ledger.pending_tx(self.scan_type.finish_key(), &by_asteroid);
        let mut current = self.current();
        current.finish_time = finish_time;
        current.tx_hash = finish.and_then(|tx| tx.tx_hash.clone());
        if let Some(started) = src
            .activities
            .find_latest(self.scan_type.started_event(), &by_asteroid)
        {
            current.caller_crew = started.caller_crew();
            current.crewmates = started.crewmates();
            current.start_time = Some(started.timestamp());
        }

        let stage = derive_stage(
            Progress::Running {
                finish_time,
                finish_pending: finish.is_some(),
            },
            src.live_block_time,
        );
        let status = RunningLabels {
            in_progress: ScanStatusLabel::Scanning,
            ready: ScanStatusLabel::ReadyToFinish,
            completing: ScanStatusLabel::Finishing,
        }
        .for_stage(stage);
        ActionState::new(status, Some(current))
    }

    fn scan_vars(&self) -> Value {
        vars(&[
            ("asteroid", loc(&self.asteroid)),
            ("caller_crew", self.crew.as_ref().and_then(loc)),
        ])
    }

    pub fn start(&self, executor: &mut dyn Executor) {
        submit(
            executor,
            self.scan_type.start_key(),
            self.scan_vars(),
            meta_for(&self.asteroid, None),
        );
    }

    pub fn finish(&self, executor: &mut dyn Executor) {
        submit(
            executor,
            self.scan_type.finish_key(),
            self.scan_vars(),
            meta_for(&self.asteroid, None),
        );
    }
}
