//! Deliveries between inventories. Multi-instance: several deliveries can
//! share an origin or destination, so the manager reports one entry per
//! delivery instead of a single state.
//!
//! A delivery is either sent directly (`SendDelivery`) or proposed
//! (`PackageDelivery`) and later accepted or cancelled by the receiving
//! side. Submissions carry no delivery id until they confirm; they are
//! listed as trailing entries and folded into the confirmed delivery once
//! it appears (see [`merge_unconfirmed`](crate::reconcile::merge_unconfirmed)).

use serde::Serialize;
use serde_json::{json, Value};

use crate::activity::{Activity, EventName};
use crate::entity::{self, Delivery, Entity, EntityMatch, ProductAmount};
use crate::ledger::{Executor, PendingTransaction, TransactionKey};
use crate::location::{EntityLabel, LocationRef};
use crate::reconcile::{merge_unconfirmed, MergeKey, Tagged};
use crate::stage::{derive_stage, ActionEntry, ActionState, ActionStatus, Progress, Stage};

use super::{loc, meta_for, num, submit, vars, RunningLabels, Sources};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Ready,
    Packaging,
    Departing,
    Packaged,
    InTransit,
    ReadyToFinish,
    Finishing,
    Canceling,
    Finished,
    Cancelled,
}

impl ActionStatus for DeliveryStatus {
    fn stage(self) -> Stage {
        match self {
            Self::Ready => Stage::NotStarted,
            Self::Packaging | Self::Departing | Self::Packaged => Stage::Starting,
            Self::InTransit => Stage::InProgress,
            Self::ReadyToFinish => Stage::ReadyToComplete,
            Self::Finishing | Self::Canceling => Stage::Completing,
            Self::Finished | Self::Cancelled => Stage::Completed,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Packaging => "PACKAGING",
            Self::Departing => "DEPARTING",
            Self::Packaged => "PACKAGED",
            Self::InTransit => "IN_TRANSIT",
            Self::ReadyToFinish => "READY_TO_FINISH",
            Self::Finishing => "FINISHING",
            Self::Canceling => "CANCELING",
            Self::Finished => "FINISHED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// Which deliveries a manager lists. Unset fields do not filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryScope {
    pub origin: Option<LocationRef>,
    pub destination: Option<LocationRef>,
    pub delivery_id: Option<u64>,
    /// Also list completed and cancelled deliveries. Implied by `delivery_id`.
    pub include_finished: bool,
}

/// Parameters of a new delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryRequest {
    pub origin: LocationRef,
    pub origin_slot: u64,
    pub dest: LocationRef,
    pub dest_slot: u64,
    pub contents: Vec<ProductAmount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentDelivery {
    /// `None` until the submission confirms.
    pub delivery: Option<LocationRef>,
    pub origin: Option<LocationRef>,
    pub origin_slot: Option<u64>,
    pub dest: Option<LocationRef>,
    pub dest_slot: Option<u64>,
    pub contents: Vec<ProductAmount>,
    /// Proposed by the sender and awaiting acceptance.
    pub is_proposal: bool,
    pub caller_crew: Option<LocationRef>,
    pub start_time: Option<u64>,
    pub finish_time: Option<u64>,
    pub tx_hash: Option<String>,
}

impl CurrentDelivery {
    fn from_tx(tx: &PendingTransaction) -> Self {
        Self {
            delivery: None,
            origin: tx.var("origin"),
            origin_slot: tx.var("origin_slot"),
            dest: tx.var("dest"),
            dest_slot: tx.var("dest_slot"),
            contents: tx.var("contents").unwrap_or_default(),
            is_proposal: tx.key == TransactionKey::PackageDelivery,
            caller_crew: tx.var("caller_crew"),
            start_time: None,
            finish_time: None,
            tx_hash: tx.tx_hash.clone(),
        }
    }
}

/// A confirmed delivery plus the event that created it.
struct DeliveryRecord<'s> {
    entity: &'s Entity,
    delivery: &'s Delivery,
    created: Option<&'s Activity>,
}

impl DeliveryRecord<'_> {
    fn creating_key(&self) -> Option<TransactionKey> {
        match self.created?.event_name()? {
            EventName::DeliveryPackaged => Some(TransactionKey::PackageDelivery),
            EventName::DeliverySent => Some(TransactionKey::SendDelivery),
            _ => None,
        }
    }
}

impl MergeKey for DeliveryRecord<'_> {
    fn created_by(&self, tx: &PendingTransaction) -> bool {
        let created_tx = self.created.and_then(|a| a.tx_hash());
        created_tx.is_some() && created_tx == tx.tx_hash.as_deref()
    }

    fn same_action(&self, tx: &PendingTransaction) -> bool {
        if is_finished(self.delivery) {
            return false;
        }
        if let Some(key) = self.creating_key() {
            if key != tx.key {
                return false;
            }
        }
        let caller = self.created.and_then(|a| a.caller_crew());
        tx.var::<LocationRef>("origin") == Some(self.delivery.origin)
            && tx.var::<LocationRef>("dest") == Some(self.delivery.dest)
            && (caller.is_none() || caller == tx.var("caller_crew"))
    }
}

fn is_finished(d: &Delivery) -> bool {
    matches!(
        d.status,
        entity::DeliveryStatus::Complete | entity::DeliveryStatus::Cancelled
    )
}

pub struct DeliveryManager {
    scope: DeliveryScope,
    crew: Option<LocationRef>,
}

impl DeliveryManager {
    pub fn new(scope: DeliveryScope, crew: Option<LocationRef>) -> Self {
        Self { scope, crew }
    }

    fn in_scope(&self, d: &Delivery) -> bool {
        let finished = is_finished(d);
        self.scope.origin.map_or(true, |o| o == d.origin)
            && self.scope.destination.map_or(true, |t| t == d.dest)
            && (!finished || self.scope.include_finished || self.scope.delivery_id.is_some())
    }

    fn records<'s>(&self, src: &Sources<'s>) -> Vec<DeliveryRecord<'s>> {
        let entities: Vec<&'s Entity> = match self.scope.delivery_id {
            Some(id) => src.entities.get(&LocationRef::delivery(id)).into_iter().collect(),
            None => src.entities.query(&EntityMatch::OfLabel {
                label: EntityLabel::Delivery,
            }),
        };
        entities
            .into_iter()
            .filter_map(|entity| {
                let delivery = entity.delivery.as_ref()?;
                if !self.in_scope(delivery) {
                    return None;
                }
                let by_delivery = json!({ "delivery": entity.location_ref() });
                let created = src
                    .activities
                    .find_latest(EventName::DeliveryPackaged, &by_delivery)
                    .or_else(|| src.activities.find_latest(EventName::DeliverySent, &by_delivery));
                Some(DeliveryRecord {
                    entity,
                    delivery,
                    created,
                })
            })
            .collect()
    }

    fn submissions<'s>(&self, src: &Sources<'s>) -> Vec<&'s PendingTransaction> {
        let subset = vars(&[
            ("origin", self.scope.origin.as_ref().and_then(loc)),
            ("dest", self.scope.destination.as_ref().and_then(loc)),
        ]);
        src.ledger
            .pending
            .iter()
            .filter(|tx| {
                tx.matches(TransactionKey::PackageDelivery, &subset)
                    || tx.matches(TransactionKey::SendDelivery, &subset)
            })
            .collect()
    }

    /// One entry per delivery in scope: confirmed deliveries first, then
    /// submissions still waiting on an id.
    pub fn reconcile(&self, src: &Sources) -> Vec<ActionEntry<DeliveryStatus, CurrentDelivery>> {
        let merged = merge_unconfirmed(self.records(src), self.submissions(src));
        merged
            .into_iter()
            .filter_map(|tagged| match tagged {
                Tagged::Confirmed { record, merged } => {
                    Some(self.confirmed_entry(src, &record, merged))
                }
                // A submission has no id yet, so it can never be the addressed delivery.
                Tagged::Pending(_) if self.scope.delivery_id.is_some() => None,
                Tagged::Pending(tx) => {
                    let status = match tx.key {
                        TransactionKey::PackageDelivery => DeliveryStatus::Packaging,
                        _ => DeliveryStatus::Departing,
                    };
                    Some(ActionEntry::new(status, CurrentDelivery::from_tx(tx)))
                }
            })
            .collect()
    }

    fn confirmed_entry(
        &self,
        src: &Sources,
        record: &DeliveryRecord,
        merged: Option<&PendingTransaction>,
    ) -> ActionEntry<DeliveryStatus, CurrentDelivery> {
        let delivery_ref = record.entity.location_ref();
        let d = record.delivery;
        let by_delivery = json!({ "delivery": delivery_ref });
        let pending = |key| src.ledger.pending_tx(key, &by_delivery);

        let mut current = CurrentDelivery {
            delivery: Some(delivery_ref),
            origin: Some(d.origin),
            origin_slot: Some(d.origin_slot),
            dest: Some(d.dest),
            dest_slot: Some(d.dest_slot),
            contents: d.contents.clone(),
            is_proposal: d.status == entity::DeliveryStatus::Packaged,
            caller_crew: record.created.and_then(|a| a.caller_crew()),
            start_time: record.created.map(|a| a.timestamp()),
            finish_time: d
                .finish_time
                .or_else(|| record.created.and_then(|a| a.finish_time())),
            tx_hash: merged.and_then(|tx| tx.tx_hash.clone()),
        };

        let status = match d.status {
            entity::DeliveryStatus::Packaged => {
                if let Some(tx) = pending(TransactionKey::CancelDelivery) {
                    current.tx_hash = tx.tx_hash.clone();
                    DeliveryStatus::Canceling
                } else if let Some(tx) = pending(TransactionKey::AcceptDelivery) {
                    current.tx_hash = tx.tx_hash.clone();
                    DeliveryStatus::Departing
                } else {
                    DeliveryStatus::Packaged
                }
            }
            entity::DeliveryStatus::Sent => {
                let receive = pending(TransactionKey::ReceiveDelivery);
                if let Some(tx) = receive {
                    current.tx_hash = tx.tx_hash.clone();
                }
                let stage = derive_stage(
                    Progress::Running {
                        finish_time: current.finish_time,
                        finish_pending: receive.is_some(),
                    },
                    src.live_block_time,
                );
                RunningLabels {
                    in_progress: DeliveryStatus::InTransit,
                    ready: DeliveryStatus::ReadyToFinish,
                    completing: DeliveryStatus::Finishing,
                }
                .for_stage(stage)
            }
            entity::DeliveryStatus::Complete => DeliveryStatus::Finished,
            entity::DeliveryStatus::Cancelled => DeliveryStatus::Cancelled,
        };
        ActionEntry::new(status, current)
    }

    /// Single summary for views that show one delivery at a time: the most
    /// recent unfinished entry, or `READY` when there is none.
    pub fn current(&self, src: &Sources) -> ActionState<DeliveryStatus, CurrentDelivery> {
        let latest = self
            .reconcile(src)
            .into_iter()
            .rev()
            .find(|e| e.stage < Stage::Completed || self.scope.delivery_id.is_some());
        match latest {
            Some(entry) => ActionState::new(entry.status, Some(entry.action)),
            None => ActionState::new(DeliveryStatus::Ready, None),
        }
    }

    fn request_vars(&self, request: &DeliveryRequest) -> Value {
        vars(&[
            ("origin", loc(&request.origin)),
            ("origin_slot", num(request.origin_slot)),
            ("dest", loc(&request.dest)),
            ("dest_slot", num(request.dest_slot)),
            ("contents", serde_json::to_value(&request.contents).ok()),
            ("caller_crew", self.crew.as_ref().and_then(loc)),
        ])
    }

    /// Propose a delivery the destination's controller must accept.
    pub fn package(&self, executor: &mut dyn Executor, request: &DeliveryRequest) {
        submit(
            executor,
            TransactionKey::PackageDelivery,
            self.request_vars(request),
            meta_for(&request.dest, None),
        );
    }

    pub fn send(&self, executor: &mut dyn Executor, request: &DeliveryRequest) {
        submit(
            executor,
            TransactionKey::SendDelivery,
            self.request_vars(request),
            meta_for(&request.dest, None),
        );
    }

    pub fn accept(&self, executor: &mut dyn Executor, delivery: LocationRef) {
        self.delivery_tx(executor, TransactionKey::AcceptDelivery, delivery);
    }

    pub fn cancel(&self, executor: &mut dyn Executor, delivery: LocationRef) {
        self.delivery_tx(executor, TransactionKey::CancelDelivery, delivery);
    }

    /// Finish an arrived delivery.
    pub fn receive(&self, executor: &mut dyn Executor, delivery: LocationRef) {
        self.delivery_tx(executor, TransactionKey::ReceiveDelivery, delivery);
    }

    fn delivery_tx(&self, executor: &mut dyn Executor, key: TransactionKey, delivery: LocationRef) {
        let location = self.scope.destination.or(self.scope.origin).unwrap_or(delivery);
        submit(
            executor,
            key,
            vars(&[
                ("delivery", loc(&delivery)),
                ("caller_crew", self.crew.as_ref().and_then(loc)),
            ]),
            meta_for(&location, None),
        );
    }
}
