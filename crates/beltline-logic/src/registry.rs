//! Activity registry and hydrator.
//!
//! Turns a raw ledger event into a typed, UI-ready descriptor so consumers
//! never need event-specific knowledge. The registry is a total mapping from
//! [`EventName`] to a record of optional handlers; an absent handler degrades
//! to `None`, an empty list, or `false`.
//!
//! Hydration is a synchronous cache read through [`EntityStore`]. It never
//! fetches: an entity missing from the cache hydrates as `None` and the
//! descriptor is built from whatever is known.
//!
//! ```
//! use beltline_logic::activity::Activity;
//! use beltline_logic::entity::MemoryEntityStore;
//! use beltline_logic::registry::get_activity_config;
//!
//! let store = MemoryEntityStore::new();
//! let unknown = Activity::new("WormholeOpened", serde_json::json!({}), 0);
//! assert!(get_activity_config(&unknown, &store, None).is_none());
//! ```

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::activity::{Activity, EventName};
use crate::entity::{Entity, EntityStore};
use crate::error::{EngineError, Result};
use crate::ledger::{PendingTransaction, TransactionKey};
use crate::location::LocationRef;

// ============================================================================
// DESCRIPTORS
// ============================================================================

/// Entities resolved for one activity, keyed by the return-value role that
/// referenced them. `None` means the cache did not hold the entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hydrated {
    entries: BTreeMap<&'static str, Option<Entity>>,
}

impl Hydrated {
    pub fn get(&self, role: &str) -> Option<&Entity> {
        self.entries.get(role).and_then(|e| e.as_ref())
    }

    /// Whether the role was requested at all, resolved or not.
    pub fn requested(&self, role: &str) -> bool {
        self.entries.contains_key(role)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The crew is occupied by this activity until `finish_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusyItem {
    pub label: String,
    pub crew: Option<LocationRef>,
    pub location: Option<LocationRef>,
    pub finish_time: Option<u64>,
}

/// An in-flight process the player will need to come back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionItemDescriptor {
    pub label: String,
    pub location: Option<LocationRef>,
    pub asteroid_id: Option<u64>,
    pub finish_time: Option<u64>,
}

/// Transaction that completes the action item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinishCall {
    pub key: TransactionKey,
    pub vars: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogContent {
    pub text: String,
    pub tx_hash: Option<String>,
}

/// The action item is superseded once a pending `key` transaction whose
/// vars contain `vars` exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HiddenWhen {
    pub key: TransactionKey,
    pub vars: Value,
}

impl HiddenWhen {
    pub fn matches(&self, pending: &[PendingTransaction]) -> bool {
        pending.iter().any(|tx| tx.matches(self.key, &self.vars))
    }
}

type Prepop = fn(&Activity) -> Vec<(&'static str, LocationRef)>;
type Handler<T> = fn(&Activity, &Hydrated, Option<&LocationRef>) -> T;

/// Optional handlers registered for one event.
#[derive(Clone, Copy, Default)]
pub struct ActivityHandlers {
    pub prepop_entities: Option<Prepop>,
    pub busy_item: Option<Handler<Option<BusyItem>>>,
    pub action_item: Option<Handler<Option<ActionItemDescriptor>>>,
    pub action_item_finish_call: Option<Handler<Option<FinishCall>>>,
    pub invalidations: Option<Handler<Vec<LocationRef>>>,
    pub log_content: Option<Handler<Option<LogContent>>>,
    pub is_action_item_hidden: Option<Handler<Vec<HiddenWhen>>>,
    pub requires_crew_time: bool,
    pub trigger_alert: Option<Handler<bool>>,
}

/// Merged descriptor for one activity.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityConfig {
    pub event: EventName,
    pub viewing_as: Option<LocationRef>,
    pub hydrated: Hydrated,
    pub busy_item: Option<BusyItem>,
    pub action_item: Option<ActionItemDescriptor>,
    pub finish_call: Option<FinishCall>,
    pub invalidations: Vec<LocationRef>,
    pub log_content: Option<LogContent>,
    pub hidden_when: Vec<HiddenWhen>,
    pub requires_crew_time: bool,
    pub trigger_alert: bool,
}

impl ActivityConfig {
    /// True once a pending transaction shows the item was already acted on.
    pub fn is_action_item_hidden(&self, pending: &[PendingTransaction]) -> bool {
        self.hidden_when.iter().any(|h| h.matches(pending))
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Canonical lookup of a raw event name.
pub fn lookup(name: &str) -> Result<EventName> {
    EventName::from_name(name).ok_or_else(|| EngineError::MissingRegistryEntry(name.to_string()))
}

/// Handlers for `event`. Total over [`EventName`].
pub fn register(event: EventName) -> ActivityHandlers {
    use EventName::*;

    let base = ActivityHandlers {
        prepop_entities: Some(prepop_roles),
        invalidations: Some(invalidate_roles),
        log_content: Some(describe),
        ..ActivityHandlers::default()
    };
    let started = ActivityHandlers {
        busy_item: Some(crew_busy),
        action_item: Some(timed_action_item),
        action_item_finish_call: Some(finish_call),
        is_action_item_hidden: Some(hidden_by_finish),
        requires_crew_time: true,
        ..base
    };

    match event {
        ConstructionStarted
        | ResourceExtractionStarted
        | SamplingDepositStarted
        | SamplingDepositStartedImprove
        | SurfaceScanStarted
        | ResourceScanStarted => started,
        DeliverySent | DeliveryPackaged => ActivityHandlers {
            trigger_alert: Some(alert_on_incoming_delivery),
            ..started
        },
        DeliveryReceived => ActivityHandlers {
            trigger_alert: Some(alert_on_incoming_delivery),
            ..base
        },
        ConstructionPlanned | CrewStationed => ActivityHandlers {
            busy_item: Some(crew_busy),
            requires_crew_time: true,
            ..base
        },
        BuyOrderFilled | SellOrderFilled => ActivityHandlers {
            trigger_alert: Some(alert_on_order_fill),
            ..base
        },
        ConstructionAbandoned
        | ConstructionFinished
        | ConstructionDeconstructed
        | ResourceExtractionFinished
        | SamplingDepositFinished
        | DeliveryCancelled
        | SurfaceScanFinished
        | ResourceScanFinished
        | BuyOrderCreated
        | SellOrderCreated
        | BuyOrderCancelled
        | SellOrderCancelled => base,
    }
}

/// Build the descriptor for `activity`.
///
/// Unknown event names are logged and yield `None`; the activity simply
/// stays invisible. `override_viewing_as` replaces the default viewer, the
/// event's caller crew.
pub fn get_activity_config(
    activity: &Activity,
    store: &dyn EntityStore,
    override_viewing_as: Option<&LocationRef>,
) -> Option<ActivityConfig> {
    let event = match lookup(&activity.event.name) {
        Ok(e) => e,
        Err(e) => {
            log::warn!("{}", e);
            return None;
        }
    };
    let handlers = register(event);

    let mut hydrated = Hydrated::default();
    if let Some(prepop) = handlers.prepop_entities {
        for (role, location) in prepop(activity) {
            hydrated.entries.insert(role, store.get(&location).cloned());
        }
    }

    let viewing_as = override_viewing_as.copied().or_else(|| activity.caller_crew());
    let viewer = viewing_as.as_ref();

    Some(ActivityConfig {
        event,
        viewing_as,
        busy_item: handlers
            .busy_item
            .and_then(|h| h(activity, &hydrated, viewer)),
        action_item: handlers
            .action_item
            .and_then(|h| h(activity, &hydrated, viewer)),
        finish_call: handlers
            .action_item_finish_call
            .and_then(|h| h(activity, &hydrated, viewer)),
        invalidations: handlers
            .invalidations
            .map(|h| h(activity, &hydrated, viewer))
            .unwrap_or_default(),
        log_content: handlers
            .log_content
            .and_then(|h| h(activity, &hydrated, viewer)),
        hidden_when: handlers
            .is_action_item_hidden
            .map(|h| h(activity, &hydrated, viewer))
            .unwrap_or_default(),
        requires_crew_time: handlers.requires_crew_time,
        trigger_alert: handlers
            .trigger_alert
            .map(|h| h(activity, &hydrated, viewer))
            .unwrap_or(false),
        hydrated,
    })
}

// ============================================================================
// EVENT TABLES
// ============================================================================

/// Return-value keys holding entity references, primary location first.
fn roles(event: EventName) -> &'static [&'static str] {
    use EventName::*;
    match event {
        ConstructionPlanned
        | ConstructionAbandoned
        | ConstructionStarted
        | ConstructionFinished
        | ConstructionDeconstructed => &["building", "lot", "caller_crew"],
        ResourceExtractionStarted | ResourceExtractionFinished => {
            &["extractor", "deposit", "destination", "caller_crew"]
        }
        SamplingDepositStarted | SamplingDepositStartedImprove | SamplingDepositFinished => {
            &["deposit", "lot", "caller_crew"]
        }
        DeliveryPackaged | DeliverySent | DeliveryReceived | DeliveryCancelled => {
            &["delivery", "origin", "dest", "caller_crew"]
        }
        SurfaceScanStarted | SurfaceScanFinished | ResourceScanStarted | ResourceScanFinished => {
            &["asteroid", "caller_crew"]
        }
        CrewStationed => &["station", "caller_crew"],
        BuyOrderCreated
        | SellOrderCreated
        | BuyOrderFilled
        | SellOrderFilled
        | BuyOrderCancelled
        | SellOrderCancelled => &["exchange", "storage", "crew", "caller_crew"],
    }
}

fn title(event: EventName) -> &'static str {
    use EventName::*;
    match event {
        ConstructionPlanned => "Construction Site Planned",
        ConstructionAbandoned => "Construction Plan Abandoned",
        ConstructionStarted => "Construction",
        ConstructionFinished => "Construction Finished",
        ConstructionDeconstructed => "Building Deconstructed",
        ResourceExtractionStarted => "Resource Extraction",
        ResourceExtractionFinished => "Resource Extraction Finished",
        SamplingDepositStarted => "Core Sample",
        SamplingDepositStartedImprove => "Core Sample Improvement",
        SamplingDepositFinished => "Core Sample Finished",
        DeliveryPackaged => "Delivery Proposal",
        DeliverySent => "Delivery",
        DeliveryReceived => "Delivery Received",
        DeliveryCancelled => "Delivery Cancelled",
        SurfaceScanStarted => "Surface Scan",
        SurfaceScanFinished => "Surface Scan Finished",
        ResourceScanStarted => "Resource Scan",
        ResourceScanFinished => "Resource Scan Finished",
        CrewStationed => "Crew Stationed",
        BuyOrderCreated => "Buy Order Placed",
        SellOrderCreated => "Sell Order Placed",
        BuyOrderFilled => "Buy Order Filled",
        SellOrderFilled => "Sell Order Filled",
        BuyOrderCancelled => "Buy Order Cancelled",
        SellOrderCancelled => "Sell Order Cancelled",
    }
}

/// Transaction that finishes what `event` started, and the return values
/// it is called with.
fn finish_spec(event: EventName) -> Option<(TransactionKey, &'static [&'static str])> {
    use EventName::*;
    match event {
        ConstructionStarted => Some((TransactionKey::ConstructionFinish, &["building"])),
        ResourceExtractionStarted => Some((
            TransactionKey::ExtractResourceFinish,
            &["extractor", "extractor_slot"],
        )),
        SamplingDepositStarted | SamplingDepositStartedImprove => {
            Some((TransactionKey::SampleDepositFinish, &["deposit"]))
        }
        DeliveryPackaged => Some((TransactionKey::AcceptDelivery, &["delivery"])),
        DeliverySent => Some((TransactionKey::ReceiveDelivery, &["delivery"])),
        SurfaceScanStarted => Some((TransactionKey::ScanSurfaceFinish, &["asteroid"])),
        ResourceScanStarted => Some((TransactionKey::ScanResourcesFinish, &["asteroid"])),
        _ => None,
    }
}

fn copy_values(activity: &Activity, keys: &[&str]) -> Value {
    let mut vars = Map::new();
    for key in keys {
        if let Some(v) = activity.event.return_values.get(*key) {
            vars.insert((*key).to_string(), v.clone());
        }
    }
    Value::Object(vars)
}

fn primary_location(activity: &Activity) -> Option<LocationRef> {
    let event = activity.event_name()?;
    roles(event).first().and_then(|r| activity.location(r))
}

/// Asteroid of a location, reading through the hydrated parent when the id
/// alone does not carry it (buildings, deposits).
fn asteroid_of(location: &LocationRef, hydrated: &Hydrated) -> Option<u64> {
    location.asteroid_id().or_else(|| {
        hydrated
            .entries
            .values()
            .flatten()
            .find(|e| e.location_ref() == *location)
            .and_then(|e| e.location)
            .and_then(|parent| parent.asteroid_id())
    })
}

// ============================================================================
// HANDLERS
// ============================================================================

fn prepop_roles(activity: &Activity) -> Vec<(&'static str, LocationRef)> {
    let Some(event) = activity.event_name() else {
        return Vec::new();
    };
    roles(event)
        .iter()
        .filter_map(|role| activity.location(role).map(|loc| (*role, loc)))
        .collect()
}

fn invalidate_roles(
    activity: &Activity,
    _: &Hydrated,
    _: Option<&LocationRef>,
) -> Vec<LocationRef> {
    let mut refs: Vec<LocationRef> = prepop_roles(activity).into_iter().map(|(_, l)| l).collect();
    refs.sort();
    refs.dedup();
    refs
}

fn describe(activity: &Activity, _: &Hydrated, _: Option<&LocationRef>) -> Option<LogContent> {
    let event = activity.event_name()?;
    let mut text = title(event).to_string();
    if let Some(location) = primary_location(activity) {
        text.push_str(&format!(" at {}", location));
    }
    if let Some(crew) = activity.caller_crew() {
        text.push_str(&format!(" by {}", crew));
    }
    Some(LogContent {
        text,
        tx_hash: activity.event.transaction_hash.clone(),
    })
}

fn crew_busy(
    activity: &Activity,
    hydrated: &Hydrated,
    _: Option<&LocationRef>,
) -> Option<BusyItem> {
    let event = activity.event_name()?;
    let finish_time = hydrated
        .get("caller_crew")
        .and_then(|c| c.crew.as_ref())
        .map(|c| c.ready_at)
        .or_else(|| activity.finish_time());
    Some(BusyItem {
        label: title(event).to_string(),
        crew: activity.caller_crew(),
        location: primary_location(activity),
        finish_time,
    })
}

fn timed_action_item(
    activity: &Activity,
    hydrated: &Hydrated,
    _: Option<&LocationRef>,
) -> Option<ActionItemDescriptor> {
    let event = activity.event_name()?;
    let location = primary_location(activity);
    Some(ActionItemDescriptor {
        label: title(event).to_string(),
        asteroid_id: location.as_ref().and_then(|l| asteroid_of(l, hydrated)),
        location,
        finish_time: activity.finish_time(),
    })
}

fn finish_call(activity: &Activity, _: &Hydrated, _: Option<&LocationRef>) -> Option<FinishCall> {
    let (key, keys) = finish_spec(activity.event_name()?)?;
    Some(FinishCall {
        key,
        vars: copy_values(activity, keys),
    })
}

fn hidden_by_finish(
    activity: &Activity,
    hydrated: &Hydrated,
    viewer: Option<&LocationRef>,
) -> Vec<HiddenWhen> {
    let mut hidden: Vec<HiddenWhen> = finish_call(activity, hydrated, viewer)
        .into_iter()
        .map(|c| HiddenWhen {
            key: c.key,
            vars: c.vars,
        })
        .collect();
    if activity.event_name() == Some(EventName::DeliveryPackaged) {
        hidden.push(HiddenWhen {
            key: TransactionKey::CancelDelivery,
            vars: copy_values(activity, &["delivery"]),
        });
    }
    hidden
}

fn performed_by_other(activity: &Activity, viewer: Option<&LocationRef>) -> bool {
    match (viewer, activity.caller_crew()) {
        (Some(v), Some(caller)) => *v != caller,
        (Some(_), None) => true,
        _ => false,
    }
}

fn alert_on_incoming_delivery(
    activity: &Activity,
    hydrated: &Hydrated,
    viewer: Option<&LocationRef>,
) -> bool {
    let Some(v) = viewer else {
        return false;
    };
    let owns_dest = hydrated.get("dest").is_some_and(|d| d.is_controlled_by(v));
    owns_dest && performed_by_other(activity, viewer)
}

fn alert_on_order_fill(activity: &Activity, _: &Hydrated, viewer: Option<&LocationRef>) -> bool {
    let maker = activity.location("crew");
    maker.is_some() && maker.as_ref() == viewer && performed_by_other(activity, viewer)
}
