//! Raw ledger events ("activities") and the feed they arrive in.
//!
//! Event names arrive as strings from the indexer. Known names parse into
//! [`EventName`]; anything else stays a raw string so the registry can log
//! it and fail open instead of rejecting the whole feed.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ledger::vars_contain;
use crate::location::LocationRef;
use crate::stage::ActionKind;

/// Every ledger event the registry knows how to describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    ConstructionPlanned,
    ConstructionAbandoned,
    ConstructionStarted,
    ConstructionFinished,
    ConstructionDeconstructed,
    ResourceExtractionStarted,
    ResourceExtractionFinished,
    SamplingDepositStarted,
    SamplingDepositStartedImprove,
    SamplingDepositFinished,
    DeliveryPackaged,
    DeliverySent,
    DeliveryReceived,
    DeliveryCancelled,
    SurfaceScanStarted,
    SurfaceScanFinished,
    ResourceScanStarted,
    ResourceScanFinished,
    CrewStationed,
    BuyOrderCreated,
    SellOrderCreated,
    BuyOrderFilled,
    SellOrderFilled,
    BuyOrderCancelled,
    SellOrderCancelled,
}

impl EventName {
    pub fn all() -> &'static [EventName] {
        &[
            Self::ConstructionPlanned,
            Self::ConstructionAbandoned,
            Self::ConstructionStarted,
            Self::ConstructionFinished,
            Self::ConstructionDeconstructed,
            Self::ResourceExtractionStarted,
            Self::ResourceExtractionFinished,
            Self::SamplingDepositStarted,
            Self::SamplingDepositStartedImprove,
            Self::SamplingDepositFinished,
            Self::DeliveryPackaged,
            Self::DeliverySent,
            Self::DeliveryReceived,
            Self::DeliveryCancelled,
            Self::SurfaceScanStarted,
            Self::SurfaceScanFinished,
            Self::ResourceScanStarted,
            Self::ResourceScanFinished,
            Self::CrewStationed,
            Self::BuyOrderCreated,
            Self::SellOrderCreated,
            Self::BuyOrderFilled,
            Self::SellOrderFilled,
            Self::BuyOrderCancelled,
            Self::SellOrderCancelled,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ConstructionPlanned => "ConstructionPlanned",
            Self::ConstructionAbandoned => "ConstructionAbandoned",
            Self::ConstructionStarted => "ConstructionStarted",
            Self::ConstructionFinished => "ConstructionFinished",
            Self::ConstructionDeconstructed => "ConstructionDeconstructed",
            Self::ResourceExtractionStarted => "ResourceExtractionStarted",
            Self::ResourceExtractionFinished => "ResourceExtractionFinished",
            Self::SamplingDepositStarted => "SamplingDepositStarted",
            Self::SamplingDepositStartedImprove => "SamplingDepositStartedImprove",
            Self::SamplingDepositFinished => "SamplingDepositFinished",
            Self::DeliveryPackaged => "DeliveryPackaged",
            Self::DeliverySent => "DeliverySent",
            Self::DeliveryReceived => "DeliveryReceived",
            Self::DeliveryCancelled => "DeliveryCancelled",
            Self::SurfaceScanStarted => "SurfaceScanStarted",
            Self::SurfaceScanFinished => "SurfaceScanFinished",
            Self::ResourceScanStarted => "ResourceScanStarted",
            Self::ResourceScanFinished => "ResourceScanFinished",
            Self::CrewStationed => "CrewStationed",
            Self::BuyOrderCreated => "BuyOrderCreated",
            Self::SellOrderCreated => "SellOrderCreated",
            Self::BuyOrderFilled => "BuyOrderFilled",
            Self::SellOrderFilled => "SellOrderFilled",
            Self::BuyOrderCancelled => "BuyOrderCancelled",
            Self::SellOrderCancelled => "SellOrderCancelled",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|e| e.name() == name)
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Self::ConstructionPlanned
            | Self::ConstructionAbandoned
            | Self::ConstructionStarted
            | Self::ConstructionFinished
            | Self::ConstructionDeconstructed => ActionKind::Construction,
            Self::ResourceExtractionStarted | Self::ResourceExtractionFinished => {
                ActionKind::Extraction
            }
            Self::SamplingDepositStarted
            | Self::SamplingDepositStartedImprove
            | Self::SamplingDepositFinished => ActionKind::CoreSample,
            Self::DeliveryPackaged
            | Self::DeliverySent
            | Self::DeliveryReceived
            | Self::DeliveryCancelled => ActionKind::Delivery,
            Self::SurfaceScanStarted
            | Self::SurfaceScanFinished
            | Self::ResourceScanStarted
            | Self::ResourceScanFinished => ActionKind::Scan,
            Self::CrewStationed => ActionKind::StationCrew,
            Self::BuyOrderCreated
            | Self::SellOrderCreated
            | Self::BuyOrderFilled
            | Self::SellOrderFilled
            | Self::BuyOrderCancelled
            | Self::SellOrderCancelled => ActionKind::MarketOrder,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub name: String,
    #[serde(default)]
    pub return_values: Value,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub timestamp: u64,
}

/// One raw ledger event as delivered by the activity feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub event: ActivityEvent,
}

impl Activity {
    pub fn new(name: impl Into<String>, return_values: Value, timestamp: u64) -> Self {
        Self {
            event: ActivityEvent {
                name: name.into(),
                return_values,
                transaction_hash: None,
                timestamp,
            },
        }
    }

    pub fn with_tx_hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.event.transaction_hash = Some(tx_hash.into());
        self
    }

    pub fn event_name(&self) -> Option<EventName> {
        EventName::from_name(&self.event.name)
    }

    /// Typed read of one return value. Malformed values read as `None`.
    pub fn value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.event.return_values.get(key)?;
        match serde_json::from_value(raw.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                log::debug!("{} return value '{}' unreadable: {}", self.event.name, key, e);
                None
            }
        }
    }

    pub fn location(&self, key: &str) -> Option<LocationRef> {
        self.value(key)
    }

    pub fn caller_crew(&self) -> Option<LocationRef> {
        self.location("caller_crew")
    }

    pub fn finish_time(&self) -> Option<u64> {
        self.value("finish_time")
    }

    pub fn crewmates(&self) -> Vec<u64> {
        self.value("crewmates").unwrap_or_default()
    }

    pub fn timestamp(&self) -> u64 {
        self.event.timestamp
    }

    pub fn tx_hash(&self) -> Option<&str> {
        self.event.transaction_hash.as_deref()
    }
}

/// Crew-scoped activities, continuously refreshed by the feed collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityFeed {
    #[serde(default)]
    pub activities: Vec<Activity>,
    /// False until the first page of activities has arrived.
    #[serde(default)]
    pub loaded: bool,
}

impl ActivityFeed {
    pub fn new(activities: Vec<Activity>) -> Self {
        Self {
            activities,
            loaded: true,
        }
    }

    pub fn push(&mut self, activity: Activity) {
        self.activities.push(activity);
    }

    /// Most recent activity named `name` whose return values contain
    /// `subset`. Ties on timestamp go to the later feed position.
    pub fn find_latest(&self, name: EventName, subset: &Value) -> Option<&Activity> {
        self.activities
            .iter()
            .filter(|a| a.event.name == name.name())
            .filter(|a| vars_contain(&a.event.return_values, subset))
            .max_by_key(|a| a.event.timestamp)
    }
}
