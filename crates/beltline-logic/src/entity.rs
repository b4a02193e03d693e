//! Authoritative entity snapshots and the read-only store seam.
//!
//! Entities are ledger-confirmed state owned by an external cache. The
//! engine only ever reads them; a missing entity means "not confirmed yet",
//! never an error. Components are optional bags, mirroring the indexer's
//! shape: an entity carries only the components its label supports.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::location::{EntityLabel, LocationRef};

// ============================================================================
// COMPONENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildingStatus {
    Unplanned,
    Planned,
    UnderConstruction,
    Operational,
}

/// Construction state of a building on a lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Building {
    pub building_type: u64,
    pub status: BuildingStatus,
    #[serde(default)]
    pub planned_at: Option<u64>,
    /// Network time after which a planned site can be claimed by another crew.
    #[serde(default)]
    pub grace_period_end: Option<u64>,
    #[serde(default)]
    pub finish_time: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub controller: LocationRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtractorStatus {
    Idle,
    Running,
}

/// One extractor slot on a building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extractor {
    pub slot: u64,
    pub status: ExtractorStatus,
    #[serde(default)]
    pub resource: Option<u64>,
    #[serde(default)]
    pub yield_amount: u64,
    #[serde(default)]
    pub deposit: Option<LocationRef>,
    #[serde(default)]
    pub destination: Option<LocationRef>,
    #[serde(default)]
    pub destination_slot: Option<u64>,
    #[serde(default)]
    pub start_time: Option<u64>,
    #[serde(default)]
    pub finish_time: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositStatus {
    Undiscovered,
    Sampling,
    Sampled,
    Used,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub resource: u64,
    pub status: DepositStatus,
    #[serde(default)]
    pub initial_yield: u64,
    #[serde(default)]
    pub remaining_yield: u64,
    #[serde(default)]
    pub finish_time: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Packaged,
    Sent,
    Complete,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductAmount {
    pub product: u64,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub status: DeliveryStatus,
    pub origin: LocationRef,
    #[serde(default)]
    pub origin_slot: u64,
    pub dest: LocationRef,
    #[serde(default)]
    pub dest_slot: u64,
    #[serde(default)]
    pub contents: Vec<ProductAmount>,
    #[serde(default)]
    pub finish_time: Option<u64>,
}

/// Asteroid scan progression. Ordered: later variants imply earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    Unscanned,
    SurfaceScanning,
    SurfaceScanned,
    ResourceScanning,
    ResourceScanned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Celestial {
    pub scan_status: ScanStatus,
    #[serde(default)]
    pub scan_finish_time: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrewInfo {
    #[serde(default)]
    pub roster: Vec<u64>,
    /// Network time at which the crew is free again.
    #[serde(default)]
    pub ready_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    LimitBuy,
    LimitSell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
}

/// A limit order resting on an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub crew: LocationRef,
    pub exchange: LocationRef,
    pub product: u64,
    /// Remaining unfilled amount.
    pub amount: u64,
    #[serde(default)]
    pub initial_amount: u64,
    pub price: u64,
    pub storage: LocationRef,
    #[serde(default)]
    pub storage_slot: u64,
}

/// Time-limited use right granted on a lot or building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agreement {
    pub permitted: LocationRef,
    pub end_time: u64,
}

// ============================================================================
// ENTITY
// ============================================================================

/// Confirmed snapshot of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: u64,
    pub label: EntityLabel,
    /// Immediate parent (lot of a building, building of a deposit, ...).
    #[serde(default)]
    pub location: Option<LocationRef>,
    #[serde(default)]
    pub control: Option<Control>,
    #[serde(default)]
    pub building: Option<Building>,
    #[serde(default)]
    pub extractors: Vec<Extractor>,
    #[serde(default)]
    pub deposit: Option<Deposit>,
    #[serde(default)]
    pub delivery: Option<Delivery>,
    #[serde(default)]
    pub celestial: Option<Celestial>,
    #[serde(default)]
    pub crew: Option<CrewInfo>,
    #[serde(default)]
    pub order: Option<Order>,
    #[serde(default)]
    pub agreements: Vec<Agreement>,
}

impl Entity {
    pub fn new(label: EntityLabel, id: u64) -> Self {
        Self {
            id,
            label,
            location: None,
            control: None,
            building: None,
            extractors: Vec::new(),
            deposit: None,
            delivery: None,
            celestial: None,
            crew: None,
            order: None,
            agreements: Vec::new(),
        }
    }

    pub fn location_ref(&self) -> LocationRef {
        LocationRef::new(self.label, self.id)
    }

    pub fn controller(&self) -> Option<LocationRef> {
        self.control.map(|c| c.controller)
    }

    pub fn is_controlled_by(&self, crew: &LocationRef) -> bool {
        self.controller().as_ref() == Some(crew)
    }

    pub fn extractor(&self, slot: u64) -> Option<&Extractor> {
        self.extractors.iter().find(|e| e.slot == slot)
    }

    pub fn with_location(mut self, location: LocationRef) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_controller(mut self, controller: LocationRef) -> Self {
        self.control = Some(Control { controller });
        self
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Structural query over cached entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityMatch {
    /// Every cached entity of `label`.
    OfLabel { label: EntityLabel },
    /// Entities of `label` whose parent location is `location`.
    AtLocation {
        label: EntityLabel,
        location: LocationRef,
    },
    /// Entities of `label` controlled by `controller`.
    ControlledBy {
        label: EntityLabel,
        controller: LocationRef,
    },
    /// Entities carrying an agreement that permits `crew`.
    AgreementFor { crew: LocationRef },
}

impl EntityMatch {
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Self::OfLabel { label } => entity.label == *label,
            Self::AtLocation { label, location } => {
                entity.label == *label && entity.location.as_ref() == Some(location)
            }
            Self::ControlledBy { label, controller } => {
                entity.label == *label && entity.is_controlled_by(controller)
            }
            Self::AgreementFor { crew } => entity.agreements.iter().any(|a| a.permitted == *crew),
        }
    }
}

/// Synchronous read of the confirmed-entity cache.
///
/// Implementations must never block or fetch: an absent entry is returned as
/// `None` and the caller treats it as "not yet".
pub trait EntityStore {
    fn get(&self, location: &LocationRef) -> Option<&Entity>;
    fn query(&self, query: &EntityMatch) -> Vec<&Entity>;
}

/// In-memory store keyed by `(label, id)`.
#[derive(Debug, Clone, Default)]
pub struct MemoryEntityStore {
    entities: BTreeMap<LocationRef, Entity>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a snapshot.
    pub fn upsert(&mut self, entity: Entity) {
        self.entities.insert(entity.location_ref(), entity);
    }

    pub fn remove(&mut self, location: &LocationRef) -> Option<Entity> {
        self.entities.remove(location)
    }

    pub fn get_mut(&mut self, location: &LocationRef) -> Option<&mut Entity> {
        self.entities.get_mut(location)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl EntityStore for MemoryEntityStore {
    fn get(&self, location: &LocationRef) -> Option<&Entity> {
        self.entities.get(location)
    }

    fn query(&self, query: &EntityMatch) -> Vec<&Entity> {
        self.entities.values().filter(|e| query.matches(e)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn building_on(lot: u64, id: u64, crew: u64) -> Entity {
        let mut e = Entity::new(EntityLabel::Building, id)
            .with_location(LocationRef::lot(lot))
            .with_controller(LocationRef::crew(crew));
        e.building = Some(Building {
            building_type: 2,
            status: BuildingStatus::Planned,
            planned_at: Some(10),
            grace_period_end: Some(1000),
            finish_time: None,
        });
        e
    }

    #[test]
    fn test_query_at_location() {
        let mut store = MemoryEntityStore::new();
        store.upsert(building_on(1, 10, 3));
        store.upsert(building_on(2, 11, 3));

        let hits = store.query(&EntityMatch::AtLocation {
            label: EntityLabel::Building,
            location: LocationRef::lot(1),
        });
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 10);
    }

    #[test]
    fn test_query_controlled_by() {
        let mut store = MemoryEntityStore::new();
        store.upsert(building_on(1, 10, 3));
        store.upsert(building_on(2, 11, 4));

        let hits = store.query(&EntityMatch::ControlledBy {
            label: EntityLabel::Building,
            controller: LocationRef::crew(4),
        });
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 11);
    }

    #[test]
    fn test_missing_entity_is_none() {
        let store = MemoryEntityStore::new();
        assert!(store.get(&LocationRef::building(1)).is_none());
    }

    #[test]
    fn test_upsert_replaces_snapshot() {
        let mut store = MemoryEntityStore::new();
        store.upsert(building_on(1, 10, 3));
        let mut updated = building_on(1, 10, 3);
        if let Some(b) = updated.building.as_mut() {
            b.status = BuildingStatus::UnderConstruction;
        }
        store.upsert(updated);
        assert_eq!(store.len(), 1);
        let status = store
            .get(&LocationRef::building(10))
            .and_then(|e| e.building.as_ref())
            .map(|b| b.status);
        assert_eq!(status, Some(BuildingStatus::UnderConstruction));
    }

    #[test]
    fn test_entity_deserializes_with_defaults() {
        let e: Entity = serde_json::from_value(serde_json::json!({
            "id": 7,
            "label": "DEP",
            "deposit": { "resource": 3, "status": "SAMPLING", "finish_time": 50 }
        }))
        .unwrap();
        assert!(e.extractors.is_empty());
        assert_eq!(e.deposit.unwrap().status, DepositStatus::Sampling);
    }
}
