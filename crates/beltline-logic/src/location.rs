//! Entity addressing: labels, location references, lot id packing.
//!
//! Every entity, pending transaction and ledger event correlates through a
//! `(label, id)` pair. References are compared structurally, never by
//! identity of the snapshot that produced them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of addressable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityLabel {
    #[serde(rename = "AST")]
    Asteroid,
    #[serde(rename = "LOT")]
    Lot,
    #[serde(rename = "BLD")]
    Building,
    #[serde(rename = "SHP")]
    Ship,
    #[serde(rename = "CRW")]
    Crew,
    #[serde(rename = "CMT")]
    Crewmate,
    #[serde(rename = "DEP")]
    Deposit,
    #[serde(rename = "DLV")]
    Delivery,
    #[serde(rename = "ORD")]
    Order,
}

impl EntityLabel {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Asteroid => "AST",
            Self::Lot => "LOT",
            Self::Building => "BLD",
            Self::Ship => "SHP",
            Self::Crew => "CRW",
            Self::Crewmate => "CMT",
            Self::Deposit => "DEP",
            Self::Delivery => "DLV",
            Self::Order => "ORD",
        }
    }
}

/// A `(label, id)` pair identifying one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocationRef {
    pub label: EntityLabel,
    pub id: u64,
}

impl LocationRef {
    pub fn new(label: EntityLabel, id: u64) -> Self {
        Self { label, id }
    }

    pub fn asteroid(id: u64) -> Self {
        Self::new(EntityLabel::Asteroid, id)
    }

    pub fn lot(id: u64) -> Self {
        Self::new(EntityLabel::Lot, id)
    }

    pub fn building(id: u64) -> Self {
        Self::new(EntityLabel::Building, id)
    }

    pub fn ship(id: u64) -> Self {
        Self::new(EntityLabel::Ship, id)
    }

    pub fn crew(id: u64) -> Self {
        Self::new(EntityLabel::Crew, id)
    }

    pub fn deposit(id: u64) -> Self {
        Self::new(EntityLabel::Deposit, id)
    }

    pub fn delivery(id: u64) -> Self {
        Self::new(EntityLabel::Delivery, id)
    }

    pub fn order(id: u64) -> Self {
        Self::new(EntityLabel::Order, id)
    }

    /// Asteroid this reference sits on, when it can be read from the id alone.
    pub fn asteroid_id(&self) -> Option<u64> {
        match self.label {
            EntityLabel::Asteroid => Some(self.id),
            EntityLabel::Lot => Some(lot_asteroid_id(self.id)),
            _ => None,
        }
    }
}

impl fmt::Display for LocationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label.code(), self.id)
    }
}

// ============================================================================
// LOT IDS
// ============================================================================

const LOT_INDEX_SHIFT: u32 = 32;
const ASTEROID_MASK: u64 = (1 << LOT_INDEX_SHIFT) - 1;

/// Pack an asteroid id and a lot index into a lot id.
pub fn lot_id(asteroid_id: u64, lot_index: u64) -> u64 {
    (asteroid_id & ASTEROID_MASK) | (lot_index << LOT_INDEX_SHIFT)
}

/// Asteroid id encoded in the low bits of a lot id.
pub fn lot_asteroid_id(lot_id: u64) -> u64 {
    lot_id & ASTEROID_MASK
}

/// Lot index encoded in the high bits of a lot id.
pub fn lot_index(lot_id: u64) -> u64 {
    lot_id >> LOT_INDEX_SHIFT
}
