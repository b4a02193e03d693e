//! Locally-submitted transactions and the submission seam.
//!
//! The ledger collaborator owns two ordered lists: transactions that were
//! submitted but not yet confirmed, and transactions that reverted. A
//! transaction hash is never present in both. Lookups match on a structural
//! subset of the submitted vars, so a manager can ask "is there a pending
//! `ExtractResourceFinish` for this building and slot?" without knowing the
//! rest of the payload.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stage::ActionKind;

/// Every transaction a status manager can submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKey {
    ConstructionPlan,
    ConstructionAbandon,
    ConstructionStart,
    ConstructionFinish,
    ConstructionDeconstruct,
    ExtractResourceStart,
    ExtractResourceFinish,
    SampleDepositStart,
    SampleDepositImprove,
    SampleDepositFinish,
    PackageDelivery,
    SendDelivery,
    AcceptDelivery,
    CancelDelivery,
    ReceiveDelivery,
    ScanSurfaceStart,
    ScanSurfaceFinish,
    ScanResourcesStart,
    ScanResourcesFinish,
    StationCrew,
    CreateBuyOrder,
    CreateSellOrder,
    CancelBuyOrder,
    CancelSellOrder,
    FillBuyOrder,
    FillSellOrder,
}

impl TransactionKey {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::ConstructionPlan
            | Self::ConstructionAbandon
            | Self::ConstructionStart
            | Self::ConstructionFinish
            | Self::ConstructionDeconstruct => ActionKind::Construction,
            Self::ExtractResourceStart | Self::ExtractResourceFinish => ActionKind::Extraction,
            Self::SampleDepositStart | Self::SampleDepositImprove | Self::SampleDepositFinish => {
                ActionKind::CoreSample
            }
            Self::PackageDelivery
            | Self::SendDelivery
            | Self::AcceptDelivery
            | Self::CancelDelivery
            | Self::ReceiveDelivery => ActionKind::Delivery,
            Self::ScanSurfaceStart
            | Self::ScanSurfaceFinish
            | Self::ScanResourcesStart
            | Self::ScanResourcesFinish => ActionKind::Scan,
            Self::StationCrew => ActionKind::StationCrew,
            Self::CreateBuyOrder
            | Self::CreateSellOrder
            | Self::CancelBuyOrder
            | Self::CancelSellOrder
            | Self::FillBuyOrder
            | Self::FillSellOrder => ActionKind::MarketOrder,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ConstructionPlan => "ConstructionPlan",
            Self::ConstructionAbandon => "ConstructionAbandon",
            Self::ConstructionStart => "ConstructionStart",
            Self::ConstructionFinish => "ConstructionFinish",
            Self::ConstructionDeconstruct => "ConstructionDeconstruct",
            Self::ExtractResourceStart => "ExtractResourceStart",
            Self::ExtractResourceFinish => "ExtractResourceFinish",
            Self::SampleDepositStart => "SampleDepositStart",
            Self::SampleDepositImprove => "SampleDepositImprove",
            Self::SampleDepositFinish => "SampleDepositFinish",
            Self::PackageDelivery => "PackageDelivery",
            Self::SendDelivery => "SendDelivery",
            Self::AcceptDelivery => "AcceptDelivery",
            Self::CancelDelivery => "CancelDelivery",
            Self::ReceiveDelivery => "ReceiveDelivery",
            Self::ScanSurfaceStart => "ScanSurfaceStart",
            Self::ScanSurfaceFinish => "ScanSurfaceFinish",
            Self::ScanResourcesStart => "ScanResourcesStart",
            Self::ScanResourcesFinish => "ScanResourcesFinish",
            Self::StationCrew => "StationCrew",
            Self::CreateBuyOrder => "CreateBuyOrder",
            Self::CreateSellOrder => "CreateSellOrder",
            Self::CancelBuyOrder => "CancelBuyOrder",
            Self::CancelSellOrder => "CancelSellOrder",
            Self::FillBuyOrder => "FillBuyOrder",
            Self::FillSellOrder => "FillSellOrder",
        }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A submitted, not-yet-confirmed ledger mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub key: TransactionKey,
    pub vars: Value,
    #[serde(default)]
    pub meta: Option<Value>,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub timestamp: u64,
}

impl PendingTransaction {
    pub fn new(key: TransactionKey, vars: Value) -> Self {
        Self {
            key,
            vars,
            meta: None,
            tx_hash: None,
            timestamp: 0,
        }
    }

    /// Typed read of one var. Absent or malformed vars read as `None`.
    pub fn var<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let raw = self.vars.get(name)?;
        match serde_json::from_value(raw.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                log::debug!("{} var '{}' unreadable: {}", self.key, name, e);
                None
            }
        }
    }

    /// Typed read of one meta field.
    pub fn meta_field<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let raw = self.meta.as_ref()?.get(name)?;
        serde_json::from_value(raw.clone()).ok()
    }

    pub fn matches(&self, key: TransactionKey, subset: &Value) -> bool {
        self.key == key && vars_contain(&self.vars, subset)
    }
}

/// Structural containment: every field of `subset` is present in `vars`
/// with an equal (recursively contained) value.
///
/// Objects are compared key by key; arrays and scalars must be equal.
/// A `null` in the subset only matches an absent or `null` field.
pub fn vars_contain(vars: &Value, subset: &Value) -> bool {
    match (vars, subset) {
        (Value::Object(have), Value::Object(want)) => want.iter().all(|(k, w)| match have.get(k) {
            Some(h) => vars_contain(h, w),
            None => w.is_null(),
        }),
        (Value::Array(have), Value::Array(want)) => {
            have.len() == want.len() && have.iter().zip(want).all(|(h, w)| vars_contain(h, w))
        }
        (Value::Number(h), Value::Number(w)) => match (h.as_u64(), w.as_u64()) {
            (Some(a), Some(b)) => a == b,
            _ => h.as_f64() == w.as_f64(),
        },
        _ => vars == subset,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
}

/// Snapshot of the pending and failed transaction lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionLedger {
    #[serde(default)]
    pub pending: Vec<PendingTransaction>,
    #[serde(default)]
    pub failed: Vec<PendingTransaction>,
    /// Timestamp stamped onto entries appended through [`Executor`].
    #[serde(default)]
    pub clock: u64,
    /// Last hash number handed out by [`Executor::execute`].
    #[serde(default)]
    nonce: u64,
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, key: TransactionKey, subset: &Value) -> Option<TxStatus> {
        self.pending_tx(key, subset).map(|_| TxStatus::Pending)
    }

    /// First pending transaction of `key` whose vars contain `subset`.
    pub fn pending_tx(&self, key: TransactionKey, subset: &Value) -> Option<&PendingTransaction> {
        self.pending.iter().find(|tx| tx.matches(key, subset))
    }

    /// Drop a pending entry once the ledger has confirmed it.
    pub fn confirm(&mut self, tx_hash: &str) -> Option<PendingTransaction> {
        let idx = self
            .pending
            .iter()
            .position(|tx| tx.tx_hash.as_deref() == Some(tx_hash))?;
        Some(self.pending.remove(idx))
    }

    /// Move a pending entry to the failed list.
    pub fn revert(&mut self, tx_hash: &str) -> bool {
        match self.confirm(tx_hash) {
            Some(tx) => {
                self.failed.push(tx);
                true
            }
            None => false,
        }
    }

    /// Next unused hash. Numbering continues past every hash still listed,
    /// so a ledger restored without its counter never reissues one.
    fn next_hash(&mut self) -> String {
        let listed = self
            .pending
            .iter()
            .chain(&self.failed)
            .filter_map(|tx| tx.tx_hash.as_deref())
            .filter_map(|hash| u64::from_str_radix(hash.trim_start_matches("0x"), 16).ok())
            .max()
            .unwrap_or(0);
        self.nonce = self.nonce.max(listed) + 1;
        format!("0x{:064x}", self.nonce)
    }
}

/// Submission seam. Submissions resolve asynchronously; callers never
/// observe the result directly, only the pending entry on the next read.
pub trait Executor {
    fn execute(&mut self, key: TransactionKey, vars: Value, meta: Option<Value>);
}

impl Executor for TransactionLedger {
    fn execute(&mut self, key: TransactionKey, vars: Value, meta: Option<Value>) {
        let tx_hash = self.next_hash();
        log::info!("submitted {} as {}", key, tx_hash);
        self.pending.push(PendingTransaction {
            key,
            vars,
            meta,
            tx_hash: Some(tx_hash),
            timestamp: self.clock,
        });
    }
}
