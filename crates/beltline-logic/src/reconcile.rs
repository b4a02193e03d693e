//! Merge of unconfirmed submissions into later-confirmed records.
//!
//! Multi-instance kinds list several records per location. A submission has
//! no ledger id until it confirms, so it is shown as a synthetic trailing
//! entry. When the confirmed record appears while the pending entry has not
//! yet cleared, both describe one logical action: the pending entry is
//! folded into the record (a rename) instead of flashing a duplicate.
//!
//! Identity is decided per kind through [`MergeKey`]:
//!
//! 1. `created_by`, certain: the record's creating event carries the
//!    pending transaction's hash.
//! 2. `same_action`, heuristic: same locations and caller. Only applied when
//!    exactly one unclaimed record qualifies.
//!
//! Anything ambiguous is kept as two entries.

use crate::ledger::PendingTransaction;

/// Per-kind identity between a confirmed record and a pending submission.
pub trait MergeKey {
    fn created_by(&self, tx: &PendingTransaction) -> bool;
    fn same_action(&self, tx: &PendingTransaction) -> bool;
}

/// One reconciled entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Tagged<'a, C> {
    /// A ledger-confirmed record, with the submission folded into it if any.
    Confirmed {
        record: C,
        merged: Option<&'a PendingTransaction>,
    },
    /// A submission with no confirmed counterpart yet.
    Pending(&'a PendingTransaction),
}

impl<C> Tagged<'_, C> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// Fold `pending` submissions into `confirmed` records.
///
/// Output keeps confirmed records in their given order, followed by the
/// unmerged submissions in submission order.
pub fn merge_unconfirmed<'a, C: MergeKey>(
    confirmed: Vec<C>,
    pending: Vec<&'a PendingTransaction>,
) -> Vec<Tagged<'a, C>> {
    let mut claims: Vec<Option<&'a PendingTransaction>> = vec![None; confirmed.len()];
    let mut leftovers = Vec::new();

    for tx in pending {
        let exact = confirmed
            .iter()
            .enumerate()
            .find(|(i, c)| claims[*i].is_none() && c.created_by(tx))
            .map(|(i, _)| i);

        let slot = exact.or_else(|| {
            let candidates: Vec<usize> = confirmed
                .iter()
                .enumerate()
                .filter(|(i, c)| claims[*i].is_none() && c.same_action(tx))
                .map(|(i, _)| i)
                .collect();
            match candidates.as_slice() {
                [only] => Some(*only),
                [] => None,
                _ => {
                    log::debug!(
                        "{} matches {} records, keeping it separate",
                        tx.key,
                        candidates.len()
                    );
                    None
                }
            }
        });

        match slot {
            Some(i) => claims[i] = Some(tx),
            None => leftovers.push(tx),
        }
    }

    confirmed
        .into_iter()
        .zip(claims)
        .map(|(record, merged)| Tagged::Confirmed { record, merged })
        .chain(leftovers.into_iter().map(Tagged::Pending))
        .collect()
}
