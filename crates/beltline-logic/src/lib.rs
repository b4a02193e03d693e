//! Pure action lifecycle reconciliation for Beltline.
//!
//! Long-running player actions (construction, extraction, deliveries, ...)
//! are observed through three sources that disagree while a transaction is
//! in flight: the local pending/failed transaction ledger, the
//! ledger-confirmed entity cache, and the crew's activity feed. This crate
//! derives one stable lifecycle view per action from a snapshot of all
//! three plus network time. It owns no storage, no timers and no I/O:
//! functions take plain data and return results.
//!
//! # Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`activity`] | Raw ledger events and the crew activity feed |
//! | [`config`] | Engine configuration and validation |
//! | [`entity`] | Confirmed entity snapshots and the read-only store seam |
//! | [`error`] | Engine error type |
//! | [`feed`] | Action item collection, sorting and paging |
//! | [`ledger`] | Pending/failed transactions, vars matching, executor seam |
//! | [`location`] | Entity labels, location references, lot id packing |
//! | [`managers`] | Per-kind status managers (one per action kind) |
//! | [`reconcile`] | Merge of unconfirmed submissions into confirmed records |
//! | [`registry`] | Activity registry and cache hydration |
//! | [`stage`] | Six-stage lifecycle and shared stage derivation |

pub mod activity;
pub mod config;
pub mod entity;
pub mod error;
pub mod feed;
pub mod ledger;
pub mod location;
pub mod managers;
pub mod reconcile;
pub mod registry;
pub mod stage;
