//! Canonical lifecycle stages and the shared stage derivation.
//!
//! Every action kind presents a kind-specific status label, and every label
//! maps onto exactly one of six ordered stages. The ordering is what the UI
//! relies on for flicker-free progress: for one action the presented stage
//! never moves backwards except through an explicit cancel or a fresh cycle.
//!
//! # Derivation
//!
//! | Observation | Stage |
//! |-------------|-------|
//! | no record, no start pending | `NotStarted` |
//! | no record, start pending | `Starting` |
//! | record running, finish pending | `Completing` |
//! | record running, `live >= finish_time` | `ReadyToComplete` |
//! | record running | `InProgress` |
//! | record at its complete sentinel | `Completed` |

use serde::{Deserialize, Serialize};

/// The seven reconciled action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Construction,
    Extraction,
    CoreSample,
    Delivery,
    Scan,
    StationCrew,
    MarketOrder,
}

impl ActionKind {
    pub fn all() -> [ActionKind; 7] {
        [
            Self::Construction,
            Self::Extraction,
            Self::CoreSample,
            Self::Delivery,
            Self::Scan,
            Self::StationCrew,
            Self::MarketOrder,
        ]
    }

    /// Kinds whose manager reports a list of concurrent records.
    pub fn is_multi_instance(&self) -> bool {
        matches!(self, Self::Delivery | Self::MarketOrder)
    }
}

/// Canonical lifecycle phase, ordered from first to last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    NotStarted,
    Starting,
    InProgress,
    ReadyToComplete,
    Completing,
    Completed,
}

/// What the three sources say about one action, reduced to the facts the
/// stage depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The authoritative entity shows nothing yet.
    Idle { start_pending: bool },
    /// The entity shows the action underway. `finish_time: None` means the
    /// action has no time gate.
    Running {
        finish_time: Option<u64>,
        finish_pending: bool,
    },
    /// The entity is at the kind's complete sentinel.
    Complete,
}

/// True once network time has reached `finish_time`. Wall-clock time never
/// enters this comparison.
pub fn is_due(finish_time: u64, live_block_time: u64) -> bool {
    live_block_time >= finish_time
}

pub fn derive_stage(progress: Progress, live_block_time: u64) -> Stage {
    match progress {
        Progress::Idle {
            start_pending: false,
        } => Stage::NotStarted,
        Progress::Idle {
            start_pending: true,
        } => Stage::Starting,
        Progress::Running {
            finish_pending: true,
            ..
        } => Stage::Completing,
        Progress::Running {
            finish_time: Some(t),
            ..
        } if is_due(t, live_block_time) => Stage::ReadyToComplete,
        Progress::Running { .. } => Stage::InProgress,
        Progress::Complete => Stage::Completed,
    }
}

/// A kind-specific status label.
pub trait ActionStatus: Copy {
    /// The one stage this label maps onto.
    fn stage(self) -> Stage;
    /// Upper-case label shown to players.
    fn label(self) -> &'static str;
}

/// Derived view of a single-instance action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionState<S, A> {
    pub status: S,
    pub stage: Stage,
    pub current_action: Option<A>,
}

impl<S: ActionStatus, A> ActionState<S, A> {
    pub fn new(status: S, current_action: Option<A>) -> Self {
        Self {
            status,
            stage: status.stage(),
            current_action,
        }
    }
}

/// Derived view of one record of a multi-instance action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionEntry<S, A> {
    pub action: A,
    pub status: S,
    pub stage: Stage,
}

impl<S: ActionStatus, A> ActionEntry<S, A> {
    pub fn new(status: S, action: A) -> Self {
        Self {
            action,
            status,
            stage: status.stage(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert!(Stage::NotStarted < Stage::Starting);
        assert!(Stage::Starting < Stage::InProgress);
        assert!(Stage::InProgress < Stage::ReadyToComplete);
        assert!(Stage::ReadyToComplete < Stage::Completing);
        assert!(Stage::Completing < Stage::Completed);
    }

    #[test]
    fn test_idle_derivation() {
        assert_eq!(
            derive_stage(Progress::Idle { start_pending: false }, 0),
            Stage::NotStarted
        );
        assert_eq!(
            derive_stage(Progress::Idle { start_pending: true }, 0),
            Stage::Starting
        );
    }

    #[test]
    fn test_time_gate_boundary() {
        let running = Progress::Running {
            finish_time: Some(100),
            finish_pending: false,
        };
        assert_eq!(derive_stage(running, 99), Stage::InProgress);
        assert_eq!(derive_stage(running, 100), Stage::ReadyToComplete);
        assert_eq!(derive_stage(running, 5_000), Stage::ReadyToComplete);
    }

    #[test]
    fn test_rewind_returns_to_in_progress() {
        let running = Progress::Running {
            finish_time: Some(100),
            finish_pending: false,
        };
        assert_eq!(derive_stage(running, 150), Stage::ReadyToComplete);
        assert_eq!(derive_stage(running, 50), Stage::InProgress);
    }

    #[test]
    fn test_finish_pending_overrides_time() {
        let p = Progress::Running {
            finish_time: Some(100),
            finish_pending: true,
        };
        assert_eq!(derive_stage(p, 0), Stage::Completing);
        assert_eq!(derive_stage(p, 200), Stage::Completing);
    }

    #[test]
    fn test_untimed_running_stays_in_progress() {
        let p = Progress::Running {
            finish_time: None,
            finish_pending: false,
        };
        assert_eq!(derive_stage(p, u64::MAX), Stage::InProgress);
    }

    #[test]
    fn test_multi_instance_kinds() {
        let multi: Vec<_> = ActionKind::all()
            .into_iter()
            .filter(|k| k.is_multi_instance())
            .collect();
        assert_eq!(multi, vec![ActionKind::Delivery, ActionKind::MarketOrder]);
    }
}
