// ── Entity lifecycle state ──
//
// Shared by devices and rules. Reads are lock-free snapshots through
// `ArcSwap`; writers serialize on a small mutex so the transition check and
// the store are one step.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::error::ModelException;

/// Lifecycle state of a device or rule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    WaitingForFirstUpdate,
    UpToDate,
    CannotSync,
    Disconnected,
    Deleted,
}

impl SyncState {
    /// Whether `self -> next` is a permitted transition.
    pub fn can_transition_to(self, next: SyncState) -> bool {
        use SyncState::{CannotSync, Deleted, Disconnected, UpToDate, WaitingForFirstUpdate};

        match (self, next) {
            (Deleted, _) => false,
            (_, Deleted) => true,
            (a, b) if a == b => true,
            (Disconnected, WaitingForFirstUpdate)
            | (WaitingForFirstUpdate | UpToDate | CannotSync, _) => true,
            (Disconnected, _) => false,
        }
    }

    /// Terminal or not.
    pub fn is_deleted(self) -> bool {
        self == SyncState::Deleted
    }
}

/// State plus the error that caused it, if any.
#[derive(Debug, Clone)]
pub struct Status {
    pub state: SyncState,
    pub error: Option<ModelException>,
}

/// Outcome of a `StateCell::transition` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// State moved from the contained value.
    Changed(SyncState),
    /// Same state re-entered; only the error was replaced.
    Unchanged,
    /// Not permitted; nothing was written.
    Refused,
}

pub(crate) struct StateCell {
    current: ArcSwap<Status>,
    write: Mutex<()>,
}

impl StateCell {
    pub(crate) fn new(initial: SyncState) -> Self {
        Self {
            current: ArcSwap::from_pointee(Status {
                state: initial,
                error: None,
            }),
            write: Mutex::new(()),
        }
    }

    pub(crate) fn state(&self) -> SyncState {
        self.current.load().state
    }

    pub(crate) fn status(&self) -> Arc<Status> {
        self.current.load_full()
    }

    pub(crate) fn transition(
        &self,
        next: SyncState,
        error: Option<ModelException>,
        owner: &dyn std::fmt::Display,
    ) -> Transition {
        let _guard = self.write.lock();
        let prev = self.current.load().state;

        if !prev.can_transition_to(next) {
            warn!(entity = %owner, from = %prev, to = %next, "refused state transition");
            return Transition::Refused;
        }

        self.current.store(Arc::new(Status { state: next, error }));
        if prev == next {
            Transition::Unchanged
        } else {
            Transition::Changed(prev)
        }
    }
}
