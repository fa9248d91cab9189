//! Collection run lifecycle
//!
//! ```text
//! Idle -> Acquiring -> Acquired -> Normalizing -> Loading -> Done
//!             |                                     |
//!             v                                     v
//!         Exhausted -> Failed          PersistenceFailed -> Failed
//! ```
//!
//! `Done` and `Failed` are terminal. Any other move is rejected.

use harvest_common::PartitionKey;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Acquiring,
    Acquired,
    Normalizing,
    Loading,
    Done,
    Exhausted,
    PersistenceFailed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &str {
        match self {
            RunState::Idle => "idle",
            RunState::Acquiring => "acquiring",
            RunState::Acquired => "acquired",
            RunState::Normalizing => "normalizing",
            RunState::Loading => "loading",
            RunState::Done => "done",
            RunState::Exhausted => "exhausted",
            RunState::PersistenceFailed => "persistence_failed",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (*self, next),
            (Idle, Acquiring)
                | (Acquiring, Acquired)
                | (Acquiring, Exhausted)
                | (Acquired, Normalizing)
                | (Normalizing, Loading)
                | (Loading, Done)
                | (Loading, PersistenceFailed)
                | (Exhausted, Failed)
                | (PersistenceFailed, Failed)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Illegal run transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: RunState,
    pub to: RunState,
}

/// One execution of one source for one partition.
#[derive(Debug, Clone)]
pub struct CollectionRun {
    pub id: Uuid,
    pub key: PartitionKey,
    state: RunState,
    history: Vec<RunState>,
}

impl CollectionRun {
    pub fn new(key: PartitionKey) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            state: RunState::Idle,
            history: vec![RunState::Idle],
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// States visited so far, starting with `Idle`.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn transition(&mut self, next: RunState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}
