//! Scenario lifecycle state machine
//!
//! `NotStarted -> Running -> {Passed, Failed, Skipped}`; terminal states
//! accept no further transition.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one scenario invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    /// Not yet picked up by the runner
    NotStarted,
    /// Topology being built or body executing
    Running,
    /// Body completed
    Passed,
    /// Body or setup raised an error
    Failed,
    /// Precondition explicitly rejected by a server
    Skipped,
}

impl ScenarioState {
    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        allowed_transitions(self).is_empty()
    }
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScenarioState::NotStarted => "not started",
            ScenarioState::Running => "running",
            ScenarioState::Passed => "passed",
            ScenarioState::Failed => "failed",
            ScenarioState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Rejected state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal scenario transition: {from} -> {to}")]
pub struct IllegalTransition {
    /// Current state
    pub from: ScenarioState,
    /// Requested state
    pub to: ScenarioState,
}

/// Validates a state transition.
///
/// # Errors
/// `IllegalTransition` when `to` is not reachable from `from` in one step.
pub fn validate_transition(from: ScenarioState, to: ScenarioState) -> Result<(), IllegalTransition> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(IllegalTransition { from, to })
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: ScenarioState) -> Vec<ScenarioState> {
    use ScenarioState::*;
    match from {
        NotStarted => vec![Running],
        Running => vec![Passed, Failed, Skipped],
        Passed | Failed | Skipped => vec![],
    }
}

/// Current state of one scenario, advanced only through legal transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioTracker {
    state: ScenarioState,
}

impl Default for ScenarioTracker {
    fn default() -> Self {
        Self {
            state: ScenarioState::NotStarted,
        }
    }
}

impl ScenarioTracker {
    /// Tracker in `NotStarted`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> ScenarioState {
        self.state
    }

    /// Move to `to`
    ///
    /// # Errors
    /// `IllegalTransition` leaves the tracker unchanged.
    pub fn advance(&mut self, to: ScenarioState) -> Result<(), IllegalTransition> {
        validate_transition(self.state, to)?;
        tracing::trace!(from = %self.state, %to, "scenario transition");
        self.state = to;
        Ok(())
    }
}
