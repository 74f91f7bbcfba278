//! Validation run lifecycle.
//!
//! ```text
//! INIT → SELECTING_TARGETS ⇄ EVALUATING → RECORDED
//!   └──────────┴───────────────┴──────→ FAILED_RUN
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PactError, PactResult};
use crate::snapshot::truncate_to_micros;
use crate::verdict::{RunId, Verdict};

/// State of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    SelectingTargets,
    Evaluating,
    Recorded,
    FailedRun,
}

impl RunState {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::SelectingTargets => "SELECTING_TARGETS",
            Self::Evaluating => "EVALUATING",
            Self::Recorded => "RECORDED",
            Self::FailedRun => "FAILED_RUN",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Recorded | Self::FailedRun)
    }

    /// Returns true if `self → next` is a legal transition.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::SelectingTargets)
                | (Self::SelectingTargets, Self::Evaluating)
                | (Self::Evaluating, Self::SelectingTargets)
                | (Self::Evaluating, Self::Recorded)
                | (
                    Self::Init | Self::SelectingTargets | Self::Evaluating,
                    Self::FailedRun
                )
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One validation run: its id, its single timestamp and the verdicts so far.
#[derive(Debug, Clone)]
pub struct ValidationRun {
    id: RunId,
    timestamp: DateTime<Utc>,
    state: RunState,
    verdicts: Vec<Verdict>,
}

impl ValidationRun {
    /// Starts a run stamped `timestamp` (truncated to microseconds).
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self::with_id(RunId::new(), timestamp)
    }

    #[must_use]
    pub fn with_id(id: RunId, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            timestamp: truncate_to_micros(timestamp),
            state: RunState::Init,
            verdicts: Vec::new(),
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn verdicts(&self) -> &[Verdict] {
        &self.verdicts
    }

    /// Moves to `next`.
    ///
    /// # Errors
    /// `Internal` on an illegal transition.
    pub(crate) fn advance(&mut self, next: RunState) -> PactResult<()> {
        if !self.state.can_advance_to(next) {
            return Err(PactError::internal(format!(
                "illegal validation run transition: {} -> {}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Marks the run failed. No-op once the run is terminal.
    pub(crate) fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = RunState::FailedRun;
        }
    }

    pub(crate) fn push(&mut self, verdict: Verdict) {
        self.verdicts.push(verdict);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_lifecycle() {
        let mut run = ValidationRun::new(Utc::now());
        run.advance(RunState::SelectingTargets).unwrap();
        run.advance(RunState::Evaluating).unwrap();
        run.advance(RunState::SelectingTargets).unwrap();
        run.advance(RunState::Evaluating).unwrap();
        run.advance(RunState::Recorded).unwrap();
        assert!(run.state().is_terminal());
    }

    #[test]
    fn test_illegal_transition_is_internal_error() {
        let mut run = ValidationRun::new(Utc::now());
        let err = run.advance(RunState::Recorded).unwrap_err();
        assert!(err.is_internal());
        assert!(err.to_string().contains("INIT -> RECORDED"));
    }

    #[test]
    fn test_fail_is_sticky_after_terminal() {
        let mut run = ValidationRun::new(Utc::now());
        run.advance(RunState::SelectingTargets).unwrap();
        run.fail();
        assert_eq!(run.state(), RunState::FailedRun);
        assert!(run.advance(RunState::Evaluating).is_err());
    }
}
