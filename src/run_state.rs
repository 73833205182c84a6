//! Run State Machine
//!
//! Authoritative record of how far a provisioning run has progressed.
//! Transitions are validated so the sequencer cannot skip or revisit a step.
//!
//! # Stage Flow
//!
//! ```text
//! NotStarted
//!     ↓
//! Step(time-sync) → Step(timezone) → … → Step(reboot)
//!     ↓
//! Completed
//!
//! (Any non-terminal stage can transition to Failed)
//! ```

use std::fmt;
use thiserror::Error;

use crate::types::StepId;

/// Position of a run in the linear step chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStage {
    NotStarted,
    /// Executing (or having just executed) the given step
    Step(StepId),
    /// Every step was entered without a fatal failure (terminal state)
    Completed,
    /// A fatal failure stopped the run (terminal state)
    Failed,
}

impl RunStage {
    /// Numeric order: 0 for NotStarted, 1..=12 for steps, 13 for Completed, 255 for Failed
    pub const fn order(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Step(step) => step.order() + 1,
            Self::Completed => StepId::last().order() + 2,
            Self::Failed => 255,
        }
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns the next stage in the sequence, or None at a terminal state
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::Step(StepId::first())),
            Self::Step(step) => match step.next() {
                Some(next) => Some(Self::Step(next)),
                None => Some(Self::Completed),
            },
            Self::Completed | Self::Failed => None,
        }
    }

    /// Approximate progress percentage for this stage
    pub fn progress_percent(self) -> u8 {
        let total = u32::from(Self::Completed.order());
        match self {
            Self::Failed => 0,
            other => (u32::from(other.order()) * 100 / total) as u8,
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Step(step) => write!(f, "{}", step),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Errors that can occur during state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunTransitionError {
    #[error("Cannot skip from {from} to {to}")]
    SkippedStage { from: RunStage, to: RunStage },

    #[error("Cannot go backwards from {from} to {to}")]
    BackwardTransition { from: RunStage, to: RunStage },

    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: RunStage },

    #[error("Already at stage {stage}")]
    AlreadyAtStage { stage: RunStage },
}

/// Tracks the progress of one provisioning run.
///
/// # Example
///
/// ```
/// use devstation::run_state::{RunContext, RunStage};
/// use devstation::types::StepId;
///
/// let mut ctx = RunContext::new();
/// ctx.advance().unwrap();
/// assert_eq!(ctx.current_stage(), RunStage::Step(StepId::TimeSync));
///
/// // Cannot skip steps
/// assert!(ctx.transition_to(RunStage::Step(StepId::GpuMl)).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct RunContext {
    current: RunStage,

    /// Stage at which the fatal failure occurred (if any)
    failed_at: Option<RunStage>,

    /// (stage, unix timestamp) for every transition taken
    history: Vec<(RunStage, u64)>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            current: RunStage::NotStarted,
            failed_at: None,
            history: Vec::with_capacity(usize::from(RunStage::Completed.order()) + 1),
        }
    }

    #[inline]
    pub fn current_stage(&self) -> RunStage {
        self.current
    }

    #[inline]
    pub fn failed_at(&self) -> Option<RunStage> {
        self.failed_at
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current == RunStage::Completed
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.current == RunStage::Failed
    }

    #[inline]
    pub fn progress_percent(&self) -> u8 {
        self.current.progress_percent()
    }

    pub fn history(&self) -> &[(RunStage, u64)] {
        &self.history
    }

    /// Advance to the next stage in sequence.
    ///
    /// # Errors
    ///
    /// - `FromTerminalState` if already at Completed or Failed
    pub fn advance(&mut self) -> Result<RunStage, RunTransitionError> {
        let Some(next) = self.current.next() else {
            return Err(RunTransitionError::FromTerminalState { from: self.current });
        };
        self.record(next);
        self.current = next;
        Ok(next)
    }

    /// Transition to a specific stage, which must be the immediate next one.
    pub fn transition_to(&mut self, target: RunStage) -> Result<RunStage, RunTransitionError> {
        if self.current.is_terminal() {
            return Err(RunTransitionError::FromTerminalState { from: self.current });
        }
        if target == self.current {
            return Err(RunTransitionError::AlreadyAtStage { stage: target });
        }
        // Failed is only reachable through fail()
        if target == RunStage::Failed {
            return Err(RunTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }
        if target.order() < self.current.order() {
            return Err(RunTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }
        if self.current.next() != Some(target) {
            return Err(RunTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }

        self.record(target);
        self.current = target;
        Ok(target)
    }

    /// Mark the run as failed at the current stage.
    pub fn fail(&mut self) -> Result<(), RunTransitionError> {
        if self.current.is_terminal() {
            return Err(RunTransitionError::FromTerminalState { from: self.current });
        }
        self.failed_at = Some(self.current);
        self.record(RunStage::Failed);
        self.current = RunStage::Failed;
        Ok(())
    }

    /// Reset to NotStarted, clearing history.
    pub fn reset(&mut self) {
        self.current = RunStage::NotStarted;
        self.failed_at = None;
        self.history.clear();
    }

    fn record(&mut self, stage: RunStage) {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.history.push((stage, timestamp));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_chain_covers_every_step() {
        let mut stage = RunStage::NotStarted;
        let mut visited = Vec::new();
        while let Some(next) = stage.next() {
            if let RunStage::Step(step) = next {
                visited.push(step);
            }
            stage = next;
        }
        assert_eq!(stage, RunStage::Completed);
        assert_eq!(visited, StepId::all());
    }

    #[test]
    fn test_progress_percent_increases() {
        let mut stage = RunStage::NotStarted;
        let mut last = stage.progress_percent();
        while let Some(next) = stage.next() {
            assert!(next.progress_percent() >= last, "{} went backwards", next);
            last = next.progress_percent();
            stage = next;
        }
        assert_eq!(RunStage::Completed.progress_percent(), 100);
        assert_eq!(RunStage::NotStarted.progress_percent(), 0);
    }

    #[test]
    fn test_context_starts_at_not_started() {
        let ctx = RunContext::new();
        assert_eq!(ctx.current_stage(), RunStage::NotStarted);
        assert!(!ctx.is_complete());
        assert!(!ctx.is_failed());
        assert!(ctx.history().is_empty());
    }

    #[test]
    fn test_advance_through_all_stages() {
        let mut ctx = RunContext::new();
        let mut count = 0;
        while ctx.advance().is_ok() {
            count += 1;
            assert!(count < 20, "Infinite loop detected");
        }
        assert!(ctx.is_complete());
        assert_eq!(count, 13);
        assert_eq!(ctx.history().len(), 13);
    }

    #[test]
    fn test_cannot_advance_from_failed() {
        let mut ctx = RunContext::new();
        ctx.advance().unwrap();
        ctx.fail().unwrap();
        assert_eq!(ctx.failed_at(), Some(RunStage::Step(StepId::TimeSync)));
        assert!(matches!(
            ctx.advance().unwrap_err(),
            RunTransitionError::FromTerminalState { .. }
        ));
        assert!(ctx.fail().is_err());
    }

    #[test]
    fn test_cannot_skip_stages() {
        let mut ctx = RunContext::new();
        let err = ctx.transition_to(RunStage::Step(StepId::Reboot)).unwrap_err();
        assert!(matches!(err, RunTransitionError::SkippedStage { .. }));

        ctx.transition_to(RunStage::Step(StepId::TimeSync)).unwrap();
        let err = ctx.transition_to(RunStage::Completed).unwrap_err();
        assert!(matches!(err, RunTransitionError::SkippedStage { .. }));
    }

    #[test]
    fn test_cannot_go_backwards() {
        let mut ctx = RunContext::new();
        ctx.advance().unwrap();
        ctx.advance().unwrap();
        let err = ctx.transition_to(RunStage::Step(StepId::TimeSync)).unwrap_err();
        assert!(matches!(err, RunTransitionError::BackwardTransition { .. }));
        let err = ctx.transition_to(RunStage::Step(StepId::Timezone)).unwrap_err();
        assert!(matches!(err, RunTransitionError::AlreadyAtStage { .. }));
    }

    #[test]
    fn test_failed_only_via_fail() {
        let mut ctx = RunContext::new();
        ctx.advance().unwrap();
        assert!(ctx.transition_to(RunStage::Failed).is_err());
        assert_eq!(ctx.current_stage(), RunStage::Step(StepId::TimeSync));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ctx = RunContext::new();
        ctx.advance().unwrap();
        ctx.fail().unwrap();
        ctx.reset();
        assert_eq!(ctx.current_stage(), RunStage::NotStarted);
        assert_eq!(ctx.failed_at(), None);
        assert!(ctx.history().is_empty());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(RunStage::Step(StepId::JavaHome).to_string(), "java-home");
        assert_eq!(RunStage::Completed.to_string(), "completed");
    }
}
