//! Provisioning Sequencer
//!
//! Runs the twelve steps once, in order, against a `Host`. Each step is
//! checked first and applied only when the check says the host is not yet
//! in the desired state. Progress is tracked by a `RunContext`, which
//! enforces the linear `NotStarted -> step 1 .. step 12 -> Completed` chain.
//!
//! Failure handling follows the configured policy: a failing best-effort
//! step is reported and the run continues; a failing fatal step moves the
//! context to `Failed`, and every later step is reported as not run. In a
//! dry run only checks execute and nothing stops the run.

use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config_file::ProvisionConfig;
use crate::error::Result;
use crate::host::Host;
use crate::logic::selection::StepSelection;
use crate::run_state::{RunContext, RunStage};
use crate::steps::{build_steps, Applied, Step};
use crate::types::StepId;

/// What happened to one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Applied(Applied),
    AlreadySatisfied,
    /// Dry run: the check found work to do
    WouldApply,
    Skipped(String),
    Failed { error: String, fatal: bool },
    /// An earlier fatal failure stopped the run
    NotRun,
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: StepId,
    pub outcome: StepOutcome,
    pub duration: Duration,
}

/// Result of one pass over the sequence
#[derive(Debug, Clone)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
    pub context: RunContext,
    pub dry_run: bool,
}

impl RunReport {
    /// True when the sequence reached its end without a fatal failure
    pub fn success(&self) -> bool {
        self.context.is_complete()
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }

    pub fn outcome(&self, step: StepId) -> Option<&StepOutcome> {
        self.steps.iter().find(|r| r.step == step).map(|r| &r.outcome)
    }

    /// The step whose failure stopped the run, if any
    pub fn fatal_failure(&self) -> Option<&StepReport> {
        self.steps
            .iter()
            .find(|r| matches!(r.outcome, StepOutcome::Failed { fatal: true, .. }))
    }

    pub fn count(&self, predicate: impl Fn(&StepOutcome) -> bool) -> usize {
        self.steps.iter().filter(|r| predicate(&r.outcome)).count()
    }
}

pub struct Sequencer<'a> {
    config: &'a ProvisionConfig,
    host: &'a mut dyn Host,
    dry_run: bool,
}

impl<'a> Sequencer<'a> {
    /// `config` must already be validated
    pub fn new(config: &'a ProvisionConfig, host: &'a mut dyn Host) -> Self {
        Self {
            config,
            host,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn run(&mut self) -> Result<RunReport> {
        self.run_with(|_| {})
    }

    /// Run the sequence, calling `on_step` as soon as each step finishes
    pub fn run_with(&mut self, mut on_step: impl FnMut(&StepReport)) -> Result<RunReport> {
        let selection = StepSelection::from_config(self.config);
        let mut context = RunContext::new();
        let mut reports = Vec::with_capacity(StepId::all().len());

        info!(dry_run = self.dry_run, "starting provisioning sequence");

        for step in build_steps(self.config) {
            let id = step.id();

            if context.is_failed() {
                let report = StepReport {
                    step: id,
                    outcome: StepOutcome::NotRun,
                    duration: Duration::ZERO,
                };
                on_step(&report);
                reports.push(report);
                continue;
            }

            context.transition_to(RunStage::Step(id))?;
            let started = Instant::now();

            let outcome = if selection.is_selected(id) {
                self.execute(step.as_ref(), selection.is_fatal(id))
            } else {
                info!(step = %id, "skipped");
                StepOutcome::Skipped("excluded by configuration".to_string())
            };

            if let StepOutcome::Failed { fatal: true, .. } = outcome {
                context.fail()?;
            }

            let report = StepReport {
                step: id,
                outcome,
                duration: started.elapsed(),
            };
            on_step(&report);
            reports.push(report);
        }

        if !context.is_failed() {
            context.advance()?;
            info!("provisioning sequence completed");
        }

        Ok(RunReport {
            steps: reports,
            context,
            dry_run: self.dry_run,
        })
    }

    fn execute(&mut self, step: &dyn Step, fatal: bool) -> StepOutcome {
        let id = step.id();
        let result = match step.check(&*self.host) {
            Ok(true) => {
                info!(step = %id, "already satisfied");
                return StepOutcome::AlreadySatisfied;
            }
            Ok(false) if self.dry_run => {
                info!(step = %id, "would apply");
                return StepOutcome::WouldApply;
            }
            Ok(false) => {
                info!(step = %id, "applying: {}", id.description());
                step.apply(&mut *self.host)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(applied) => {
                for warning in &applied.warnings {
                    warn!(step = %id, "{}", warning);
                }
                StepOutcome::Applied(applied)
            }
            Err(e) => {
                // A dry run reports every check and never stops
                let fatal = fatal && !self.dry_run;
                if fatal {
                    error!(step = %id, error = %e, "step failed, stopping");
                } else {
                    warn!(step = %id, error = %e, "step failed, continuing");
                }
                StepOutcome::Failed {
                    error: e.to_string(),
                    fatal,
                }
            }
        }
    }
}
