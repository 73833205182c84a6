//! Step selection and failure policy.
//!
//! Turns the configuration's `skip_steps`, `best_effort_steps` and reboot
//! switch into per-step answers for the sequencer.

use std::collections::BTreeSet;

use crate::config_file::ProvisionConfig;
use crate::types::StepId;

/// Per-step decisions derived from a validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSelection {
    skipped: BTreeSet<StepId>,
    best_effort: BTreeSet<StepId>,
}

impl StepSelection {
    pub fn from_config(config: &ProvisionConfig) -> Self {
        let mut skipped: BTreeSet<StepId> = config.skip_steps.iter().copied().collect();
        if !config.reboot.enabled {
            skipped.insert(StepId::Reboot);
        }
        Self {
            skipped,
            best_effort: config.best_effort_steps.iter().copied().collect(),
        }
    }

    /// Whether the step runs at all
    pub fn is_selected(&self, step: StepId) -> bool {
        !self.skipped.contains(&step)
    }

    /// Whether a failure of this step stops the run
    pub fn is_fatal(&self, step: StepId) -> bool {
        !self.best_effort.contains(&step)
    }

    /// Steps that will run, in execution order
    pub fn selected_steps(&self) -> Vec<StepId> {
        StepId::all()
            .into_iter()
            .filter(|s| self.is_selected(*s))
            .collect()
    }
}

/// Complement of an `--only` list: every step not named is skipped.
pub fn skip_all_except(only: &[StepId]) -> Vec<StepId> {
    StepId::all()
        .into_iter()
        .filter(|s| !only.contains(s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_selection_runs_everything_fatally() {
        let selection = StepSelection::from_config(&ProvisionConfig::default());
        assert_eq!(selection.selected_steps(), StepId::all());
        assert!(StepId::all().into_iter().all(|s| selection.is_fatal(s)));
    }

    #[test]
    fn test_disabled_reboot_is_skipped() {
        let mut config = ProvisionConfig::default();
        config.reboot.enabled = false;
        let selection = StepSelection::from_config(&config);
        assert!(!selection.is_selected(StepId::Reboot));
        assert_eq!(selection.selected_steps().last(), Some(&StepId::JavaHome));
    }

    #[test]
    fn test_best_effort_steps_are_not_fatal() {
        let config = ProvisionConfig {
            best_effort_steps: vec![StepId::TimeSync],
            ..Default::default()
        };
        let selection = StepSelection::from_config(&config);
        assert!(!selection.is_fatal(StepId::TimeSync));
        assert!(selection.is_fatal(StepId::Timezone));
    }

    #[test]
    fn test_skip_all_except() {
        let skip = skip_all_except(&[StepId::JavaHome, StepId::Numlock]);
        assert_eq!(skip.len(), StepId::all().len() - 2);
        assert!(!skip.contains(&StepId::JavaHome));
        assert!(skip.contains(&StepId::Reboot));
    }
}
