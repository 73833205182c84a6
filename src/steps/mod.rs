//! The twelve provisioning steps.
//!
//! Each step is a check (is the host already in the desired state?) plus an
//! apply action that brings it there. Checks never mutate; applies only
//! change what the check found missing, so running a step twice is safe.
//!
//! - `system`: time sync, timezone, numlock, JAVA_HOME, reboot
//! - `packages`: repository-backed package sets and the desktop
//! - `gpu_ml`: deep-learning library and the cuDNN runtime
//! - `user`: per-user git identity and the IDE

pub mod gpu_ml;
pub mod packages;
pub mod system;
pub mod user;

use crate::config_file::ProvisionConfig;
use crate::error::Result;
use crate::host::Host;
use crate::types::{PackageManager, StepId};

/// What an apply changed, plus problems that did not fail the step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    pub changes: Vec<String>,
    pub warnings: Vec<String>,
}

impl Applied {
    pub fn change(&mut self, message: impl Into<String>) {
        self.changes.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

pub trait Step {
    fn id(&self) -> StepId;

    /// Whether the host already satisfies this step
    fn check(&self, host: &dyn Host) -> Result<bool>;

    fn apply(&self, host: &mut dyn Host) -> Result<Applied>;
}

/// All steps in execution order
pub fn build_steps(config: &ProvisionConfig) -> Vec<Box<dyn Step>> {
    StepId::all()
        .into_iter()
        .map(|id| build_step(id, config))
        .collect()
}

fn build_step(id: StepId, config: &ProvisionConfig) -> Box<dyn Step> {
    match id {
        StepId::TimeSync => Box::new(system::TimeSyncStep::new(config.time_sync.clone())),
        StepId::Timezone | StepId::TimezoneReapply => {
            Box::new(system::TimezoneStep::new(id, config.timezone.clone()))
        }
        StepId::GitIdentity => Box::new(user::GitIdentityStep::new(
            config.gitconfig_path(),
            config.git_identity.clone(),
            config.target_user.clone(),
        )),
        StepId::Geospatial => Box::new(packages::PackageSetStep::new(id, config.geospatial.clone())),
        StepId::GpuMl => Box::new(gpu_ml::GpuMlStep::new(config.gpu_ml.clone())),
        StepId::Desktop => Box::new(packages::DesktopStep::new(config.desktop.clone())),
        StepId::RemoteDesktop => {
            Box::new(packages::PackageSetStep::new(id, config.remote_desktop.clone()))
        }
        StepId::Ide => Box::new(user::IdeStep::new(
            config.home(),
            config.ide.clone(),
            config.target_user.clone(),
        )),
        StepId::Numlock => Box::new(system::NumlockStep::new(config.numlock.clone())),
        StepId::JavaHome => Box::new(system::JavaHomeStep::new(config.java_home.clone())),
        StepId::Reboot => Box::new(system::RebootStep),
    }
}

/// Packages from `packages` that are not installed yet
pub(crate) fn missing_packages(
    host: &dyn Host,
    manager: PackageManager,
    packages: &[String],
) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for package in packages {
        if !host.is_installed(manager, package)? {
            missing.push(package.clone());
        }
    }
    Ok(missing)
}
