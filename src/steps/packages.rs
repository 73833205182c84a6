//! Package sets from optional third-party repositories, and the desktop.

use tracing::warn;

use super::{missing_packages, Applied, Step};
use crate::config_file::{DesktopConfig, PackageSetConfig};
use crate::error::Result;
use crate::host::Host;
use crate::types::{PackageManager, StepId};

/// Repository (if any) plus apt packages; backs `geospatial` and `remote-desktop`
pub struct PackageSetStep {
    id: StepId,
    config: PackageSetConfig,
}

impl PackageSetStep {
    pub fn new(id: StepId, config: PackageSetConfig) -> Self {
        Self { id, config }
    }

    fn repository_missing(&self, host: &dyn Host) -> Result<Option<&str>> {
        match self.config.repository.as_deref() {
            Some(repo) if !host.has_repository(repo)? => Ok(Some(repo)),
            _ => Ok(None),
        }
    }
}

impl Step for PackageSetStep {
    fn id(&self) -> StepId {
        self.id
    }

    fn check(&self, host: &dyn Host) -> Result<bool> {
        Ok(self.repository_missing(host)?.is_none()
            && missing_packages(host, PackageManager::Apt, &self.config.packages)?.is_empty())
    }

    fn apply(&self, host: &mut dyn Host) -> Result<Applied> {
        let mut applied = Applied::default();

        if let Some(repo) = self.repository_missing(host)? {
            host.add_repository(repo)?;
            applied.change(format!("added repository {}", repo));
        }

        let missing = missing_packages(host, PackageManager::Apt, &self.config.packages)?;
        if !missing.is_empty() || !applied.changes.is_empty() {
            host.refresh_package_index()?;
        }
        if !missing.is_empty() {
            host.install(PackageManager::Apt, &missing, false)?;
            applied.change(format!("installed {}", missing.join(", ")));
        }
        Ok(applied)
    }
}

/// Desktop packages, then a best-effort attempt to start the session
pub struct DesktopStep {
    config: DesktopConfig,
}

impl DesktopStep {
    pub fn new(config: DesktopConfig) -> Self {
        Self { config }
    }

    fn session_running(&self, host: &dyn Host) -> Result<bool> {
        host.is_process_running(&self.config.session_command)
    }
}

impl Step for DesktopStep {
    fn id(&self) -> StepId {
        StepId::Desktop
    }

    fn check(&self, host: &dyn Host) -> Result<bool> {
        if !missing_packages(host, PackageManager::Apt, &self.config.packages)?.is_empty() {
            return Ok(false);
        }
        if !self.config.start_session {
            return Ok(true);
        }
        self.session_running(host)
    }

    fn apply(&self, host: &mut dyn Host) -> Result<Applied> {
        let mut applied = Applied::default();

        let missing = missing_packages(host, PackageManager::Apt, &self.config.packages)?;
        if !missing.is_empty() {
            host.install(PackageManager::Apt, &missing, false)?;
            applied.change(format!("installed {}", missing.join(", ")));
        }

        if !self.config.start_session {
            return Ok(applied);
        }

        // Session start never fails the step
        match self.session_running(host) {
            Ok(true) => {}
            Ok(false) => match host.spawn_detached(&self.config.session_command) {
                Ok(()) if self.session_running(host).unwrap_or(false) => {
                    applied.change(format!("started {}", self.config.session_command))
                }
                Ok(()) => {
                    warn!(command = %self.config.session_command, "desktop session exited after starting");
                    applied.warn(format!(
                        "`{}` is not running after being started",
                        self.config.session_command
                    ));
                }
                Err(e) => {
                    warn!(command = %self.config.session_command, error = %e, "desktop session did not start");
                    applied.warn(format!(
                        "could not start `{}`: {}",
                        self.config.session_command, e
                    ));
                }
            },
            Err(e) => {
                warn!(error = %e, "could not probe for a running desktop session");
                applied.warn(format!("could not check for a running session: {}", e));
            }
        }
        Ok(applied)
    }
}
