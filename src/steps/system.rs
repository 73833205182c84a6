//! System-wide settings: time sync, timezone, numlock, JAVA_HOME, reboot.

use std::path::Path;
use tracing::debug;

use super::{Applied, Step};
use crate::config_file::{JavaHomeConfig, NumlockConfig, TimeSyncConfig};
use crate::error::Result;
use crate::host::Host;
use crate::logic::text;
use crate::types::{PackageManager, StepId};

fn read_or_empty(host: &dyn Host, path: &Path) -> Result<String> {
    Ok(host.read_file(path)?.unwrap_or_default())
}

// ============================================================================
// time-sync
// ============================================================================

pub struct TimeSyncStep {
    config: TimeSyncConfig,
}

impl TimeSyncStep {
    pub fn new(config: TimeSyncConfig) -> Self {
        Self { config }
    }
}

impl Step for TimeSyncStep {
    fn id(&self) -> StepId {
        StepId::TimeSync
    }

    fn check(&self, host: &dyn Host) -> Result<bool> {
        if !host.is_installed(PackageManager::Apt, &self.config.package)? {
            return Ok(false);
        }
        let contents = read_or_empty(host, &self.config.config_path)?;
        Ok(text::count_line(&contents, &self.config.server_directive) == 1)
    }

    fn apply(&self, host: &mut dyn Host) -> Result<Applied> {
        let mut applied = Applied::default();

        if !host.is_installed(PackageManager::Apt, &self.config.package)? {
            host.install(PackageManager::Apt, &[self.config.package.clone()], false)?;
            applied.change(format!("installed {}", self.config.package));
        }

        // Read after install: the package ships its own config file
        let contents = read_or_empty(host, &self.config.config_path)?;
        if let Some(updated) = text::ensure_line(&contents, &self.config.server_directive) {
            host.write_file(&self.config.config_path, &updated)?;
            applied.change(format!(
                "ensured `{}` in {}",
                self.config.server_directive,
                self.config.config_path.display()
            ));
        }

        if !applied.changes.is_empty() {
            host.restart_service(&self.config.service)?;
            applied.change(format!("restarted {}", self.config.service));
        }
        Ok(applied)
    }
}

// ============================================================================
// timezone / timezone-reapply
// ============================================================================

/// Sets the system timezone; used for both the early and the re-apply step
pub struct TimezoneStep {
    id: StepId,
    zone: String,
}

impl TimezoneStep {
    pub fn new(id: StepId, zone: String) -> Self {
        Self { id, zone }
    }
}

impl Step for TimezoneStep {
    fn id(&self) -> StepId {
        self.id
    }

    fn check(&self, host: &dyn Host) -> Result<bool> {
        Ok(host.timezone()?.as_deref() == Some(self.zone.as_str()))
    }

    fn apply(&self, host: &mut dyn Host) -> Result<Applied> {
        let previous = host.timezone()?;
        host.set_timezone(&self.zone)?;

        let mut applied = Applied::default();
        match previous {
            Some(old) => applied.change(format!("timezone {} -> {}", old, self.zone)),
            None => applied.change(format!("timezone set to {}", self.zone)),
        }
        Ok(applied)
    }
}

// ============================================================================
// numlock
// ============================================================================

pub struct NumlockStep {
    config: NumlockConfig,
}

impl NumlockStep {
    pub fn new(config: NumlockConfig) -> Self {
        Self { config }
    }
}

impl Step for NumlockStep {
    fn id(&self) -> StepId {
        StepId::Numlock
    }

    fn check(&self, host: &dyn Host) -> Result<bool> {
        let c = &self.config;
        if !host.is_installed(PackageManager::Apt, &c.package)? {
            return Ok(false);
        }
        let rc_local = read_or_empty(host, &c.rc_local)?;
        let xinitrc = read_or_empty(host, &c.xinitrc)?;
        Ok(text::ensure_before_exit(&rc_local, &c.rc_local_line).is_none()
            && text::ensure_line(&xinitrc, &c.xinitrc_line).is_none())
    }

    fn apply(&self, host: &mut dyn Host) -> Result<Applied> {
        let c = &self.config;
        let mut applied = Applied::default();

        if !host.is_installed(PackageManager::Apt, &c.package)? {
            host.install(PackageManager::Apt, &[c.package.clone()], false)?;
            applied.change(format!("installed {}", c.package));
        }

        let rc_local = host.read_file(&c.rc_local)?;
        let created = rc_local.is_none();
        let rc_local = rc_local.unwrap_or_default();
        if let Some(updated) = text::ensure_before_exit(&rc_local, &c.rc_local_line) {
            host.write_file(&c.rc_local, &updated)?;
            if created {
                host.make_executable(&c.rc_local)?;
            }
            applied.change(format!("enabled numlock in {}", c.rc_local.display()));
        }

        let xinitrc = read_or_empty(host, &c.xinitrc)?;
        if let Some(updated) = text::ensure_line(&xinitrc, &c.xinitrc_line) {
            host.write_file(&c.xinitrc, &updated)?;
            applied.change(format!("enabled numlock in {}", c.xinitrc.display()));
        }

        Ok(applied)
    }
}

// ============================================================================
// java-home
// ============================================================================

const JAVA_HOME: &str = "JAVA_HOME";

pub struct JavaHomeStep {
    config: JavaHomeConfig,
}

impl JavaHomeStep {
    pub fn new(config: JavaHomeConfig) -> Self {
        Self { config }
    }
}

impl Step for JavaHomeStep {
    fn id(&self) -> StepId {
        StepId::JavaHome
    }

    fn check(&self, host: &dyn Host) -> Result<bool> {
        let contents = read_or_empty(host, &self.config.environment_file)?;
        Ok(text::set_assignment(&contents, JAVA_HOME, self.config.value.trim()).is_none())
    }

    fn apply(&self, host: &mut dyn Host) -> Result<Applied> {
        let path = &self.config.environment_file;
        let contents = read_or_empty(host, path)?;
        let existing = text::count_assignments(&contents, JAVA_HOME);

        let mut applied = Applied::default();
        if let Some(updated) = text::set_assignment(&contents, JAVA_HOME, self.config.value.trim()) {
            host.write_file(path, &updated)?;
            if existing > 1 {
                applied.change(format!(
                    "collapsed {} JAVA_HOME definitions in {}",
                    existing,
                    path.display()
                ));
            } else {
                applied.change(format!("JAVA_HOME set in {}", path.display()));
            }
        }
        Ok(applied)
    }
}

// ============================================================================
// reboot
// ============================================================================

/// Never satisfied: a run that gets this far always reboots
pub struct RebootStep;

impl Step for RebootStep {
    fn id(&self) -> StepId {
        StepId::Reboot
    }

    fn check(&self, _host: &dyn Host) -> Result<bool> {
        Ok(false)
    }

    fn apply(&self, host: &mut dyn Host) -> Result<Applied> {
        debug!("reboot requested");
        host.reboot()?;
        let mut applied = Applied::default();
        applied.change("reboot initiated");
        Ok(applied)
    }
}
