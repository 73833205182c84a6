//! Type-safe identifiers for devstation
//!
//! Steps, package managers and failure-policy presets are proper enums with
//! strum-derived string forms, so config files and CLI flags are validated
//! at parse time instead of being matched as raw strings.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// One provisioning step, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
#[repr(u8)]
pub enum StepId {
    /// Time daemon package, server directive, service restart
    TimeSync = 0,
    Timezone = 1,
    /// Version-control identity (name + email)
    GitIdentity = 2,
    /// Geospatial repository and toolchain packages
    Geospatial = 3,
    /// Deep-learning library plus cuDNN runtime
    GpuMl = 4,
    Desktop = 5,
    RemoteDesktop = 6,
    Ide = 7,
    /// Second timezone application; normally already satisfied
    TimezoneReapply = 8,
    Numlock = 9,
    JavaHome = 10,
    /// Always last; nothing is reachable after it
    Reboot = 11,
}

impl StepId {
    /// Zero-based position in the sequence
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    pub const fn next(self) -> Option<Self> {
        match self {
            Self::TimeSync => Some(Self::Timezone),
            Self::Timezone => Some(Self::GitIdentity),
            Self::GitIdentity => Some(Self::Geospatial),
            Self::Geospatial => Some(Self::GpuMl),
            Self::GpuMl => Some(Self::Desktop),
            Self::Desktop => Some(Self::RemoteDesktop),
            Self::RemoteDesktop => Some(Self::Ide),
            Self::Ide => Some(Self::TimezoneReapply),
            Self::TimezoneReapply => Some(Self::Numlock),
            Self::Numlock => Some(Self::JavaHome),
            Self::JavaHome => Some(Self::Reboot),
            Self::Reboot => None,
        }
    }

    pub const fn first() -> Self {
        Self::TimeSync
    }

    pub const fn last() -> Self {
        Self::Reboot
    }

    /// Human-readable description used in plans and reports
    pub const fn description(self) -> &'static str {
        match self {
            Self::TimeSync => "Install time daemon and configure its server",
            Self::Timezone => "Set system timezone",
            Self::GitIdentity => "Configure git identity",
            Self::Geospatial => "Install geospatial toolchain",
            Self::GpuMl => "Install deep-learning library and cuDNN runtime",
            Self::Desktop => "Install desktop environment",
            Self::RemoteDesktop => "Install remote-desktop server",
            Self::Ide => "Download and unpack IDE",
            Self::TimezoneReapply => "Re-apply system timezone",
            Self::Numlock => "Enable numlock at boot and in X sessions",
            Self::JavaHome => "Define JAVA_HOME system-wide",
            Self::Reboot => "Reboot host",
        }
    }

    /// All steps in execution order
    pub fn all() -> Vec<Self> {
        Self::iter().collect()
    }
}

/// Package manager a package is installed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Pip,
}

/// Named failure-policy presets selectable from the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PolicyPreset {
    /// Every step is fatal on failure
    #[default]
    Strict,
    /// Time sync and timezone are best-effort, everything after them is fatal
    Legacy,
}

impl PolicyPreset {
    /// Steps whose failure is reported but does not stop the run
    pub fn best_effort_steps(self) -> Vec<StepId> {
        match self {
            Self::Strict => Vec::new(),
            Self::Legacy => vec![StepId::TimeSync, StepId::Timezone],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order_is_sequential() {
        for (i, step) in StepId::iter().enumerate() {
            assert_eq!(step.order() as usize, i, "{:?} should have order {}", step, i);
        }
    }

    #[test]
    fn test_step_next_forms_chain() {
        let mut current = StepId::first();
        let mut count = 0;
        while let Some(next) = current.next() {
            assert_eq!(next.order(), current.order() + 1);
            current = next;
            count += 1;
            assert!(count < 20, "Infinite loop detected in step chain");
        }
        assert_eq!(current, StepId::last());
        assert_eq!(count, 11);
    }

    #[test]
    fn test_reboot_is_last() {
        assert_eq!(StepId::all().last(), Some(&StepId::Reboot));
        assert_eq!(StepId::Reboot.next(), None);
    }

    #[test]
    fn test_step_string_forms() {
        assert_eq!(StepId::GpuMl.to_string(), "gpu-ml");
        assert_eq!("timezone-reapply".parse::<StepId>().unwrap(), StepId::TimezoneReapply);
        assert!("format-disk".parse::<StepId>().is_err());
    }

    #[test]
    fn test_step_serde_matches_display() {
        let json = serde_json::to_string(&StepId::RemoteDesktop).unwrap();
        assert_eq!(json, "\"remote-desktop\"");
    }

    #[test]
    fn test_legacy_preset_covers_unchecked_prefix() {
        assert!(PolicyPreset::Strict.best_effort_steps().is_empty());
        assert_eq!(
            PolicyPreset::Legacy.best_effort_steps(),
            vec![StepId::TimeSync, StepId::Timezone]
        );
    }

    #[test]
    fn test_package_manager_parse() {
        assert_eq!("apt".parse::<PackageManager>().unwrap(), PackageManager::Apt);
        assert_eq!(PackageManager::Pip.to_string(), "pip");
    }
}
