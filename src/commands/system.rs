//! Type-safe arguments for system configuration commands.
//!
//! - `TimezoneArgs` for `timedatectl`
//! - `GitConfigArgs` for `git config --file`
//! - `SystemctlArgs` for service restarts and reboot
//! - `LdconfigArgs` for the dynamic linker cache
//! - `PgrepArgs` for session detection

use std::path::PathBuf;

use crate::command_traits::CommandArgs;

// ============================================================================
// timedatectl
// ============================================================================

#[derive(Debug, Clone)]
pub enum TimezoneArgs {
    /// `timedatectl show -p Timezone --value`
    Show,
    /// `timedatectl set-timezone <zone>`
    Set(String),
}

impl CommandArgs for TimezoneArgs {
    fn program(&self) -> &'static str {
        "timedatectl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        match self {
            Self::Show => vec![
                "show".to_string(),
                "--property=Timezone".to_string(),
                "--value".to_string(),
            ],
            Self::Set(zone) => vec!["set-timezone".to_string(), zone.clone()],
        }
    }
}

// ============================================================================
// git config
// ============================================================================

/// Reads or writes one key of a specific git config file.
///
/// Using `--file` instead of `--global` targets the provisioned user's
/// `~/.gitconfig` while running as root.
#[derive(Debug, Clone)]
pub struct GitConfigArgs {
    pub file: PathBuf,
    pub key: String,
    /// `None` reads the key, `Some` writes it
    pub value: Option<String>,
}

impl CommandArgs for GitConfigArgs {
    fn program(&self) -> &'static str {
        "git"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "config".to_string(),
            "--file".to_string(),
            self.file.display().to_string(),
        ];
        match &self.value {
            Some(value) => {
                args.push(self.key.clone());
                args.push(value.clone());
            }
            None => {
                args.push("--get".to_string());
                args.push(self.key.clone());
            }
        }
        args
    }
}

// ============================================================================
// systemctl
// ============================================================================

#[derive(Debug, Clone)]
pub enum SystemctlArgs {
    Restart(String),
    Reboot,
}

impl CommandArgs for SystemctlArgs {
    fn program(&self) -> &'static str {
        "systemctl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        match self {
            Self::Restart(unit) => vec!["restart".to_string(), unit.clone()],
            Self::Reboot => vec!["reboot".to_string()],
        }
    }
}

// ============================================================================
// ldconfig
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct LdconfigArgs;

impl CommandArgs for LdconfigArgs {
    fn program(&self) -> &'static str {
        "ldconfig"
    }

    fn to_cli_args(&self) -> Vec<String> {
        Vec::new()
    }
}

// ============================================================================
// pgrep
// ============================================================================

/// Matches against full command lines, since session launchers are scripts.
#[derive(Debug, Clone)]
pub struct PgrepArgs {
    pub pattern: String,
}

impl CommandArgs for PgrepArgs {
    fn program(&self) -> &'static str {
        "pgrep"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-f".to_string(), self.pattern.clone()]
    }
}
