//! Type-safe arguments for package management commands.
//!
//! - `AptInstallArgs` for `apt-get install`
//! - `AptUpdateArgs` for `apt-get update`
//! - `AddRepositoryArgs` for `add-apt-repository`
//! - `DpkgQueryArgs` for `dpkg-query -W`
//! - `PipInstallArgs` / `PipShowArgs` for `pip3`

use crate::command_traits::CommandArgs;

fn noninteractive() -> Vec<(String, String)> {
    vec![("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string())]
}

// ============================================================================
// apt-get install
// ============================================================================

#[derive(Debug, Clone)]
pub struct AptInstallArgs {
    pub packages: Vec<String>,
}

impl CommandArgs for AptInstallArgs {
    fn program(&self) -> &'static str {
        "apt-get"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["install".to_string(), "-y".to_string(), "--".to_string()];
        args.extend(self.packages.iter().cloned());
        args
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        noninteractive()
    }
}

// ============================================================================
// apt-get update
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AptUpdateArgs;

impl CommandArgs for AptUpdateArgs {
    fn program(&self) -> &'static str {
        "apt-get"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["update".to_string()]
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        noninteractive()
    }
}

// ============================================================================
// add-apt-repository
// ============================================================================

/// Adds a repository without refreshing indices; the caller refreshes once
/// after all repositories of a step are in place.
#[derive(Debug, Clone)]
pub struct AddRepositoryArgs {
    pub repository: String,
}

impl CommandArgs for AddRepositoryArgs {
    fn program(&self) -> &'static str {
        "add-apt-repository"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--yes".to_string(),
            "--no-update".to_string(),
            self.repository.clone(),
        ]
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        noninteractive()
    }
}

// ============================================================================
// dpkg-query
// ============================================================================

#[derive(Debug, Clone)]
pub struct DpkgQueryArgs {
    pub package: String,
}

impl DpkgQueryArgs {
    /// dpkg reports a fully installed package as "install ok installed"
    pub fn is_installed_status(stdout: &str) -> bool {
        stdout.trim() == "install ok installed"
    }
}

impl CommandArgs for DpkgQueryArgs {
    fn program(&self) -> &'static str {
        "dpkg-query"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-W".to_string(),
            "--showformat=${Status}".to_string(),
            self.package.clone(),
        ]
    }
}

// ============================================================================
// pip3
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipInstallArgs {
    pub packages: Vec<String>,
    pub upgrade: bool,
}

impl CommandArgs for PipInstallArgs {
    fn program(&self) -> &'static str {
        "pip3"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["install".to_string()];
        if self.upgrade {
            args.push("--upgrade".to_string());
        }
        args.extend(self.packages.iter().cloned());
        args
    }
}

#[derive(Debug, Clone)]
pub struct PipShowArgs {
    pub package: String,
}

impl CommandArgs for PipShowArgs {
    fn program(&self) -> &'static str {
        "pip3"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["show".to_string(), "--quiet".to_string(), self.package.clone()]
    }
}
