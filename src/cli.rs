use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::types::{PolicyPreset, StepId};

/// devstation - idempotent workstation provisioning
#[derive(Parser, Debug)]
#[command(name = "devstation")]
#[command(about = "Provision a GPU/geospatial development workstation, safely re-runnable")]
#[command(version)]
pub struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the provisioning sequence
    Run(RunArgs),
    /// Show the ordered steps and how each will be treated
    Plan {
        /// Configuration file (defaults are used when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        config: PathBuf,
    },
    /// Write the default configuration as JSON
    InitConfig {
        /// Destination file
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Configuration file (defaults are used when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Only run the read-only checks and report what would change.
    ///
    /// Nothing is installed, written or restarted, and pre-flight checks
    /// are skipped.
    #[arg(long)]
    pub dry_run: bool,

    /// Failure policy preset; `legacy` makes time-sync and timezone best-effort
    #[arg(long, value_parser = clap::builder::PossibleValuesParser::new(["strict", "legacy"]))]
    pub policy: Option<String>,

    /// Do not reboot at the end
    #[arg(long)]
    pub no_reboot: bool,

    /// Run only these steps (repeatable)
    #[arg(long, value_name = "STEP", conflicts_with = "skip")]
    pub only: Vec<String>,

    /// Skip these steps (repeatable)
    #[arg(long, value_name = "STEP")]
    pub skip: Vec<String>,
}

impl RunArgs {
    pub fn policy_preset(&self) -> Result<Option<PolicyPreset>, String> {
        self.policy
            .as_deref()
            .map(|p| p.parse::<PolicyPreset>().map_err(|_| format!("Unknown policy: {}", p)))
            .transpose()
    }

    pub fn only_steps(&self) -> Result<Vec<StepId>, String> {
        parse_steps(&self.only)
    }

    pub fn skip_steps(&self) -> Result<Vec<StepId>, String> {
        parse_steps(&self.skip)
    }
}

/// Parse kebab-case step names, listing valid names on error
pub fn parse_steps(names: &[String]) -> Result<Vec<StepId>, String> {
    names
        .iter()
        .map(|name| {
            name.parse::<StepId>().map_err(|_| {
                let valid: Vec<String> = StepId::all().iter().map(|s| s.to_string()).collect();
                format!("Unknown step '{}'. Valid steps: {}", name, valid.join(", "))
            })
        })
        .collect()
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("devstation").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_run_flags() {
        let cli = parse(&["run", "--dry-run", "--policy", "legacy", "--no-reboot", "--skip", "ide"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.dry_run);
        assert!(args.no_reboot);
        assert_eq!(args.policy_preset().unwrap(), Some(PolicyPreset::Legacy));
        assert_eq!(args.skip_steps().unwrap(), vec![StepId::Ide]);
        assert!(args.only_steps().unwrap().is_empty());
    }

    #[test]
    fn test_only_and_skip_conflict() {
        let result = Cli::try_parse_from(["devstation", "run", "--only", "ide", "--skip", "reboot"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_policy_rejected_by_parser() {
        assert!(Cli::try_parse_from(["devstation", "run", "--policy", "lenient"]).is_err());
    }

    #[test]
    fn test_parse_steps_lists_valid_names() {
        let err = parse_steps(&["gpu".to_string()]).unwrap_err();
        assert!(err.contains("gpu-ml"));
        assert_eq!(
            parse_steps(&["timezone-reapply".to_string(), "java-home".to_string()]).unwrap(),
            vec![StepId::TimezoneReapply, StepId::JavaHome]
        );
    }

    #[test]
    fn test_global_verbose_and_subcommands() {
        let cli = parse(&["validate", "devstation.json", "--verbose"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Validate { .. }));

        let cli = parse(&["init-config", "out.json", "--force"]);
        assert!(matches!(cli.command, Commands::InitConfig { force: true, .. }));

        let cli = parse(&["plan"]);
        assert!(matches!(cli.command, Commands::Plan { config: None }));
    }
}
