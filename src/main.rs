//! devstation - Main entry point
//!
//! Parses the CLI, loads and validates the configuration once, runs the
//! pre-flight checks and hands a `SystemHost` to the sequencer.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use devstation::cli::{Cli, Commands, RunArgs};
use devstation::config_file::ProvisionConfig;
use devstation::host::SystemHost;
use devstation::host::system::lookup_home_dir;
use devstation::logic::selection::{StepSelection, skip_all_except};
use devstation::process_guard::{self, ProcessGuard};
use devstation::report;
use devstation::sanity;
use devstation::sequencer::Sequencer;

/// Exit code for configuration errors and fatal step failures
const FAILURE_EXIT_CODE: i32 = 1;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<ProvisionConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            ProvisionConfig::load_from_file(path)
        }
        None => {
            debug!("No configuration file given, using defaults");
            Ok(ProvisionConfig::default())
        }
    }
}

/// Apply CLI overrides on top of the file configuration
fn apply_run_overrides(config: &mut ProvisionConfig, args: &RunArgs) -> Result<()> {
    if let Some(preset) = args.policy_preset().map_err(anyhow::Error::msg)? {
        info!(policy = %preset, "Using failure policy preset");
        config.best_effort_steps = preset.best_effort_steps();
    }
    if args.no_reboot {
        config.reboot.enabled = false;
    }

    let only = args.only_steps().map_err(anyhow::Error::msg)?;
    if !only.is_empty() {
        config.skip_steps = skip_all_except(&only);
    }
    for step in args.skip_steps().map_err(anyhow::Error::msg)? {
        if !config.skip_steps.contains(&step) {
            config.skip_steps.push(step);
        }
    }
    Ok(())
}

fn run(args: &RunArgs) -> Result<i32> {
    let mut config = load_config(args.config.as_deref())?;
    apply_run_overrides(&mut config, args)?;

    let sudo_user = std::env::var("SUDO_USER").ok();
    let fallback_home = std::env::var_os("HOME").map(PathBuf::from);
    config
        .resolve_target_user(sudo_user.as_deref(), fallback_home, lookup_home_dir)
        .context("Failed to resolve the target user")?;
    config.validate().context("Configuration is invalid")?;

    if args.dry_run {
        info!("Dry run: only read-only checks will execute");
    } else {
        sanity::run_preflight_checks();
    }

    let _guard = ProcessGuard::new();
    let mut host = SystemHost::new();

    println!(
        "Provisioning as {} (home {})",
        config.target_user.as_deref().unwrap_or("root"),
        config.home().display()
    );

    let run_report = Sequencer::new(&config, &mut host)
        .dry_run(args.dry_run)
        .run_with(|step| println!("{}", report::render_step(step)))?;

    println!();
    println!("{}", report::render_summary(&run_report));
    Ok(run_report.exit_code())
}

fn plan(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate().context("Configuration is invalid")?;
    print!("{}", report::render_plan(&StepSelection::from_config(&config)));
    Ok(())
}

fn validate(config_path: &Path) -> Result<()> {
    let config = ProvisionConfig::load_from_file(config_path)?;
    config.validate()?;
    info!("Configuration validation successful");
    println!("✓ Configuration file is valid: {}", config_path.display());
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    ProvisionConfig::default().save_to_file(path)?;
    println!("✓ Wrote default configuration to {}", path.display());
    Ok(())
}

fn main() {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    let result = match &cli.command {
        Commands::Run(args) => run(args),
        Commands::Plan { config } => plan(config.as_deref()).map(|_| 0),
        Commands::Validate { config } => validate(config).map(|_| 0),
        Commands::InitConfig { path, force } => init_config(path, *force).map(|_| 0),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            std::process::exit(FAILURE_EXIT_CODE);
        }
    }
}
