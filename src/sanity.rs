//! Pre-flight sanity checks for runtime environment
//!
//! Before a real run touches the host, verify:
//! - Running with root privileges (EUID 0)
//! - The programs `SystemHost` shells out to are on PATH
//!
//! If any check fails, the program exits with code 2 and a message that
//! says how to fix it. Dry runs skip these checks.

use std::env;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Exit code for a failed pre-flight check
pub const PREFLIGHT_EXIT_CODE: i32 = 2;

/// Result of environment verification
#[derive(Debug)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
    pub missing_optional: Vec<String>,
    pub is_root: bool,
}

impl SanityCheckResult {
    /// Returns true if all required checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && self.is_root
    }
}

/// Required runtime binaries for provisioning
const REQUIRED_BINARIES: &[&str] = &[
    "apt-get",     // package installation
    "dpkg-query",  // installed-package probes
    "timedatectl", // timezone
    "git",         // identity
    "pip3",        // deep-learning library
    "ldconfig",    // linker cache after cuDNN
    "systemctl",   // service restart, reboot
];

/// Optional binaries (warn if missing but don't fail)
const OPTIONAL_BINARIES: &[&str] = &[
    "add-apt-repository", // only needed when a repository is not registered yet
    "pgrep",              // desktop session detection
];

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Search `search_path` (a PATH-style list) for an executable `name`
fn find_in_path(name: &str, search_path: &str) -> Option<PathBuf> {
    env::split_paths(search_path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// Check if a binary is available in PATH
fn binary_exists(name: &str) -> bool {
    let path = env::var("PATH").unwrap_or_default();
    find_in_path(name, &path).is_some()
}

/// Check if running as root (EUID 0)
fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Perform all sanity checks and return the result
pub fn verify_environment() -> SanityCheckResult {
    let missing = REQUIRED_BINARIES
        .iter()
        .filter(|b| !binary_exists(b))
        .map(|b| (*b).to_string())
        .collect();

    let missing_optional = OPTIONAL_BINARIES
        .iter()
        .filter(|b| !binary_exists(b))
        .map(|b| (*b).to_string())
        .collect();

    SanityCheckResult {
        missing_binaries: missing,
        missing_optional,
        is_root: is_running_as_root(),
    }
}

/// Map binary names to the Ubuntu packages that provide them
fn get_package_for_binary(binary: &str) -> &'static str {
    match binary {
        "apt-get" => "apt",
        "dpkg-query" => "dpkg",
        "timedatectl" | "systemctl" => "systemd",
        "git" => "git",
        "pip3" => "python3-pip",
        "ldconfig" => "libc-bin",
        "add-apt-repository" => "software-properties-common",
        "pgrep" => "procps",
        _ => "unknown",
    }
}

/// Distinct packages providing the given binaries, sorted
fn packages_for(binaries: &[String]) -> Vec<&'static str> {
    let mut packages: Vec<&str> = binaries.iter().map(|b| get_package_for_binary(b)).collect();
    packages.sort_unstable();
    packages.dedup();
    packages
}

/// Print a pretty error message to stderr and exit with code 2
pub fn print_error_and_exit(result: &SanityCheckResult) -> ! {
    eprintln!();
    eprintln!("╔══════════════════════════════════════════════════════════════════╗");
    eprintln!("║                devstation - Pre-flight Check Failed              ║");
    eprintln!("╚══════════════════════════════════════════════════════════════════╝");
    eprintln!();

    if !result.is_root {
        eprintln!("❌ ERROR: Root privileges required");
        eprintln!("   Provisioning installs packages and edits files under /etc.");
        eprintln!();
        eprintln!("   Solution: Run with sudo:");
        eprintln!("     sudo devstation run");
        eprintln!();
    }

    if !result.missing_binaries.is_empty() {
        eprintln!("❌ ERROR: Missing required binaries");
        eprintln!();
        for binary in &result.missing_binaries {
            eprintln!("   • {} (package: {})", binary, get_package_for_binary(binary));
        }
        eprintln!();
        eprintln!("   Solution: Install missing packages:");
        eprintln!(
            "     apt-get install {}",
            packages_for(&result.missing_binaries).join(" ")
        );
        eprintln!();
    }

    std::process::exit(PREFLIGHT_EXIT_CODE);
}

/// Skip root check (for development/testing)
/// Set DEVSTATION_SKIP_ROOT_CHECK=1 to skip
pub fn should_skip_root_check() -> bool {
    env::var("DEVSTATION_SKIP_ROOT_CHECK")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Verify the environment and exit if checks fail
pub fn run_preflight_checks() {
    debug!("Running pre-flight sanity checks...");

    let mut result = verify_environment();

    if should_skip_root_check() {
        warn!("Root check skipped (DEVSTATION_SKIP_ROOT_CHECK=1)");
        result.is_root = true;
    }

    for binary in &result.missing_optional {
        warn!(
            binary,
            package = get_package_for_binary(binary),
            "optional binary not found"
        );
    }

    if !result.is_ok() {
        print_error_and_exit(&result);
    }

    info!("Pre-flight checks passed");
}
