//! Type-safe external command contracts.
//!
//! Every program devstation invokes (`apt-get`, `pip3`, `timedatectl`, …)
//! is described by a struct implementing `CommandArgs`, so argument order
//! and flags are fixed in one place instead of being assembled from raw
//! string vectors at call sites.

/// Trait for typed command arguments.
///
/// # Contract
///
/// - `program()`: executable name, resolved through `PATH` at spawn time.
/// - `to_cli_args()`: arguments exactly as the program expects them.
/// - `get_env_vars()`: extra environment for the child (e.g. `DEBIAN_FRONTEND`).
///
/// # Example
///
/// ```
/// use devstation::command_traits::CommandArgs;
/// use devstation::commands::packages::AptInstallArgs;
///
/// let args = AptInstallArgs { packages: vec!["chrony".to_string()] };
/// assert_eq!(args.program(), "apt-get");
/// assert_eq!(args.to_cli_args(), vec!["install", "-y", "--", "chrony"]);
/// ```
pub trait CommandArgs {
    /// Executable name.
    fn program(&self) -> &'static str;

    /// Convert struct fields to CLI arguments.
    fn to_cli_args(&self) -> Vec<String>;

    /// Environment variables the command requires.
    fn get_env_vars(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Command line rendered for logs
    fn display(&self) -> String {
        let mut parts = vec![self.program().to_string()];
        parts.extend(self.to_cli_args());
        parts.join(" ")
    }
}
