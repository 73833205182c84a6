//! The machine being provisioned.
//!
//! Every step talks to the host only through the `Host` trait, so each one
//! can inspect current state before deciding to mutate it. Queries take
//! `&self`; anything that changes the machine takes `&mut self`.
//!
//! - `SystemHost`: the real machine, via typed external commands and the
//!   filesystem
//! - `MemoryHost`: an in-memory model with an action journal and failure
//!   injection

pub mod memory;
pub mod system;

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::PackageManager;

pub use memory::{HostState, MemoryHost};
pub use system::SystemHost;

pub trait Host {
    // ---- packages ----------------------------------------------------------

    fn is_installed(&self, manager: PackageManager, package: &str) -> Result<bool>;

    /// Install packages; with `upgrade`, already installed ones are upgraded
    fn install(&mut self, manager: PackageManager, packages: &[String], upgrade: bool)
    -> Result<()>;

    fn has_repository(&self, repository: &str) -> Result<bool>;

    /// Register a repository without refreshing package indices
    fn add_repository(&mut self, repository: &str) -> Result<()>;

    fn refresh_package_index(&mut self) -> Result<()>;

    // ---- files -------------------------------------------------------------

    /// File contents, or `None` when the file does not exist
    fn read_file(&self, path: &Path) -> Result<Option<String>>;

    /// Replace a file's contents, creating parent directories as needed.
    /// An existing file keeps its permissions.
    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()>;

    fn exists(&self, path: &Path) -> bool;

    /// Regular files directly inside `dir`; empty when `dir` is missing
    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Copy a file, creating the destination's parent directory
    fn copy_file(&mut self, from: &Path, to: &Path) -> Result<()>;

    fn rename(&mut self, from: &Path, to: &Path) -> Result<()>;

    fn remove_file(&mut self, path: &Path) -> Result<()>;

    /// Remove a directory tree; a missing directory is not an error
    fn remove_dir_all(&mut self, path: &Path) -> Result<()>;

    /// Create a new, uniquely named directory inside `parent` (created if
    /// missing) and return its path. Only this directory is ever removed by
    /// the caller, never `parent`.
    fn create_staging_dir(&mut self, parent: &Path, prefix: &str) -> Result<PathBuf>;

    fn is_world_readable(&self, path: &Path) -> Result<bool>;

    fn make_world_readable(&mut self, path: &Path) -> Result<()>;

    /// Add execute permission for owner, group and others
    fn make_executable(&mut self, path: &Path) -> Result<()>;

    /// Hand a path (recursively for directories) to `user` and their primary group
    fn chown_user(&mut self, path: &Path, user: &str) -> Result<()>;

    // ---- system settings ---------------------------------------------------

    /// Currently configured timezone, if one is set
    fn timezone(&self) -> Result<Option<String>>;

    fn set_timezone(&mut self, zone: &str) -> Result<()>;

    /// Value of `key` in a git config file, if set
    fn git_config(&self, file: &Path, key: &str) -> Result<Option<String>>;

    fn set_git_config(&mut self, file: &Path, key: &str, value: &str) -> Result<()>;

    // ---- processes ---------------------------------------------------------

    fn restart_service(&mut self, service: &str) -> Result<()>;

    /// Whether any process's command line matches `pattern`
    fn is_process_running(&self, pattern: &str) -> Result<bool>;

    /// Start a long-lived command that outlives devstation.
    ///
    /// A command that exits unsuccessfully right after starting is an error.
    fn spawn_detached(&mut self, command: &str) -> Result<()>;

    fn refresh_linker_cache(&mut self) -> Result<()>;

    // ---- network -----------------------------------------------------------

    /// Download a gzip tarball and unpack it under `dest`.
    ///
    /// Returns the regular files that were unpacked. On error, `dest` may
    /// hold a partial unpack; callers clean it up.
    fn fetch_archive(&mut self, url: &str, dest: &Path) -> Result<Vec<PathBuf>>;

    /// Reboot the machine. Nothing runs after this.
    fn reboot(&mut self) -> Result<()>;
}
