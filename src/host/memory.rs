//! In-memory `Host` for tests and rehearsals.
//!
//! `HostState` holds everything the steps can observe. Each mutation is
//! appended to a journal as a short action string (`"install apt chrony"`,
//! `"write /etc/environment"`, `"reboot"`), and any action can be made to
//! fail by registering a prefix with `fail_when`. Remote archives must be
//! registered with `register_archive` before they can be fetched.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::Host;
use crate::error::{ProvisionError, Result};
use crate::types::PackageManager;

/// Mode given to files written through `write_file` or `copy_file`
const DEFAULT_MODE: u32 = 0o644;
/// Mode given to files unpacked from archives; not world readable
const ARCHIVE_MODE: u32 = 0o640;

/// Observable state of a modeled machine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostState {
    pub apt_packages: BTreeSet<String>,
    pub pip_packages: BTreeSet<String>,
    pub repositories: BTreeSet<String>,
    pub files: BTreeMap<PathBuf, String>,
    pub modes: BTreeMap<PathBuf, u32>,
    pub owners: BTreeMap<PathBuf, String>,
    pub timezone: Option<String>,
    /// `(config file, key) -> value`
    pub git_config: BTreeMap<(PathBuf, String), String>,
    /// Command lines of running processes
    pub processes: BTreeSet<String>,
    /// Commands that exit cleanly as soon as they are spawned
    pub short_lived: BTreeSet<String>,
    pub services_restarted: Vec<String>,
    pub index_refreshes: usize,
    pub linker_cache_refreshes: usize,
    pub rebooted: bool,
}

impl HostState {
    /// Whether `path` is a file or an implied directory holding files
    pub fn path_exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.files.keys().any(|f| f.starts_with(path))
    }

    /// Files at or below `path`
    fn paths_under(&self, path: &Path) -> Vec<PathBuf> {
        self.files
            .keys()
            .filter(|f| f.starts_with(path))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    state: HostState,
    journal: Vec<String>,
    failures: Vec<String>,
    /// `url -> [(relative path, contents)]`
    archives: BTreeMap<String, Vec<(PathBuf, String)>>,
    /// Staging directories handed out so far
    staged: usize,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: HostState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    pub fn state(&self) -> &HostState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut HostState {
        &mut self.state
    }

    /// Every mutation attempted so far, in order
    pub fn journal(&self) -> &[String] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Make every action starting with `prefix` fail
    pub fn fail_when(&mut self, prefix: impl Into<String>) {
        self.failures.push(prefix.into());
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    /// Serve a gzip tarball at `url` holding the given files
    pub fn register_archive<P, C>(&mut self, url: impl Into<String>, files: impl IntoIterator<Item = (P, C)>)
    where
        P: Into<PathBuf>,
        C: Into<String>,
    {
        let files = files
            .into_iter()
            .map(|(path, contents)| (path.into(), contents.into()))
            .collect();
        self.archives.insert(url.into(), files);
    }

    /// Record an action, failing it if a registered prefix matches
    fn act(&mut self, action: String) -> Result<()> {
        let failing = self.failures.iter().any(|f| action.starts_with(f.as_str()));
        self.journal.push(action.clone());
        if failing {
            return Err(ProvisionError::system(format!("injected failure: {}", action)));
        }
        Ok(())
    }

    fn put_file(&mut self, path: &Path, contents: String, mode: u32) {
        self.state.files.insert(path.to_path_buf(), contents);
        self.state.modes.entry(path.to_path_buf()).or_insert(mode);
    }

    fn require_file(&self, path: &Path) -> Result<()> {
        if self.state.files.contains_key(path) {
            Ok(())
        } else {
            Err(ProvisionError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )))
        }
    }
}

impl Host for MemoryHost {
    fn is_installed(&self, manager: PackageManager, package: &str) -> Result<bool> {
        Ok(match manager {
            PackageManager::Apt => self.state.apt_packages.contains(package),
            PackageManager::Pip => self.state.pip_packages.contains(package),
        })
    }

    fn install(&mut self, manager: PackageManager, packages: &[String], upgrade: bool) -> Result<()> {
        let flag = if upgrade { " --upgrade" } else { "" };
        self.act(format!("install {}{} {}", manager, flag, packages.join(" ")))?;
        let installed = match manager {
            PackageManager::Apt => &mut self.state.apt_packages,
            PackageManager::Pip => &mut self.state.pip_packages,
        };
        installed.extend(packages.iter().cloned());
        Ok(())
    }

    fn has_repository(&self, repository: &str) -> Result<bool> {
        Ok(self.state.repositories.contains(repository))
    }

    fn add_repository(&mut self, repository: &str) -> Result<()> {
        self.act(format!("add-repository {}", repository))?;
        self.state.repositories.insert(repository.to_string());
        Ok(())
    }

    fn refresh_package_index(&mut self) -> Result<()> {
        self.act("refresh-index".to_string())?;
        self.state.index_refreshes += 1;
        Ok(())
    }

    fn read_file(&self, path: &Path) -> Result<Option<String>> {
        Ok(self.state.files.get(path).cloned())
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        self.act(format!("write {}", path.display()))?;
        self.put_file(path, contents.to_string(), DEFAULT_MODE);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.state.path_exists(path)
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(self
            .state
            .files
            .keys()
            .filter(|f| f.parent() == Some(dir))
            .cloned()
            .collect())
    }

    fn copy_file(&mut self, from: &Path, to: &Path) -> Result<()> {
        self.act(format!("copy {} {}", from.display(), to.display()))?;
        self.require_file(from)?;
        let contents = self.state.files[from].clone();
        let mode = self.state.modes.get(from).copied().unwrap_or(DEFAULT_MODE);
        self.state.files.insert(to.to_path_buf(), contents);
        self.state.modes.insert(to.to_path_buf(), mode);
        Ok(())
    }

    fn rename(&mut self, from: &Path, to: &Path) -> Result<()> {
        self.act(format!("rename {} {}", from.display(), to.display()))?;
        let moved = self.state.paths_under(from);
        if moved.is_empty() {
            return self.require_file(from);
        }
        for old in moved {
            let Ok(rest) = old.strip_prefix(from) else {
                continue;
            };
            let new = if rest.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(rest)
            };
            if let Some(contents) = self.state.files.remove(&old) {
                self.state.files.insert(new.clone(), contents);
            }
            if let Some(mode) = self.state.modes.remove(&old) {
                self.state.modes.insert(new.clone(), mode);
            }
            if let Some(owner) = self.state.owners.remove(&old) {
                self.state.owners.insert(new, owner);
            }
        }
        Ok(())
    }

    fn remove_file(&mut self, path: &Path) -> Result<()> {
        self.act(format!("remove {}", path.display()))?;
        self.require_file(path)?;
        self.state.files.remove(path);
        self.state.modes.remove(path);
        self.state.owners.remove(path);
        Ok(())
    }

    fn remove_dir_all(&mut self, path: &Path) -> Result<()> {
        self.act(format!("remove-dir {}", path.display()))?;
        for old in self.state.paths_under(path) {
            self.state.files.remove(&old);
            self.state.modes.remove(&old);
            self.state.owners.remove(&old);
        }
        Ok(())
    }

    fn create_staging_dir(&mut self, parent: &Path, prefix: &str) -> Result<PathBuf> {
        let dir = parent.join(format!("{}{}", prefix, self.staged));
        self.act(format!("mkdir-staging {}", dir.display()))?;
        self.staged += 1;
        Ok(dir)
    }

    fn is_world_readable(&self, path: &Path) -> Result<bool> {
        self.require_file(path)?;
        let mode = self.state.modes.get(path).copied().unwrap_or(DEFAULT_MODE);
        Ok(mode & 0o444 == 0o444)
    }

    fn make_world_readable(&mut self, path: &Path) -> Result<()> {
        self.act(format!("chmod a+r {}", path.display()))?;
        self.require_file(path)?;
        let mode = self.state.modes.entry(path.to_path_buf()).or_insert(DEFAULT_MODE);
        *mode |= 0o444;
        Ok(())
    }

    fn make_executable(&mut self, path: &Path) -> Result<()> {
        self.act(format!("chmod a+x {}", path.display()))?;
        self.require_file(path)?;
        let mode = self.state.modes.entry(path.to_path_buf()).or_insert(DEFAULT_MODE);
        *mode |= 0o111;
        Ok(())
    }

    fn chown_user(&mut self, path: &Path, user: &str) -> Result<()> {
        self.act(format!("chown {} {}", user, path.display()))?;
        for owned in self.state.paths_under(path) {
            self.state.owners.insert(owned, user.to_string());
        }
        Ok(())
    }

    fn timezone(&self) -> Result<Option<String>> {
        Ok(self.state.timezone.clone())
    }

    fn set_timezone(&mut self, zone: &str) -> Result<()> {
        self.act(format!("set-timezone {}", zone))?;
        self.state.timezone = Some(zone.to_string());
        Ok(())
    }

    fn git_config(&self, file: &Path, key: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .git_config
            .get(&(file.to_path_buf(), key.to_string()))
            .cloned())
    }

    fn set_git_config(&mut self, file: &Path, key: &str, value: &str) -> Result<()> {
        self.act(format!("git-config {} {}", key, value))?;
        self.state
            .git_config
            .insert((file.to_path_buf(), key.to_string()), value.to_string());
        Ok(())
    }

    fn restart_service(&mut self, service: &str) -> Result<()> {
        self.act(format!("restart {}", service))?;
        self.state.services_restarted.push(service.to_string());
        Ok(())
    }

    fn is_process_running(&self, pattern: &str) -> Result<bool> {
        Ok(self.state.processes.iter().any(|p| p.contains(pattern)))
    }

    fn spawn_detached(&mut self, command: &str) -> Result<()> {
        self.act(format!("spawn {}", command))?;
        if !self.state.short_lived.contains(command) {
            self.state.processes.insert(command.to_string());
        }
        Ok(())
    }

    fn refresh_linker_cache(&mut self) -> Result<()> {
        self.act("ldconfig".to_string())?;
        self.state.linker_cache_refreshes += 1;
        Ok(())
    }

    fn fetch_archive(&mut self, url: &str, dest: &Path) -> Result<Vec<PathBuf>> {
        self.act(format!("fetch {}", url))?;
        let entries = self
            .archives
            .get(url)
            .cloned()
            .ok_or_else(|| ProvisionError::download(url, "HTTP 404"))?;

        let mut unpacked = Vec::with_capacity(entries.len());
        for (relative, contents) in entries {
            let path = dest.join(relative);
            self.state.files.insert(path.clone(), contents);
            self.state.modes.insert(path.clone(), ARCHIVE_MODE);
            unpacked.push(path);
        }
        Ok(unpacked)
    }

    fn reboot(&mut self) -> Result<()> {
        self.act("reboot".to_string())?;
        self.state.rebooted = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_records_mutations_only() {
        let mut host = MemoryHost::new();
        host.install(PackageManager::Apt, &["chrony".to_string()], false).unwrap();
        assert!(host.is_installed(PackageManager::Apt, "chrony").unwrap());
        assert!(!host.is_installed(PackageManager::Pip, "chrony").unwrap());
        host.set_timezone("UTC").unwrap();

        assert_eq!(host.journal(), ["install apt chrony", "set-timezone UTC"]);
        assert_eq!(host.state().timezone.as_deref(), Some("UTC"));
    }

    #[test]
    fn test_injected_failure_is_journaled_and_leaves_state() {
        let mut host = MemoryHost::new();
        host.fail_when("install pip");

        let err = host
            .install(PackageManager::Pip, &["tensorflow-gpu".to_string()], true)
            .unwrap_err();
        assert!(err.to_string().contains("injected failure"));
        assert_eq!(host.journal(), ["install pip --upgrade tensorflow-gpu"]);
        assert!(host.state().pip_packages.is_empty());

        host.clear_failures();
        assert!(host.install(PackageManager::Pip, &["tensorflow-gpu".to_string()], true).is_ok());
    }

    #[test]
    fn test_fetch_unregistered_archive_is_download_error() {
        let mut host = MemoryHost::new();
        let err = host
            .fetch_archive("https://example.invalid/ide.tar.gz", Path::new("/tmp/stage"))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Download { .. }));
        assert!(!host.exists(Path::new("/tmp/stage")));
    }

    #[test]
    fn test_fetch_archive_files_are_not_world_readable() {
        let mut host = MemoryHost::new();
        host.register_archive("https://example.invalid/a.tgz", [("cuda/include/cudnn.h", "header")]);

        let files = host
            .fetch_archive("https://example.invalid/a.tgz", Path::new("/stage"))
            .unwrap();
        assert_eq!(files, vec![PathBuf::from("/stage/cuda/include/cudnn.h")]);
        assert!(!host.is_world_readable(&files[0]).unwrap());
        host.make_world_readable(&files[0]).unwrap();
        assert!(host.is_world_readable(&files[0]).unwrap());
    }

    #[test]
    fn test_rename_and_remove_dir_move_whole_trees() {
        let mut host = MemoryHost::new();
        host.write_file(Path::new("/home/dev/.stage/ide/bin/ide.sh"), "#!/bin/sh").unwrap();
        host.write_file(Path::new("/home/dev/.stage/ide/build.txt"), "PC-172").unwrap();

        host.rename(Path::new("/home/dev/.stage/ide"), Path::new("/home/dev/ide"))
            .unwrap();
        assert!(host.exists(Path::new("/home/dev/ide/bin/ide.sh")));
        assert!(!host.exists(Path::new("/home/dev/.stage/ide")));
        assert_eq!(
            host.list_dir(Path::new("/home/dev/ide")).unwrap(),
            vec![PathBuf::from("/home/dev/ide/build.txt")]
        );

        host.remove_dir_all(Path::new("/home/dev/ide")).unwrap();
        assert!(!host.exists(Path::new("/home/dev/ide")));
    }

    #[test]
    fn test_rename_missing_path_fails() {
        let mut host = MemoryHost::new();
        assert!(host.rename(Path::new("/nope"), Path::new("/also-nope")).is_err());
    }

    #[test]
    fn test_staging_dirs_are_unique_and_leave_parent_alone() {
        let mut host = MemoryHost::new();
        host.write_file(Path::new("/var/tmp/keep.txt"), "mine").unwrap();

        let first = host.create_staging_dir(Path::new("/var/tmp"), "cudnn-").unwrap();
        let second = host.create_staging_dir(Path::new("/var/tmp"), "cudnn-").unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("/var/tmp"));

        host.remove_dir_all(&first).unwrap();
        assert!(host.exists(Path::new("/var/tmp/keep.txt")));
    }

    #[test]
    fn test_spawned_process_is_visible() {
        let mut host = MemoryHost::new();
        assert!(!host.is_process_running("startxfce4").unwrap());
        host.spawn_detached("startxfce4").unwrap();
        assert!(host.is_process_running("startxfce4").unwrap());
    }

    #[test]
    fn test_short_lived_process_is_not_running_after_spawn() {
        let mut host = MemoryHost::new();
        host.state_mut().short_lived.insert("startxfce4".to_string());
        host.spawn_detached("startxfce4").unwrap();
        assert!(!host.is_process_running("startxfce4").unwrap());
    }
}
