//! `Host` implementation for the real machine.
//!
//! Package, service and settings operations go through `run_command_safe`
//! with typed arguments; file operations use the filesystem directly.
//! File writes are atomic (temp file in the same directory, then rename).

use flate2::read::GzDecoder;
use nix::unistd::{Gid, Uid, User};
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::Host;
use crate::command_runner::run_command_safe;
use crate::commands::packages::{
    AddRepositoryArgs, AptInstallArgs, AptUpdateArgs, DpkgQueryArgs, PipInstallArgs, PipShowArgs,
};
use crate::commands::system::{GitConfigArgs, LdconfigArgs, PgrepArgs, SystemctlArgs, TimezoneArgs};
use crate::error::{ProvisionError, Result};
use crate::logic::text::repository_marker;
use crate::types::PackageManager;

const APT_SOURCES: &str = "/etc/apt/sources.list";
const APT_SOURCES_DIR: &str = "/etc/apt/sources.list.d";

/// How long a detached command must survive before it counts as started
const DETACH_GRACE: Duration = Duration::from_secs(2);
const DETACH_POLL: Duration = Duration::from_millis(50);

/// The machine devstation runs on
#[derive(Debug, Clone)]
pub struct SystemHost {
    apt_sources: PathBuf,
    apt_sources_dir: PathBuf,
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemHost {
    pub fn new() -> Self {
        Self {
            apt_sources: PathBuf::from(APT_SOURCES),
            apt_sources_dir: PathBuf::from(APT_SOURCES_DIR),
        }
    }

    /// Look repositories up in a different sources list and directory
    pub fn with_apt_sources(mut self, list: impl Into<PathBuf>, dir: impl Into<PathBuf>) -> Self {
        self.apt_sources = list.into();
        self.apt_sources_dir = dir.into();
        self
    }

    fn source_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.apt_sources.clone()];
        if let Ok(entries) = fs::read_dir(&self.apt_sources_dir) {
            let mut listed: Vec<PathBuf> = entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| {
                    p.extension()
                        .is_some_and(|ext| ext == "list" || ext == "sources")
                })
                .collect();
            listed.sort();
            files.extend(listed);
        }
        files
    }
}

/// Home directory of a local account
pub fn lookup_home_dir(user: &str) -> Result<PathBuf> {
    Ok(lookup_user(user)?.dir)
}

fn lookup_user(user: &str) -> Result<User> {
    User::from_name(user)
        .map_err(|e| ProvisionError::system(format!("Failed to look up user {}: {}", user, e)))?
        .ok_or_else(|| ProvisionError::system(format!("No such user: {}", user)))
}

/// Whether any non-comment line of the given sources files mentions `marker`
fn repository_listed(marker: &str, sources: &[PathBuf]) -> bool {
    sources.iter().any(|path| {
        fs::read_to_string(path).is_ok_and(|contents| {
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.starts_with('#'))
                .any(|l| l.contains(marker))
        })
    })
}

/// Unpack a gzip tarball under `dest`, returning the files written.
///
/// Symlinks count as files, since copying one copies what it points to.
/// Entries that would land outside `dest` abort the unpack.
pub(crate) fn unpack_tarball<R: Read>(reader: R, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let entries = archive
        .entries()
        .map_err(|e| ProvisionError::archive(format!("Failed to read archive: {}", e)))?;

    let mut files = Vec::new();
    for entry in entries {
        let mut entry =
            entry.map_err(|e| ProvisionError::archive(format!("Corrupt archive entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| ProvisionError::archive(format!("Invalid entry path: {}", e)))?
            .into_owned();
        let entry_type = entry.header().entry_type();
        let is_file = entry_type.is_file() || entry_type.is_symlink();

        let unpacked = entry.unpack_in(dest).map_err(|e| {
            ProvisionError::archive(format!("Failed to unpack {}: {}", path.display(), e))
        })?;
        if !unpacked {
            return Err(ProvisionError::archive(format!(
                "Entry {} escapes the destination directory",
                path.display()
            )));
        }
        if is_file {
            files.push(dest.join(&path));
        }
    }

    debug!(count = files.len(), dest = %dest.display(), "unpacked archive");
    Ok(files)
}

fn chown_tree(path: &Path, uid: Uid, gid: Gid) -> Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }
    nix::unistd::chown(path, Some(uid), Some(gid))
        .map_err(|e| ProvisionError::system(format!("chown {}: {}", path.display(), e)))?;
    if meta.is_dir() {
        for entry in fs::read_dir(path)? {
            chown_tree(&entry?.path(), uid, gid)?;
        }
    }
    Ok(())
}

impl Host for SystemHost {
    fn is_installed(&self, manager: PackageManager, package: &str) -> Result<bool> {
        match manager {
            PackageManager::Apt => {
                let output = run_command_safe(&DpkgQueryArgs {
                    package: package.to_string(),
                })?;
                Ok(output.success && DpkgQueryArgs::is_installed_status(&output.stdout))
            }
            PackageManager::Pip => {
                let output = run_command_safe(&PipShowArgs {
                    package: package.to_string(),
                })?;
                Ok(output.success)
            }
        }
    }

    fn install(&mut self, manager: PackageManager, packages: &[String], upgrade: bool) -> Result<()> {
        info!(%manager, ?packages, upgrade, "installing packages");
        let output = match manager {
            PackageManager::Apt => run_command_safe(&AptInstallArgs {
                packages: packages.to_vec(),
            })?,
            PackageManager::Pip => run_command_safe(&PipInstallArgs {
                packages: packages.to_vec(),
                upgrade,
            })?,
        };
        output.ensure_success()
    }

    fn has_repository(&self, repository: &str) -> Result<bool> {
        Ok(repository_listed(
            &repository_marker(repository),
            &self.source_files(),
        ))
    }

    fn add_repository(&mut self, repository: &str) -> Result<()> {
        info!(repository, "adding package repository");
        run_command_safe(&AddRepositoryArgs {
            repository: repository.to_string(),
        })?
        .ensure_success()
    }

    fn refresh_package_index(&mut self) -> Result<()> {
        info!("refreshing package index");
        run_command_safe(&AptUpdateArgs)?.ensure_success()
    }

    fn read_file(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| ProvisionError::system(format!("{} has no parent", path.display())))?;
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(contents.as_bytes())?;
        let permissions = match fs::metadata(path) {
            Ok(meta) => meta.permissions(),
            Err(_) => fs::Permissions::from_mode(0o644),
        };
        tmp.as_file().set_permissions(permissions)?;
        tmp.persist(path).map_err(|e| ProvisionError::Io(e.error))?;

        debug!(path = %path.display(), "wrote file");
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn copy_file(&mut self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(from, to)?;
        Ok(())
    }

    fn rename(&mut self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)?;
        Ok(())
    }

    fn remove_file(&mut self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn remove_dir_all(&mut self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn create_staging_dir(&mut self, parent: &Path, prefix: &str) -> Result<PathBuf> {
        fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .keep(true)
            .tempdir_in(parent)?;
        debug!(path = %dir.path().display(), "created staging directory");
        Ok(dir.path().to_path_buf())
    }

    fn is_world_readable(&self, path: &Path) -> Result<bool> {
        let mode = fs::metadata(path)?.permissions().mode();
        Ok(mode & 0o444 == 0o444)
    }

    fn make_world_readable(&mut self, path: &Path) -> Result<()> {
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_mode(permissions.mode() | 0o444);
        fs::set_permissions(path, permissions)?;
        Ok(())
    }

    fn make_executable(&mut self, path: &Path) -> Result<()> {
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_mode(permissions.mode() | 0o111);
        fs::set_permissions(path, permissions)?;
        Ok(())
    }

    fn chown_user(&mut self, path: &Path, user: &str) -> Result<()> {
        let account = lookup_user(user)?;
        chown_tree(path, account.uid, account.gid)
    }

    fn timezone(&self) -> Result<Option<String>> {
        let output = run_command_safe(&TimezoneArgs::Show)?;
        output.ensure_success()?;
        Ok(output.stdout_value())
    }

    fn set_timezone(&mut self, zone: &str) -> Result<()> {
        info!(zone, "setting timezone");
        run_command_safe(&TimezoneArgs::Set(zone.to_string()))?.ensure_success()
    }

    fn git_config(&self, file: &Path, key: &str) -> Result<Option<String>> {
        let output = run_command_safe(&GitConfigArgs {
            file: file.to_path_buf(),
            key: key.to_string(),
            value: None,
        })?;
        match output.exit_code {
            Some(0) => Ok(output.stdout_value()),
            // git exits 1 when the key (or the file) is missing
            Some(1) => Ok(None),
            _ => output.ensure_success().map(|_| None),
        }
    }

    fn set_git_config(&mut self, file: &Path, key: &str, value: &str) -> Result<()> {
        run_command_safe(&GitConfigArgs {
            file: file.to_path_buf(),
            key: key.to_string(),
            value: Some(value.to_string()),
        })?
        .ensure_success()
    }

    fn restart_service(&mut self, service: &str) -> Result<()> {
        info!(service, "restarting service");
        run_command_safe(&SystemctlArgs::Restart(service.to_string()))?.ensure_success()
    }

    fn is_process_running(&self, pattern: &str) -> Result<bool> {
        let output = run_command_safe(&PgrepArgs {
            pattern: pattern.to_string(),
        })?;
        Ok(output.success)
    }

    fn spawn_detached(&mut self, command: &str) -> Result<()> {
        use std::os::unix::process::CommandExt;

        info!(command, "starting detached process");
        let mut child = Command::new("sh")
            .args(["-c", command])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()?;

        let deadline = Instant::now() + DETACH_GRACE;
        while Instant::now() < deadline {
            if let Some(status) = child.try_wait()? {
                if status.success() {
                    debug!(pid = child.id(), "detached command exited cleanly");
                    return Ok(());
                }
                return Err(ProvisionError::command(
                    command,
                    status.code().unwrap_or(-1),
                    "exited right after starting",
                ));
            }
            thread::sleep(DETACH_POLL);
        }
        debug!(pid = child.id(), "detached process started");
        Ok(())
    }

    fn refresh_linker_cache(&mut self) -> Result<()> {
        run_command_safe(&LdconfigArgs)?.ensure_success()
    }

    fn fetch_archive(&mut self, url: &str, dest: &Path) -> Result<Vec<PathBuf>> {
        info!(url, dest = %dest.display(), "downloading archive");
        fs::create_dir_all(dest)?;

        let response = ureq::get(url).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => ProvisionError::download(url, format!("HTTP {}", code)),
            other => ProvisionError::download(url, other.to_string()),
        })?;

        let mut download = NamedTempFile::new()?;
        std::io::copy(&mut response.into_reader(), download.as_file_mut())
            .map_err(|e| ProvisionError::download(url, format!("Download interrupted: {}", e)))?;

        unpack_tarball(download.reopen()?, dest)
    }

    fn reboot(&mut self) -> Result<()> {
        info!("rebooting host");
        run_command_safe(&SystemctlArgs::Reboot)?.ensure_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn build_tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o640);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_unpack_tarball_lists_files() {
        let dir = TempDir::new().unwrap();
        let tarball = build_tarball(&[
            ("cuda/include/cudnn.h", b"#define CUDNN_MAJOR 6\n"),
            ("cuda/lib64/libcudnn.so.6", b"\x7fELF"),
        ]);

        let files = unpack_tarball(tarball.as_slice(), dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.contains(&dir.path().join("cuda/include/cudnn.h")));
        assert_eq!(
            fs::read_to_string(dir.path().join("cuda/include/cudnn.h")).unwrap(),
            "#define CUDNN_MAJOR 6\n"
        );
    }

    #[test]
    fn test_unpack_tarball_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let err = unpack_tarball(&b"definitely not gzip"[..], dir.path()).unwrap_err();
        assert!(matches!(err, ProvisionError::Archive(_)));
    }

    #[test]
    fn test_repository_listed_ignores_comments() {
        let dir = TempDir::new().unwrap();
        let list = dir.path().join("ubuntugis.list");
        fs::write(
            &list,
            "# deb http://ppa.launchpad.net/x2go/stable/ubuntu focal main\n\
             deb http://ppa.launchpad.net/ubuntugis/ppa/ubuntu focal main\n",
        )
        .unwrap();

        let sources = vec![list];
        assert!(repository_listed(&repository_marker("ppa:ubuntugis/ppa"), &sources));
        assert!(!repository_listed(&repository_marker("ppa:x2go/stable"), &sources));
    }

    #[test]
    fn test_has_repository_scans_sources_dir() {
        let dir = TempDir::new().unwrap();
        let sources_dir = dir.path().join("sources.list.d");
        fs::create_dir(&sources_dir).unwrap();
        fs::write(
            sources_dir.join("x2go-ubuntu-stable-jammy.sources"),
            "Types: deb\nURIs: https://ppa.launchpadcontent.net/x2go/stable/ubuntu/\n",
        )
        .unwrap();
        fs::write(sources_dir.join("ignored.save"), "/ubuntugis/ppa/ubuntu\n").unwrap();

        let host = SystemHost::new().with_apt_sources(dir.path().join("sources.list"), &sources_dir);
        assert!(host.has_repository("ppa:x2go/stable").unwrap());
        assert!(!host.has_repository("ppa:ubuntugis/ppa").unwrap());
    }

    #[test]
    fn test_write_file_preserves_mode_and_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("etc/rc.local");
        let mut host = SystemHost::new();

        host.write_file(&path, "#!/bin/sh -e\nexit 0\n").unwrap();
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o644);

        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        host.write_file(&path, "#!/bin/sh -e\nnumlockx on\nexit 0\n").unwrap();
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o755);
        assert_eq!(host.read_file(&path).unwrap().unwrap(), "#!/bin/sh -e\nnumlockx on\nexit 0\n");
    }

    #[test]
    fn test_read_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let host = SystemHost::new();
        assert_eq!(host.read_file(&dir.path().join("missing")).unwrap(), None);
    }

    #[test]
    fn test_world_readable_and_list_dir() {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join("libcudnn.so.6");
        fs::write(&lib, b"").unwrap();
        fs::set_permissions(&lib, fs::Permissions::from_mode(0o600)).unwrap();
        fs::create_dir(dir.path().join("stubs")).unwrap();

        let mut host = SystemHost::new();
        assert!(!host.is_world_readable(&lib).unwrap());
        host.make_world_readable(&lib).unwrap();
        assert!(host.is_world_readable(&lib).unwrap());
        assert_eq!(fs::metadata(&lib).unwrap().permissions().mode() & 0o777, 0o644);

        assert_eq!(host.list_dir(dir.path()).unwrap(), vec![lib]);
        assert!(host.list_dir(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_remove_missing_dir_is_ok() {
        let dir = TempDir::new().unwrap();
        let mut host = SystemHost::new();
        assert!(host.remove_dir_all(&dir.path().join("staging")).is_ok());
    }

    #[test]
    fn test_staging_dir_is_fresh_child_of_parent() {
        let dir = TempDir::new().unwrap();
        let parent = dir.path().join("devstation");
        let mut host = SystemHost::new();

        let first = host.create_staging_dir(&parent, "cudnn-").unwrap();
        let second = host.create_staging_dir(&parent, "cudnn-").unwrap();
        assert_ne!(first, second);
        assert_eq!(first.parent(), Some(parent.as_path()));
        assert!(first.is_dir());

        fs::write(parent.join("keep.txt"), b"mine").unwrap();
        host.remove_dir_all(&first).unwrap();
        assert!(!first.exists());
        assert!(parent.join("keep.txt").exists());
    }

    #[test]
    fn test_spawn_detached_reports_immediate_failure() {
        let mut host = SystemHost::new();
        let err = host.spawn_detached("exit 3").unwrap_err();
        assert!(matches!(err, ProvisionError::Command { code: 3, .. }));
        assert!(host.spawn_detached("exit 0").is_ok());
    }
}
