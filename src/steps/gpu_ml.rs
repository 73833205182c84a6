//! Deep-learning library (pip) and the cuDNN runtime it links against.
//!
//! cuDNN ships as a tarball of headers and shared libraries that must land
//! in the CUDA prefix. Installation is all-or-nothing:
//!
//! 1. Unpack into a fresh private directory created under `staging_dir`
//! 2. Pick headers and libraries by file-name prefix
//! 3. Move any file already at a destination aside, then copy the new one
//!    into `include/` or `lib64/` and make it world readable
//! 4. On any failure, remove the copies and put the moved files back;
//!    otherwise drop the moved files and refresh the linker cache
//!
//! A failed download or unpack therefore leaves the prefix untouched, and a
//! failed copy leaves it as it was before the step ran.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{missing_packages, Applied, Step};
use crate::config_file::GpuMlConfig;
use crate::error::{ProvisionError, Result};
use crate::host::Host;
use crate::types::{PackageManager, StepId};

/// Name prefix of the per-run directory the archive is unpacked into
const STAGING_PREFIX: &str = "cudnn-";

pub struct GpuMlStep {
    config: GpuMlConfig,
}

/// Where one staged file goes
#[derive(Debug, Clone, PartialEq, Eq)]
struct Placement {
    from: PathBuf,
    to: PathBuf,
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

impl GpuMlStep {
    pub fn new(config: GpuMlConfig) -> Self {
        Self { config }
    }

    /// Installed cuDNN files, split into (headers, libraries)
    fn installed_files(&self, host: &dyn Host) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
        let with_prefix = |dir: PathBuf, prefix: &str| -> Result<Vec<PathBuf>> {
            Ok(host
                .list_dir(&dir)?
                .into_iter()
                .filter(|p| file_name(p).is_some_and(|n| n.starts_with(prefix)))
                .collect())
        };
        Ok((
            with_prefix(self.config.include_dir(), &self.config.header_prefix)?,
            with_prefix(self.config.library_dir(), &self.config.library_prefix)?,
        ))
    }

    fn cudnn_installed(&self, host: &dyn Host) -> Result<bool> {
        let (headers, libraries) = self.installed_files(host)?;
        if headers.is_empty() || libraries.is_empty() {
            return Ok(false);
        }
        for path in headers.iter().chain(&libraries) {
            if !host.is_world_readable(path)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Map unpacked files onto the CUDA prefix; libraries are matched first
    fn plan_placements(&self, staged: &[PathBuf]) -> Result<Vec<Placement>> {
        let include_dir = self.config.include_dir();
        let library_dir = self.config.library_dir();

        let mut placements = Vec::new();
        let (mut headers, mut libraries) = (0, 0);
        for path in staged {
            let Some(name) = file_name(path) else {
                continue;
            };
            let dir = if name.starts_with(&self.config.library_prefix) {
                libraries += 1;
                &library_dir
            } else if name.starts_with(&self.config.header_prefix) {
                headers += 1;
                &include_dir
            } else {
                continue;
            };
            placements.push(Placement {
                from: path.clone(),
                to: dir.join(name),
            });
        }

        if headers == 0 || libraries == 0 {
            return Err(ProvisionError::archive(format!(
                "cuDNN archive has {} header(s) and {} library file(s) matching `{}*`/`{}*`",
                headers, libraries, self.config.header_prefix, self.config.library_prefix
            )));
        }
        Ok(placements)
    }

    fn install_cudnn(&self, host: &mut dyn Host) -> Result<Vec<PathBuf>> {
        let staging = host.create_staging_dir(&self.config.staging_dir, STAGING_PREFIX)?;

        let result = host
            .fetch_archive(&self.config.cudnn_url, &staging)
            .and_then(|staged| self.plan_placements(&staged))
            .and_then(|placements| place_all(host, &placements));

        if let Err(e) = host.remove_dir_all(&staging) {
            warn!(path = %staging.display(), error = %e, "could not remove staging directory");
        }
        let installed = result?;

        host.refresh_linker_cache()?;
        Ok(installed)
    }
}

/// Hidden sibling a file is moved to while its replacement is copied in.
/// The leading dot keeps it from matching the header or library prefix.
fn backup_path(path: &Path) -> PathBuf {
    let name = file_name(path).unwrap_or("cudnn");
    path.with_file_name(format!(".{}.devstation-orig", name))
}

/// Copy and chmod every placement, or leave the prefix as it was
fn place_all(host: &mut dyn Host, placements: &[Placement]) -> Result<Vec<PathBuf>> {
    let mut copied: Vec<PathBuf> = Vec::with_capacity(placements.len());
    // (backup, original location) of every file that was already there
    let mut moved: Vec<(PathBuf, PathBuf)> = Vec::new();

    let outcome = placements.iter().try_for_each(|p| {
        if host.exists(&p.to) {
            let backup = backup_path(&p.to);
            host.rename(&p.to, &backup)?;
            moved.push((backup, p.to.clone()));
        }
        host.copy_file(&p.from, &p.to)?;
        copied.push(p.to.clone());
        host.make_world_readable(&p.to)
    });

    if let Err(e) = outcome {
        warn!(
            copied = copied.len(),
            restored = moved.len(),
            "cuDNN install failed, rolling back"
        );
        for path in &copied {
            if let Err(cleanup) = host.remove_file(path) {
                warn!(path = %path.display(), error = %cleanup, "could not remove copied file");
            }
        }
        for (backup, original) in &moved {
            if let Err(cleanup) = host.rename(backup, original) {
                warn!(path = %original.display(), error = %cleanup, "could not restore previous file");
            }
        }
        return Err(e);
    }

    for (backup, _) in &moved {
        if let Err(e) = host.remove_file(backup) {
            warn!(path = %backup.display(), error = %e, "could not remove replaced file");
        }
    }
    Ok(copied)
}

impl Step for GpuMlStep {
    fn id(&self) -> StepId {
        StepId::GpuMl
    }

    /// With `upgrade` on, pip always runs, so the step is never satisfied
    fn check(&self, host: &dyn Host) -> Result<bool> {
        if self.config.upgrade {
            return Ok(false);
        }
        Ok(missing_packages(host, PackageManager::Pip, &self.config.pip_packages)?.is_empty()
            && self.cudnn_installed(host)?)
    }

    fn apply(&self, host: &mut dyn Host) -> Result<Applied> {
        let mut applied = Applied::default();

        let to_install = if self.config.upgrade {
            self.config.pip_packages.clone()
        } else {
            missing_packages(host, PackageManager::Pip, &self.config.pip_packages)?
        };
        if !to_install.is_empty() {
            host.install(PackageManager::Pip, &to_install, self.config.upgrade)?;
            let verb = if self.config.upgrade { "installed/upgraded" } else { "installed" };
            applied.change(format!("{} {}", verb, to_install.join(", ")));
        }

        if !self.cudnn_installed(host)? {
            let installed = self.install_cudnn(host)?;
            info!(files = installed.len(), prefix = %self.config.cuda_prefix.display(), "cuDNN installed");
            applied.change(format!(
                "installed {} cuDNN file(s) into {}",
                installed.len(),
                self.config.cuda_prefix.display()
            ));
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;

    fn config() -> GpuMlConfig {
        GpuMlConfig {
            upgrade: false,
            ..Default::default()
        }
    }

    /// First staging directory a fresh MemoryHost hands out
    fn staged(config: &GpuMlConfig) -> PathBuf {
        config.staging_dir.join(format!("{}0", STAGING_PREFIX))
    }

    fn host_with_archive(config: &GpuMlConfig) -> MemoryHost {
        let mut host = MemoryHost::new();
        host.register_archive(
            config.cudnn_url.clone(),
            [
                ("cuda/include/cudnn.h", "#define CUDNN_MAJOR 6"),
                ("cuda/lib64/libcudnn.so.6", "elf"),
                ("cuda/lib64/libcudnn_static.a", "ar"),
                ("cuda/NVIDIA_SLA_cuDNN_Support.txt", "license"),
            ],
        );
        host
    }

    #[test]
    fn test_installs_library_and_cudnn() {
        let config = config();
        let step = GpuMlStep::new(config.clone());
        let mut host = host_with_archive(&config);

        assert!(!step.check(&host).unwrap());
        let applied = step.apply(&mut host).unwrap();
        assert_eq!(applied.changes.len(), 2);
        assert!(step.check(&host).unwrap());

        let state = host.state();
        assert!(state.pip_packages.contains("tensorflow-gpu"));
        assert!(state.files.contains_key(&config.include_dir().join("cudnn.h")));
        assert!(state.files.contains_key(&config.library_dir().join("libcudnn.so.6")));
        assert!(state.files.contains_key(&config.library_dir().join("libcudnn_static.a")));
        assert!(!state.files.keys().any(|p| p.ends_with("NVIDIA_SLA_cuDNN_Support.txt")));
        assert!(!host.exists(&config.staging_dir));
        assert_eq!(state.linker_cache_refreshes, 1);
    }

    #[test]
    fn test_failed_download_leaves_prefix_empty() {
        let config = config();
        let step = GpuMlStep::new(config.clone());
        let mut host = MemoryHost::new();

        let err = step.apply(&mut host).unwrap_err();
        assert!(matches!(err, ProvisionError::Download { .. }));
        assert!(!host.exists(&config.cuda_prefix));
        assert_eq!(host.state().linker_cache_refreshes, 0);
    }

    #[test]
    fn test_failed_copy_rolls_back() {
        let config = config();
        let step = GpuMlStep::new(config.clone());
        let mut host = host_with_archive(&config);
        host.fail_when(format!(
            "copy {}",
            staged(&config).join("cuda/lib64/libcudnn_static.a").display()
        ));

        assert!(step.apply(&mut host).is_err());
        assert!(!host.exists(&config.cuda_prefix));
        assert!(!host.exists(&config.staging_dir));
    }

    #[test]
    fn test_failed_copy_restores_previous_install() {
        let config = config();
        let step = GpuMlStep::new(config.clone());
        let mut host = host_with_archive(&config);
        let header = config.include_dir().join("cudnn.h");
        let library = config.library_dir().join("libcudnn.so.6");
        for (path, contents) in [(&header, "#define CUDNN_MAJOR 5"), (&library, "old elf")] {
            host.state_mut().files.insert(path.clone(), contents.to_string());
            host.state_mut().modes.insert(path.clone(), 0o640);
        }
        assert!(!step.check(&host).unwrap());
        host.fail_when(format!(
            "copy {}",
            staged(&config).join("cuda/lib64/libcudnn_static.a").display()
        ));

        assert!(step.apply(&mut host).is_err());

        let state = host.state();
        assert_eq!(state.files.get(&header).map(String::as_str), Some("#define CUDNN_MAJOR 5"));
        assert_eq!(state.files.get(&library).map(String::as_str), Some("old elf"));
        assert_eq!(state.modes.get(&library), Some(&0o640));
        assert!(!state.files.contains_key(&config.library_dir().join("libcudnn_static.a")));
        assert_eq!(host.list_dir(&config.include_dir()).unwrap(), vec![header.clone()]);
        assert_eq!(state.linker_cache_refreshes, 0);
    }

    #[test]
    fn test_reinstall_replaces_unreadable_files_without_leftovers() {
        let config = config();
        let step = GpuMlStep::new(config.clone());
        let mut host = host_with_archive(&config);
        let library = config.library_dir().join("libcudnn.so.6");
        host.state_mut().files.insert(library.clone(), "old elf".to_string());
        host.state_mut().modes.insert(library.clone(), 0o600);

        step.apply(&mut host).unwrap();
        assert!(step.check(&host).unwrap());
        assert_eq!(host.state().files.get(&library).map(String::as_str), Some("elf"));
        assert_eq!(
            host.list_dir(&config.library_dir()).unwrap(),
            vec![
                config.library_dir().join("libcudnn.so.6"),
                config.library_dir().join("libcudnn_static.a"),
            ]
        );
    }

    #[test]
    fn test_staging_parent_contents_survive() {
        let mut config = config();
        config.staging_dir = PathBuf::from("/usr/local");
        config.cudnn_url = "https://example.invalid/missing.tgz".to_string();
        let step = GpuMlStep::new(config.clone());
        let mut host = MemoryHost::new();
        host.write_file(Path::new("/usr/local/bin/other-tool"), "#!/bin/sh").unwrap();

        assert!(step.apply(&mut host).is_err());
        assert!(host.exists(Path::new("/usr/local/bin/other-tool")));
        assert!(!host
            .journal()
            .iter()
            .any(|a| a == "remove-dir /usr/local"));
    }

    #[test]
    fn test_archive_without_libraries_is_rejected() {
        let config = config();
        let step = GpuMlStep::new(config.clone());
        let mut host = MemoryHost::new();
        host.register_archive(config.cudnn_url.clone(), [("cuda/include/cudnn.h", "")]);

        let err = step.apply(&mut host).unwrap_err();
        assert!(matches!(err, ProvisionError::Archive(_)));
        assert!(!host.exists(&config.cuda_prefix));
    }

    #[test]
    fn test_upgrade_always_reinstalls_but_keeps_cudnn() {
        let config = GpuMlConfig::default();
        assert!(config.upgrade);
        let step = GpuMlStep::new(config.clone());
        let mut host = host_with_archive(&config);

        step.apply(&mut host).unwrap();
        assert!(!step.check(&host).unwrap());
        host.clear_journal();

        let applied = step.apply(&mut host).unwrap();
        assert_eq!(applied.changes.len(), 1);
        assert_eq!(host.journal(), ["install pip --upgrade tensorflow-gpu"]);
    }

    #[test]
    fn test_unreadable_library_is_not_installed() {
        let config = config();
        let step = GpuMlStep::new(config.clone());
        let mut host = host_with_archive(&config);
        step.apply(&mut host).unwrap();

        host.state_mut()
            .modes
            .insert(config.library_dir().join("libcudnn.so.6"), 0o600);
        assert!(!step.check(&host).unwrap());
    }
}
