//! Per-user setup in the target user's home: git identity and the IDE.
//!
//! devstation runs as root, so anything written here is handed to the
//! target user afterwards.

use std::path::{Path, PathBuf};
use tracing::warn;

use super::{Applied, Step};
use crate::config_file::{GitIdentityConfig, IdeConfig};
use crate::error::{ProvisionError, Result};
use crate::host::Host;
use crate::types::StepId;

/// Name prefix of the per-run staging directory created in the home
const IDE_STAGING_PREFIX: &str = ".devstation-ide-";

fn hand_over(
    host: &mut dyn Host,
    owner: Option<&str>,
    path: &Path,
    applied: &mut Applied,
) -> Result<()> {
    if let Some(user) = owner {
        host.chown_user(path, user)?;
        applied.change(format!("{} owned by {}", path.display(), user));
    }
    Ok(())
}

// ============================================================================
// git-identity
// ============================================================================

pub struct GitIdentityStep {
    gitconfig: PathBuf,
    identity: GitIdentityConfig,
    owner: Option<String>,
}

impl GitIdentityStep {
    pub fn new(gitconfig: PathBuf, identity: GitIdentityConfig, owner: Option<String>) -> Self {
        Self {
            gitconfig,
            identity,
            owner,
        }
    }

    fn wanted(&self) -> [(&'static str, &str); 2] {
        [
            ("user.name", self.identity.name.trim()),
            ("user.email", self.identity.email.trim()),
        ]
    }
}

impl Step for GitIdentityStep {
    fn id(&self) -> StepId {
        StepId::GitIdentity
    }

    fn check(&self, host: &dyn Host) -> Result<bool> {
        for (key, value) in self.wanted() {
            if host.git_config(&self.gitconfig, key)?.as_deref() != Some(value) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn apply(&self, host: &mut dyn Host) -> Result<Applied> {
        let mut applied = Applied::default();
        for (key, value) in self.wanted() {
            if host.git_config(&self.gitconfig, key)?.as_deref() != Some(value) {
                host.set_git_config(&self.gitconfig, key, value)?;
                applied.change(format!("{} = {}", key, value));
            }
        }
        hand_over(host, self.owner.as_deref(), &self.gitconfig, &mut applied)?;
        Ok(applied)
    }
}

// ============================================================================
// ide
// ============================================================================

/// Unpacks the IDE archive into the home directory.
///
/// The archive is unpacked into a staging directory first and only its
/// top-level directory is moved into place, so an interrupted download
/// never looks like an installed IDE.
pub struct IdeStep {
    home: PathBuf,
    config: IdeConfig,
    owner: Option<String>,
}

impl IdeStep {
    pub fn new(home: PathBuf, config: IdeConfig, owner: Option<String>) -> Self {
        Self {
            home,
            config,
            owner,
        }
    }

    fn install_dir(&self) -> PathBuf {
        self.home.join(&self.config.install_dir_name)
    }

    fn unpack_and_move(&self, host: &mut dyn Host, staging: &Path) -> Result<()> {
        host.fetch_archive(&self.config.url, staging)?;

        let unpacked = staging.join(&self.config.install_dir_name);
        if !host.exists(&unpacked) {
            return Err(ProvisionError::archive(format!(
                "IDE archive does not contain {}/",
                self.config.install_dir_name
            )));
        }
        host.rename(&unpacked, &self.install_dir())
    }
}

impl Step for IdeStep {
    fn id(&self) -> StepId {
        StepId::Ide
    }

    fn check(&self, host: &dyn Host) -> Result<bool> {
        Ok(host.exists(&self.install_dir()))
    }

    fn apply(&self, host: &mut dyn Host) -> Result<Applied> {
        let staging = host.create_staging_dir(&self.home, IDE_STAGING_PREFIX)?;

        let result = self.unpack_and_move(host, &staging);
        if let Err(e) = host.remove_dir_all(&staging) {
            warn!(path = %staging.display(), error = %e, "could not remove IDE staging directory");
        }
        result?;

        let mut applied = Applied::default();
        applied.change(format!("unpacked IDE into {}", self.install_dir().display()));
        hand_over(host, self.owner.as_deref(), &self.install_dir(), &mut applied)?;
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;

    const IDE_URL: &str = "https://download.jetbrains.com/python/pycharm-community-2017.2.3.tar.gz";

    fn ide_step(owner: Option<&str>) -> IdeStep {
        IdeStep::new(
            PathBuf::from("/home/dev"),
            IdeConfig::default(),
            owner.map(str::to_string),
        )
    }

    #[test]
    fn test_git_identity_sets_only_differing_keys() {
        let step = GitIdentityStep::new(
            PathBuf::from("/home/dev/.gitconfig"),
            GitIdentityConfig::default(),
            Some("dev".to_string()),
        );
        let mut host = MemoryHost::new();
        host.state_mut().git_config.insert(
            (PathBuf::from("/home/dev/.gitconfig"), "user.name".to_string()),
            "Workstation Developer".to_string(),
        );

        assert!(!step.check(&host).unwrap());
        let applied = step.apply(&mut host).unwrap();
        assert!(step.check(&host).unwrap());
        assert_eq!(applied.changes[0], "user.email = developer@example.com");
        assert_eq!(
            host.journal(),
            [
                "git-config user.email developer@example.com",
                "chown dev /home/dev/.gitconfig",
            ]
        );
    }

    #[test]
    fn test_ide_unpacks_via_staging_and_chowns() {
        let step = ide_step(Some("dev"));
        let mut host = MemoryHost::new();
        host.register_archive(
            IDE_URL,
            [
                ("pycharm-community-2017.2.3/bin/pycharm.sh", "#!/bin/sh"),
                ("pycharm-community-2017.2.3/build.txt", "PC-172.3968.37"),
            ],
        );

        assert!(!step.check(&host).unwrap());
        step.apply(&mut host).unwrap();
        assert!(step.check(&host).unwrap());

        let launcher = Path::new("/home/dev/pycharm-community-2017.2.3/bin/pycharm.sh");
        assert!(host.exists(launcher));
        assert_eq!(host.state().owners.get(launcher).map(String::as_str), Some("dev"));
        assert!(!host.exists(Path::new("/home/dev/.devstation-ide-0")));
    }

    #[test]
    fn test_ide_archive_with_wrong_layout_installs_nothing() {
        let step = ide_step(None);
        let mut host = MemoryHost::new();
        host.register_archive(IDE_URL, [("pycharm-2017.3/bin/pycharm.sh", "#!/bin/sh")]);

        let err = step.apply(&mut host).unwrap_err();
        assert!(matches!(err, ProvisionError::Archive(_)));
        assert!(!step.check(&host).unwrap());
        assert!(!host.exists(Path::new("/home/dev/.devstation-ide-0")));
    }

    #[test]
    fn test_ide_failed_download() {
        let step = ide_step(None);
        let mut host = MemoryHost::new();
        assert!(step.apply(&mut host).is_err());
        assert!(!step.check(&host).unwrap());
    }
}
