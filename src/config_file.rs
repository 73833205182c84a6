//! Provisioning configuration: every literal the workstation build needs.
//!
//! Package names, URLs, paths, the timezone and the git identity live here
//! instead of inline in the steps. The file format is JSON; missing fields
//! fall back to `Default`, which reproduces the reference workstation.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, Result};
use crate::logic::selection::StepSelection;
use crate::types::StepId;

/// Time daemon settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeSyncConfig {
    pub package: String,
    pub service: String,
    pub config_path: PathBuf,
    /// Line that must appear exactly once in `config_path`
    pub server_directive: String,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            package: "chrony".to_string(),
            service: "chrony".to_string(),
            config_path: PathBuf::from("/etc/chrony/chrony.conf"),
            server_directive: "server ntp.ubuntu.com iburst".to_string(),
        }
    }
}

/// Version-control identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitIdentityConfig {
    pub name: String,
    pub email: String,
}

impl Default for GitIdentityConfig {
    fn default() -> Self {
        Self {
            name: "Workstation Developer".to_string(),
            email: "developer@example.com".to_string(),
        }
    }
}

/// An optional apt repository plus the apt packages that come from it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackageSetConfig {
    pub repository: Option<String>,
    pub packages: Vec<String>,
}

impl PackageSetConfig {
    fn geospatial() -> Self {
        Self {
            repository: Some("ppa:ubuntugis/ppa".to_string()),
            packages: [
                "python3-numpy",   // numeric arrays
                "gdal-bin",        // geospatial data abstraction
                "libgdal-dev",     // ... and its headers
                "python3-shapely", // vector geometry
                "python3-rasterio",
                "libgeos-dev",     // geometry engine
                "python3-pyqt5",   // GUI toolkit binding
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }

    fn remote_desktop() -> Self {
        Self {
            repository: Some("ppa:x2go/stable".to_string()),
            packages: vec!["x2goserver".to_string(), "x2goserver-xsession".to_string()],
        }
    }
}

/// Deep-learning library and the cuDNN runtime it links against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GpuMlConfig {
    pub pip_packages: Vec<String>,
    /// Pass `--upgrade` to pip on every run
    pub upgrade: bool,
    pub cudnn_url: String,
    /// Headers go to `<prefix>/include`, libraries to `<prefix>/lib64`
    pub cuda_prefix: PathBuf,
    /// Parent of the per-run directory the archive is unpacked into.
    /// Only that per-run directory is removed afterwards.
    pub staging_dir: PathBuf,
    pub header_prefix: String,
    pub library_prefix: String,
}

impl Default for GpuMlConfig {
    fn default() -> Self {
        Self {
            pip_packages: vec!["tensorflow-gpu".to_string()],
            upgrade: true,
            cudnn_url:
                "http://developer.download.nvidia.com/compute/redist/cudnn/v6.0/cudnn-8.0-linux-x64-v6.0.tgz"
                    .to_string(),
            cuda_prefix: PathBuf::from("/usr/local/cuda"),
            staging_dir: PathBuf::from("/var/tmp/devstation/cudnn"),
            header_prefix: "cudnn".to_string(),
            library_prefix: "libcudnn".to_string(),
        }
    }
}

impl GpuMlConfig {
    pub fn include_dir(&self) -> PathBuf {
        self.cuda_prefix.join("include")
    }

    pub fn library_dir(&self) -> PathBuf {
        self.cuda_prefix.join("lib64")
    }
}

/// Desktop environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DesktopConfig {
    pub packages: Vec<String>,
    pub start_session: bool,
    pub session_command: String,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            packages: vec!["xfce4".to_string()],
            start_session: true,
            session_command: "startxfce4".to_string(),
        }
    }
}

/// IDE archive unpacked into the target user's home
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdeConfig {
    pub url: String,
    /// Top-level directory the archive unpacks to
    pub install_dir_name: String,
}

impl Default for IdeConfig {
    fn default() -> Self {
        Self {
            url: "https://download.jetbrains.com/python/pycharm-community-2017.2.3.tar.gz"
                .to_string(),
            install_dir_name: "pycharm-community-2017.2.3".to_string(),
        }
    }
}

/// Numlock at boot (rc.local) and in X sessions (xinitrc)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NumlockConfig {
    pub package: String,
    pub rc_local: PathBuf,
    pub rc_local_line: String,
    pub xinitrc: PathBuf,
    pub xinitrc_line: String,
}

impl Default for NumlockConfig {
    fn default() -> Self {
        Self {
            package: "numlockx".to_string(),
            rc_local: PathBuf::from("/etc/rc.local"),
            rc_local_line: "[ -x /usr/bin/numlockx ] && /usr/bin/numlockx on".to_string(),
            xinitrc: PathBuf::from("/etc/X11/xinit/xinitrc"),
            xinitrc_line: "/usr/bin/numlockx on".to_string(),
        }
    }
}

/// System-wide JAVA_HOME
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JavaHomeConfig {
    pub environment_file: PathBuf,
    pub value: String,
}

impl Default for JavaHomeConfig {
    fn default() -> Self {
        Self {
            environment_file: PathBuf::from("/etc/environment"),
            value: "/usr/lib/jvm/java-8-openjdk-amd64".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RebootConfig {
    pub enabled: bool,
}

impl Default for RebootConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Complete provisioning configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionConfig {
    /// Owner of files written into the home directory; defaults to the sudo caller
    pub target_user: Option<String>,
    pub home_dir: Option<PathBuf>,

    pub time_sync: TimeSyncConfig,
    pub timezone: String,
    pub git_identity: GitIdentityConfig,
    pub geospatial: PackageSetConfig,
    pub gpu_ml: GpuMlConfig,
    pub desktop: DesktopConfig,
    pub remote_desktop: PackageSetConfig,
    pub ide: IdeConfig,
    pub numlock: NumlockConfig,
    pub java_home: JavaHomeConfig,
    pub reboot: RebootConfig,

    /// Steps whose failure is reported but does not stop the run
    pub best_effort_steps: Vec<StepId>,
    pub skip_steps: Vec<StepId>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            target_user: None,
            home_dir: None,
            time_sync: TimeSyncConfig::default(),
            timezone: "Europe/Amsterdam".to_string(),
            git_identity: GitIdentityConfig::default(),
            geospatial: PackageSetConfig::geospatial(),
            gpu_ml: GpuMlConfig::default(),
            desktop: DesktopConfig::default(),
            remote_desktop: PackageSetConfig::remote_desktop(),
            ide: IdeConfig::default(),
            numlock: NumlockConfig::default(),
            java_home: JavaHomeConfig::default(),
            reboot: RebootConfig::default(),
            best_effort_steps: Vec::new(),
            skip_steps: Vec::new(),
        }
    }
}

impl ProvisionConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Home directory downloads and per-user config land in
    pub fn home(&self) -> PathBuf {
        self.home_dir.clone().unwrap_or_else(|| PathBuf::from("/root"))
    }

    pub fn gitconfig_path(&self) -> PathBuf {
        self.home().join(".gitconfig")
    }

    /// Fill `target_user` and `home_dir` when the config leaves them unset.
    ///
    /// The target user defaults to the sudo caller (never root itself); the
    /// home directory comes from `home_for(user)` or, without a user, from
    /// `fallback_home`.
    pub fn resolve_target_user(
        &mut self,
        sudo_user: Option<&str>,
        fallback_home: Option<PathBuf>,
        home_for: impl Fn(&str) -> Result<PathBuf>,
    ) -> Result<()> {
        if self.target_user.is_none() {
            self.target_user = sudo_user
                .filter(|u| !u.is_empty() && *u != "root")
                .map(str::to_string);
        }

        if self.home_dir.is_none() {
            self.home_dir = match &self.target_user {
                Some(user) => Some(home_for(user)?),
                None => fallback_home,
            };
        }

        if self.home_dir.is_none() {
            return Err(ProvisionError::config(
                "Cannot determine a home directory; set home_dir in the configuration",
            ));
        }
        Ok(())
    }

    /// Validate the configuration once, before any step runs
    pub fn validate(&self) -> Result<()> {
        let selection = StepSelection::from_config(self);
        let selected = |step: StepId| selection.is_selected(step);

        if let Some(user) = &self.target_user {
            if user.is_empty()
                || !user
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            {
                return Err(ProvisionError::validation(format!(
                    "Invalid target user name {:?}",
                    user
                )));
            }
        }
        if let Some(home) = &self.home_dir {
            require_absolute("home_dir", home)?;
        }

        if selected(StepId::TimeSync) {
            validate_package_name(&self.time_sync.package)?;
            require_single_line("time_sync.service", &self.time_sync.service)?;
            require_absolute("time_sync.config_path", &self.time_sync.config_path)?;
            require_single_line("time_sync.server_directive", &self.time_sync.server_directive)?;
        }

        if selected(StepId::Timezone) || selected(StepId::TimezoneReapply) {
            validate_timezone(&self.timezone)?;
        }

        if selected(StepId::GitIdentity) {
            let name = self.git_identity.name.trim();
            if name.is_empty() {
                return Err(ProvisionError::validation("Git identity name must be specified"));
            }
            require_single_line("git_identity.name", name)?;
            let email = self.git_identity.email.trim();
            if !email.contains('@') || email.contains(char::is_whitespace) {
                return Err(ProvisionError::validation(
                    "Git identity email must contain '@' and no whitespace",
                ));
            }
        }

        if selected(StepId::Geospatial) {
            validate_package_set("geospatial", &self.geospatial)?;
        }

        if selected(StepId::GpuMl) {
            let gpu = &self.gpu_ml;
            if gpu.pip_packages.is_empty() {
                return Err(ProvisionError::validation("gpu_ml.pip_packages must not be empty"));
            }
            for package in &gpu.pip_packages {
                validate_package_name(package)?;
            }
            validate_url("gpu_ml.cudnn_url", &gpu.cudnn_url)?;
            require_absolute("gpu_ml.cuda_prefix", &gpu.cuda_prefix)?;
            require_absolute("gpu_ml.staging_dir", &gpu.staging_dir)?;
            validate_staging_dir(&gpu.staging_dir, &gpu.cuda_prefix, self.home_dir.as_deref())?;
            if gpu.header_prefix.is_empty() || gpu.library_prefix.is_empty() {
                return Err(ProvisionError::validation(
                    "gpu_ml header and library prefixes must not be empty",
                ));
            }
        }

        if selected(StepId::Desktop) {
            if self.desktop.packages.is_empty() {
                return Err(ProvisionError::validation("desktop.packages must not be empty"));
            }
            for package in &self.desktop.packages {
                validate_package_name(package)?;
            }
            if self.desktop.start_session && self.desktop.session_command.trim().is_empty() {
                return Err(ProvisionError::validation(
                    "desktop.session_command must be set when start_session is enabled",
                ));
            }
        }

        if selected(StepId::RemoteDesktop) {
            validate_package_set("remote_desktop", &self.remote_desktop)?;
        }

        if selected(StepId::Ide) {
            validate_url("ide.url", &self.ide.url)?;
            let dir = self.ide.install_dir_name.as_str();
            if dir.is_empty() || dir.contains('/') || dir == "." || dir == ".." {
                return Err(ProvisionError::validation(
                    "ide.install_dir_name must be a single directory name",
                ));
            }
        }

        if selected(StepId::Numlock) {
            validate_package_name(&self.numlock.package)?;
            require_absolute("numlock.rc_local", &self.numlock.rc_local)?;
            require_absolute("numlock.xinitrc", &self.numlock.xinitrc)?;
            require_single_line("numlock.rc_local_line", &self.numlock.rc_local_line)?;
            require_single_line("numlock.xinitrc_line", &self.numlock.xinitrc_line)?;
        }

        if selected(StepId::JavaHome) {
            require_absolute("java_home.environment_file", &self.java_home.environment_file)?;
            let value = self.java_home.value.trim();
            if value.is_empty() {
                return Err(ProvisionError::validation("java_home.value must not be empty"));
            }
            if value.contains('"') {
                return Err(ProvisionError::validation(
                    "java_home.value must not contain double quotes",
                ));
            }
            require_single_line("java_home.value", value)?;
        }

        Ok(())
    }
}

/// The staging parent must not be `/`, sit inside the CUDA prefix, or
/// contain the CUDA prefix or the home directory
fn validate_staging_dir(staging: &Path, cuda_prefix: &Path, home: Option<&Path>) -> Result<()> {
    if staging.parent().is_none() {
        return Err(ProvisionError::validation(
            "gpu_ml.staging_dir must not be the root directory",
        ));
    }
    if staging.starts_with(cuda_prefix) || cuda_prefix.starts_with(staging) {
        return Err(ProvisionError::validation(
            "gpu_ml.staging_dir must be outside gpu_ml.cuda_prefix and must not contain it",
        ));
    }
    if let Some(home) = home {
        if home.starts_with(staging) {
            return Err(ProvisionError::validation(format!(
                "gpu_ml.staging_dir must not contain the home directory {}",
                home.display()
            )));
        }
    }
    Ok(())
}

fn validate_package_set(section: &str, set: &PackageSetConfig) -> Result<()> {
    if set.packages.is_empty() {
        return Err(ProvisionError::validation(format!(
            "{}.packages must not be empty",
            section
        )));
    }
    for package in &set.packages {
        validate_package_name(package)?;
    }
    if let Some(repo) = &set.repository {
        if repo.trim().is_empty() {
            return Err(ProvisionError::validation(format!(
                "{}.repository must not be blank",
                section
            )));
        }
        require_single_line(&format!("{}.repository", section), repo)?;
    }
    Ok(())
}

/// Package names are passed as arguments, so reject anything that could be
/// read as a flag or smuggle shell syntax.
fn validate_package_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+' | ':' | '=' | '<' | '>'));
    if valid {
        Ok(())
    } else {
        Err(ProvisionError::validation(format!("Invalid package name {:?}", name)))
    }
}

fn validate_url(field: &str, url: &str) -> Result<()> {
    let url = url.trim();
    if (url.starts_with("http://") || url.starts_with("https://")) && !url.contains(char::is_whitespace) {
        Ok(())
    } else {
        Err(ProvisionError::validation(format!(
            "{} must be an http:// or https:// URL",
            field
        )))
    }
}

/// `UTC`, or `Region/City` with each part starting uppercase.
fn validate_timezone(tz: &str) -> Result<()> {
    if tz == "UTC" {
        return Ok(());
    }
    let parts: Vec<&str> = tz.split('/').collect();
    let valid = parts.len() >= 2
        && parts.iter().all(|p| {
            p.chars().next().is_some_and(|c| c.is_ascii_uppercase())
                && p.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'))
        });
    if valid {
        Ok(())
    } else {
        Err(ProvisionError::validation(format!(
            "Timezone {:?} is not of the form Region/City",
            tz
        )))
    }
}

fn require_absolute(field: &str, path: &Path) -> Result<()> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(ProvisionError::validation(format!(
            "{} must be an absolute path, got {:?}",
            field, path
        )))
    }
}

fn require_single_line(field: &str, value: &str) -> Result<()> {
    if value.contains('\n') || value.contains('\r') {
        Err(ProvisionError::validation(format!("{} must be a single line", field)))
    } else {
        Ok(())
    }
}
