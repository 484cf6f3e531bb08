use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ItemError, PhaseOrder, io_err};
use crate::config::{LayerOpts, RpmInstaller};
use crate::consts::{INSTALL_ROOT, RPM_MOUNT_DIR, YUM_DNF_FROM_SNAPSHOT};
use crate::sandbox::{BindMount, ProcessRunner, RunRequest};
use crate::subvol::Subvol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpmAction {
  Install,
  Remove,
}

impl fmt::Display for RpmAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RpmAction::Install => write!(f, "rpm_install"),
      RpmAction::Remove => write!(f, "rpm_remove"),
    }
  }
}

impl RpmAction {
  fn verb(self) -> &'static str {
    match self {
      RpmAction::Install => "install",
      RpmAction::Remove => "remove",
    }
  }
}

/// Install or remove one RPM, by package name or, for installs, by the path
/// of a local `.rpm` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpmActionItem {
  pub from_target: String,
  pub name: String,
  pub action: RpmAction,
}

impl RpmActionItem {
  pub fn new(from_target: impl Into<String>, name: &str, action: RpmAction) -> Result<Self, ItemError> {
    if name.trim().is_empty() || name.chars().any(char::is_whitespace) {
      return Err(ItemError::Invalid(format!("invalid RPM name {name:?}")));
    }
    if name.contains('/') {
      if action == RpmAction::Remove {
        return Err(ItemError::Invalid(format!("can only remove RPMs by name, got {name}")));
      }
      if !Path::new(name).is_file() {
        return Err(ItemError::MissingSource(PathBuf::from(name)));
      }
    }
    Ok(Self {
      from_target: from_target.into(),
      name: name.to_string(),
      action,
    })
  }

  pub fn phase_order(&self) -> PhaseOrder {
    match self.action {
      RpmAction::Install => PhaseOrder::RpmInstall,
      RpmAction::Remove => PhaseOrder::RpmRemove,
    }
  }

  /// Local package files are named by path, repo packages by name.
  pub fn local_path(&self) -> Option<&Path> {
    self.name.contains('/').then(|| Path::new(&self.name))
  }
}

/// One package-manager transaction covering every item of a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpmTransaction {
  pub action: RpmAction,
  pub installer: RpmInstaller,
  pub build_appliance: PathBuf,
  pub snapshot_dir: PathBuf,
  pub preserve_cache: bool,
  /// Repo package names, plus in-container paths of local files.
  pub names: Vec<String>,
  pub local_rpms: Vec<BindMount>,
}

impl RpmTransaction {
  /// Everything is validated here, before any phase touches the layer.
  pub fn new(action: RpmAction, items: &[&RpmActionItem], opts: &LayerOpts) -> Result<Self, ItemError> {
    let build_appliance = opts
      .build_appliance
      .clone()
      .ok_or(ItemError::MissingOption("build_appliance"))?;
    let installer = opts.rpm_installer.ok_or(ItemError::MissingOption("rpm_installer"))?;

    let mut names = Vec::new();
    let mut local_rpms = Vec::new();
    for item in items {
      match item.local_path() {
        Some(path) => {
          let file_name = path
            .file_name()
            .ok_or_else(|| ItemError::Invalid(format!("bad RPM path {}", item.name)))?;
          let dest = Path::new(RPM_MOUNT_DIR).join(file_name);
          names.push(dest.display().to_string());
          local_rpms.push(BindMount::ro(path, dest));
        }
        None => names.push(item.name.clone()),
      }
    }
    names.sort();
    names.dedup();

    Ok(Self {
      action,
      installer,
      snapshot_dir: opts.rpm_snapshot_dir(installer),
      build_appliance,
      preserve_cache: opts.preserve_yum_dnf_cache,
      names,
      local_rpms,
    })
  }

  pub fn request(&self, subvol: &Subvol) -> RunRequest {
    let snapshot = self.snapshot_dir.display().to_string();
    let mut cmd = vec![
      self.snapshot_dir.join(YUM_DNF_FROM_SNAPSHOT).display().to_string(),
      "--snapshot-dir".to_string(),
      snapshot,
      self.installer.to_string(),
      "--".to_string(),
      "--assumeyes".to_string(),
      "--installroot".to_string(),
      INSTALL_ROOT.to_string(),
      self.action.verb().to_string(),
    ];
    cmd.extend(self.names.iter().cloned());

    let mut request =
      RunRequest::new(&self.build_appliance, cmd).bind(BindMount::rw(subvol.path(), INSTALL_ROOT));
    request.binds.extend(self.local_rpms.iter().cloned());
    request
  }

  pub fn run(&self, subvol: &Subvol, runner: &dyn ProcessRunner) -> Result<(), ItemError> {
    info!(action = %self.action, installer = %self.installer, count = self.names.len(), "running RPM transaction");
    let request = self.request(subvol);
    runner.run(&request)?.check(&request)?;

    if !self.preserve_cache {
      let cache = subvol.path().join("var/cache").join(self.installer.as_str());
      if cache.exists() {
        debug!(path = %cache.display(), "dropping package manager cache");
        fs::remove_dir_all(&cache).map_err(io_err(&cache))?;
      }
    }
    Ok(())
  }
}
