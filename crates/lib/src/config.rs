//! Per-run layer configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Supported RPM package managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpmInstaller {
  Yum,
  Dnf,
}

impl RpmInstaller {
  pub fn as_str(self) -> &'static str {
    match self {
      RpmInstaller::Yum => "yum",
      RpmInstaller::Dnf => "dnf",
    }
  }
}

impl fmt::Display for RpmInstaller {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for RpmInstaller {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "yum" => Ok(RpmInstaller::Yum),
      "dnf" => Ok(RpmInstaller::Dnf),
      other => Err(format!("unsupported RPM installer {other:?}, expected `yum` or `dnf`")),
    }
  }
}

/// Immutable options threaded to every phase builder and item build.
///
/// Constructed once per run from command-line arguments; never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerOpts {
  /// Name of the target describing the layer being built.
  pub layer_target: String,

  /// Prebuilt layer used as the root for sandboxed commands.
  pub build_appliance: Option<PathBuf>,

  pub rpm_installer: Option<RpmInstaller>,

  /// Snapshot directory inside the build appliance. Defaults to the
  /// per-installer snapshot symlink.
  pub rpm_repo_snapshot: Option<PathBuf>,

  /// Keep `/var/cache/{yum,dnf}` in the layer after RPM transactions.
  pub preserve_yum_dnf_cache: bool,

  /// Build artifacts are not standalone and need the repo mounted at runtime.
  pub artifacts_may_require_repo: bool,

  /// External target name -> on-disk output path.
  pub target_to_path: BTreeMap<String, PathBuf>,

  pub subvolumes_dir: PathBuf,

  pub debug: bool,

  /// Targets that may act as host-mount sources.
  pub allowed_host_mount_targets: BTreeSet<String>,
}

impl LayerOpts {
  pub fn new(layer_target: impl Into<String>, subvolumes_dir: impl Into<PathBuf>) -> Self {
    Self {
      layer_target: layer_target.into(),
      subvolumes_dir: subvolumes_dir.into(),
      ..Default::default()
    }
  }

  /// The snapshot directory to install RPMs from.
  pub fn rpm_snapshot_dir(&self, installer: RpmInstaller) -> PathBuf {
    self.rpm_repo_snapshot.clone().unwrap_or_else(|| {
      PathBuf::from(crate::consts::DEFAULT_SNAPSHOT_ROOT).join(installer.as_str())
    })
  }
}

/// Pair up `TARGET PATH TARGET PATH ...` into a target map.
pub fn make_target_path_map(targets_followed_by_paths: &[String]) -> Result<BTreeMap<String, PathBuf>, String> {
  if targets_followed_by_paths.len() % 2 != 0 {
    return Err(format!(
      "odd-length target/path list: {:?}",
      targets_followed_by_paths
    ));
  }
  Ok(
    targets_followed_by_paths
      .chunks(2)
      .map(|pair| (pair[0].clone(), PathBuf::from(&pair[1])))
      .collect(),
  )
}
