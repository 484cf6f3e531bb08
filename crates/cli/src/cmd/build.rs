//! Implementation of the layer build.
//!
//! Loads the feature JSON, builds the layer and prints its descriptor. Staged
//! feature inputs are released only after the layer is finalized.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use layerc_lib::config::{LayerOpts, RpmInstaller, make_target_path_map};
use layerc_lib::execute::{CleanupStack, build_layer};
use layerc_lib::feature::items_from_feature_paths;
use layerc_lib::sandbox::NspawnRunner;
use layerc_lib::subvol::SubvolumeOnDisk;

use crate::output::{print_json, print_success};

/// Everything the build needs from the command line.
#[derive(Debug, Default)]
pub struct BuildArgs {
  pub subvolumes_dir: PathBuf,
  pub subvolume_rel_path: PathBuf,
  pub build_appliance: Option<PathBuf>,
  pub rpm_installer: Option<RpmInstaller>,
  pub rpm_repo_snapshot: Option<PathBuf>,
  pub preserve_yum_dnf_cache: bool,
  pub artifacts_may_require_repo: bool,
  pub layer_target: String,
  pub feature_json: Vec<PathBuf>,
  pub dependencies: Vec<String>,
  pub allowed_host_mount_targets: Vec<String>,
  pub debug: bool,
}

impl BuildArgs {
  fn layer_opts(&self) -> Result<LayerOpts> {
    let subvolumes_dir = dunce::canonicalize(&self.subvolumes_dir)
      .with_context(|| format!("subvolumes dir {} does not exist", self.subvolumes_dir.display()))?;
    let build_appliance = self.build_appliance.as_deref().map(resolve_layer).transpose()?;
    let target_to_path = make_target_path_map(&self.dependencies).map_err(|e| anyhow!("--child-dependencies: {e}"))?;

    Ok(LayerOpts {
      layer_target: self.layer_target.clone(),
      build_appliance,
      rpm_installer: self.rpm_installer,
      rpm_repo_snapshot: self.rpm_repo_snapshot.clone(),
      preserve_yum_dnf_cache: self.preserve_yum_dnf_cache,
      artifacts_may_require_repo: self.artifacts_may_require_repo,
      target_to_path,
      subvolumes_dir,
      debug: self.debug,
      allowed_host_mount_targets: self.allowed_host_mount_targets.iter().cloned().collect(),
    })
  }
}

/// A layer given either as its directory or as the descriptor its build
/// printed.
fn resolve_layer(path: &Path) -> Result<PathBuf> {
  if path.is_dir() {
    return Ok(path.to_path_buf());
  }
  let content = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
  let desc: SubvolumeOnDisk =
    serde_json::from_str(&content).with_context(|| format!("{} is not a layer descriptor", path.display()))?;
  Ok(desc.subvolume_path())
}

/// Build the layer described by `args` and print its descriptor.
pub fn cmd_build(args: BuildArgs) -> Result<()> {
  let opts = args.layer_opts()?;
  debug!(?opts, "layer options");

  let mut cleanup = CleanupStack::new();
  let items = items_from_feature_paths(&args.feature_json, &opts, &mut cleanup).context("failed to load features")?;

  let runner = NspawnRunner::default();
  let desc = build_layer(items, &args.subvolume_rel_path, &opts, &runner)
    .with_context(|| format!("failed to build {}", opts.layer_target))?;

  // The layer is read-only by now, so releasing inputs cannot alter it.
  cleanup.close().context("failed to release build inputs")?;

  info!(path = %desc.subvolume_path().display(), "layer ready");
  print_json(&desc)?;
  print_success(&format!("built {}", opts.layer_target));
  Ok(())
}
