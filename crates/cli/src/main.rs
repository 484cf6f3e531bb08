//! `layerc`: compile feature JSON into a read-only image layer.
//!
//! The layer is created at `<--subvolumes-dir>/<--subvolume-rel-path>`. On
//! success its JSON descriptor is printed to stdout; logs go to stderr.

mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use layerc_lib::config::RpmInstaller;
use tracing_subscriber::EnvFilter;

use cmd::{BuildArgs, cmd_build};
use output::print_error;

#[derive(Parser)]
#[command(name = "layerc")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Directory holding compiled layers
  #[arg(long)]
  subvolumes_dir: PathBuf,

  /// Where to create the new layer, relative to --subvolumes-dir. All
  /// components but the last must already exist.
  #[arg(long)]
  subvolume_rel_path: PathBuf,

  /// Layer directory, or its JSON descriptor, used as the root for RPM
  /// transactions
  #[arg(long)]
  build_appliance: Option<PathBuf>,

  /// RPM package manager to run inside the build appliance (yum or dnf)
  #[arg(long)]
  rpm_installer: Option<RpmInstaller>,

  /// Snapshot directory inside the build appliance
  #[arg(long)]
  rpm_repo_snapshot: Option<PathBuf>,

  /// Keep /var/cache/{yum,dnf} in the layer
  #[arg(long)]
  preserve_yum_dnf_cache: bool,

  /// Build artifacts need the repo mounted at runtime
  #[arg(long)]
  artifacts_may_require_repo: bool,

  /// Name of the target describing the layer being built
  #[arg(long)]
  child_layer_target: String,

  /// Feature JSON directly included by the layer (repeatable)
  #[arg(long)]
  child_feature_json: Vec<PathBuf>,

  /// Alternating target names and their on-disk outputs
  #[arg(long, num_args = 0.., value_names = ["TARGET", "PATH"])]
  child_dependencies: Vec<String>,

  /// Target allowed to provide host mounts (repeatable)
  #[arg(long)]
  allowed_host_mount_target: Vec<String>,

  /// Log more
  #[arg(long)]
  debug: bool,
}

fn init_logging(debug: bool) {
  let default = if debug { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_logging(cli.debug);

  let args = BuildArgs {
    subvolumes_dir: cli.subvolumes_dir,
    subvolume_rel_path: cli.subvolume_rel_path,
    build_appliance: cli.build_appliance,
    rpm_installer: cli.rpm_installer,
    rpm_repo_snapshot: cli.rpm_repo_snapshot,
    preserve_yum_dnf_cache: cli.preserve_yum_dnf_cache,
    artifacts_may_require_repo: cli.artifacts_may_require_repo,
    layer_target: cli.child_layer_target,
    feature_json: cli.child_feature_json,
    dependencies: cli.child_dependencies,
    allowed_host_mount_targets: cli.allowed_host_mount_target,
    debug: cli.debug,
  };

  match cmd_build(args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}
