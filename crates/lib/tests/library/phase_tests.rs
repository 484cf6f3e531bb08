//! Phase items: parent layers, RPM transactions and path removal.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use layerc_lib::config::RpmInstaller;
use layerc_lib::execute::{BuildError, build_layer};
use layerc_lib::item::{
  Item, ItemError, MakeDirsItem, ParentLayerItem, PhaseOrder, RemovePathAction, RemovePathItem, RpmAction, RpmActionItem,
};
use layerc_lib::subvol::SubvolError;

use super::common::{RecordingRunner, TestEnv, read};

#[test]
fn parent_layer_contents_satisfy_requirements() {
  let env = TestEnv::new();
  let parent = env.parent_layer("base", &[("usr/lib/os-release", "ID=test\n"), ("etc/motd", "hi\n")]);
  let opts = env.opts("//app:child");

  let items = vec![
    Item::MakeDirs(MakeDirsItem::new("//app:dirs", "/usr/lib", "app").unwrap()),
    Item::RemovePath(RemovePathItem::new("//app:clean", "/etc/motd", RemovePathAction::AssertExists).unwrap()),
    Item::ParentLayer(ParentLayerItem::new("//base:base", &parent).unwrap()),
  ];
  build_layer(items, Path::new("child"), &opts, &RecordingRunner::succeeding()).unwrap();

  let layer = env.layer("child");
  assert!(layer.join("usr/lib/app").is_dir());
  assert_eq!(read(&layer.join("usr/lib/os-release")), "ID=test\n");
  assert!(!layer.join("etc/motd").exists());
  // The parent is untouched.
  assert!(parent.join("etc/motd").exists());
}

#[test]
fn missing_path_removal_fails_the_phase() {
  let env = TestEnv::new();
  let parent = env.parent_layer("base", &[]);
  let opts = env.opts("//app:child");
  let items = vec![
    Item::ParentLayer(ParentLayerItem::new("//base:base", &parent).unwrap()),
    Item::RemovePath(RemovePathItem::new("//app:clean", "/etc/motd", RemovePathAction::AssertExists).unwrap()),
  ];

  let err = build_layer(items, Path::new("child"), &opts, &RecordingRunner::succeeding()).unwrap_err();
  assert!(matches!(
    err,
    BuildError::Phase {
      phase: PhaseOrder::RemovePaths,
      ..
    }
  ));
}

#[test]
fn host_symlinks_from_a_parent_layer_resolve_inside_the_layer() {
  let env = TestEnv::new();
  let outside = env.temp.path().join("outside");
  fs::create_dir(&outside).unwrap();
  let parent = env.parent_layer("base", &[]);
  // Mirror the host path so the link reads as a directory inside the layer.
  let mirrored = outside.strip_prefix("/").unwrap();
  fs::create_dir_all(parent.join(mirrored)).unwrap();
  symlink(&outside, parent.join("link")).unwrap();
  let opts = env.opts("//app:child");

  let items = vec![
    Item::ParentLayer(ParentLayerItem::new("//base:base", &parent).unwrap()),
    Item::MakeDirs(MakeDirsItem::new("//app:dirs", "/link", "made").unwrap()),
  ];
  build_layer(items, Path::new("child"), &opts, &RecordingRunner::succeeding()).unwrap();

  assert!(!outside.join("made").exists());
  assert!(env.layer("child").join(mirrored).join("made").is_dir());
}

#[test]
fn removal_through_a_link_leaving_the_layer_fails() {
  let env = TestEnv::new();
  let victim = env.write_file("victim", "keep me");
  let parent = env.parent_layer("base", &[]);
  symlink("../..", parent.join("up")).unwrap();
  let opts = env.opts("//app:child");

  let items = vec![
    Item::ParentLayer(ParentLayerItem::new("//base:base", &parent).unwrap()),
    Item::RemovePath(RemovePathItem::new("//app:clean", "/up/victim", RemovePathAction::IfExists).unwrap()),
  ];
  let err = build_layer(items, Path::new("child"), &opts, &RecordingRunner::succeeding()).unwrap_err();
  assert!(
    matches!(
      err,
      BuildError::Phase {
        phase: PhaseOrder::RemovePaths,
        source: ItemError::Subvol(SubvolError::Escapes { .. }),
      }
    ),
    "{err:?}"
  );
  assert_eq!(read(&victim), "keep me");
}

#[test]
fn rpm_phase_without_installer_fails_before_mutation() {
  let env = TestEnv::new();
  let opts = env.opts("//app:layer");
  let runner = RecordingRunner::succeeding();
  let items = vec![Item::RpmAction(RpmActionItem::new("//app:rpms", "jq", RpmAction::Install).unwrap())];

  let err = build_layer(items, Path::new("layer"), &opts, &runner).unwrap_err();
  assert!(err.to_string().contains("build_appliance"), "{err}");
  assert!(!env.layer("layer").exists());
  assert!(runner.requests.borrow().is_empty());
}

#[test]
fn rpm_phases_run_in_the_build_appliance() {
  let env = TestEnv::new();
  let appliance = env.parent_layer("appliance", &[]);
  let mut opts = env.opts("//app:layer");
  opts.build_appliance = Some(appliance.clone());
  opts.rpm_installer = Some(RpmInstaller::Dnf);

  let runner = RecordingRunner::succeeding();
  let items = vec![
    Item::RpmAction(RpmActionItem::new("//app:rpms", "vim-minimal", RpmAction::Remove).unwrap()),
    Item::RpmAction(RpmActionItem::new("//app:rpms", "jq", RpmAction::Install).unwrap()),
    Item::RpmAction(RpmActionItem::new("//app:rpms", "curl", RpmAction::Install).unwrap()),
  ];
  build_layer(items, Path::new("layer"), &opts, &runner).unwrap();

  let requests = runner.requests.borrow();
  assert_eq!(requests.len(), 2);
  assert_eq!(requests[0].root, appliance);
  let install = &requests[0].cmd;
  assert_eq!(&install[install.len() - 3..], ["install", "curl", "jq"]);
  let remove = &requests[1].cmd;
  assert_eq!(&remove[remove.len() - 2..], ["remove", "vim-minimal"]);

  let layer: PathBuf = env.layer("layer");
  assert!(requests[0].binds.iter().any(|b| b.source == layer && !b.readonly));
}

#[test]
fn failed_rpm_transaction_reports_stderr() {
  let env = TestEnv::new();
  let appliance = env.parent_layer("appliance", &[]);
  let mut opts = env.opts("//app:layer");
  opts.build_appliance = Some(appliance);
  opts.rpm_installer = Some(RpmInstaller::Yum);

  let items = vec![Item::RpmAction(RpmActionItem::new("//app:rpms", "jq", RpmAction::Install).unwrap())];
  let err = build_layer(items, Path::new("layer"), &opts, &RecordingRunner::failing(1)).unwrap_err();

  assert!(matches!(err, BuildError::Phase { .. }));
  assert!(err.to_string().contains("simulated failure"), "{err}");
  assert!(fs::metadata(env.layer("layer")).unwrap().is_dir());
}
