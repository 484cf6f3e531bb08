//! End-to-end layer builds from typed items.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use layerc_lib::execute::{BuildError, build_layer};
use layerc_lib::graph::GraphError;
use layerc_lib::item::{InstallFileItem, Item, MakeDirsItem, SymlinkItem, TarballItem};
use layerc_lib::subvol::{Subvol, SubvolumeOnDisk};

use super::common::{RecordingRunner, TestEnv, read};

fn tarball(env: &TestEnv) -> std::path::PathBuf {
  let path = env.temp.path().join("pkg.tar.gz");
  let file = fs::File::create(&path).unwrap();
  let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
  let mut builder = tar::Builder::new(gz);

  let mut header = tar::Header::new_gnu();
  header.set_entry_type(tar::EntryType::Directory);
  header.set_mode(0o755);
  header.set_size(0);
  builder.append_data(&mut header, "pkg/", std::io::empty()).unwrap();

  let body = b"#!/bin/sh\necho hi\n";
  let mut header = tar::Header::new_gnu();
  header.set_mode(0o755);
  header.set_size(body.len() as u64);
  builder.append_data(&mut header, "pkg/run.sh", &body[..]).unwrap();

  builder.into_inner().unwrap().finish().unwrap();
  path
}

#[test]
fn builds_and_finalizes_a_layer() {
  let env = TestEnv::new();
  let opts = env.opts("//app:layer");
  let conf = env.write_file("src/app.conf", "port = 80\n");
  let archive = tarball(&env);

  let items = vec![
    Item::Symlink(SymlinkItem::to_file("//app:links", "/opt/pkg/run.sh", "/usr/bin/run").unwrap()),
    Item::InstallFile(InstallFileItem::new("//app:conf", &conf, "/etc/app/app.conf").unwrap()),
    Item::Tarball(TarballItem::new("//app:pkg", &archive, "/opt", true).unwrap()),
    Item::MakeDirs(MakeDirsItem::new("//app:dirs", "/", "etc/app").unwrap()),
    Item::MakeDirs(MakeDirsItem::new("//app:dirs", "/", "opt").unwrap()),
    Item::MakeDirs(MakeDirsItem::new("//app:dirs", "/", "usr/bin").unwrap()),
  ];

  let desc = build_layer(items, Path::new("app:layer"), &opts, &RecordingRunner::succeeding()).unwrap();
  let layer = env.layer("app:layer");

  assert_eq!(desc.layer_target, "//app:layer");
  assert_eq!(desc.subvolume_path(), fs::canonicalize(&layer).unwrap());
  assert_eq!(read(&layer.join("etc/app/app.conf")), "port = 80\n");
  assert!(read(&layer.join("opt/pkg/run.sh")).contains("echo hi"));
  assert_eq!(
    fs::read_link(layer.join("usr/bin/run")).unwrap(),
    Path::new("../../opt/pkg/run.sh")
  );
  assert!(layer.join(".meta").is_dir());

  let mode = fs::metadata(layer.join("etc/app/app.conf")).unwrap().permissions().mode();
  assert_eq!(mode & 0o222, 0);
  assert!(Subvol::new(&layer).is_readonly().unwrap());

  let json = desc.to_json().unwrap();
  let parsed: SubvolumeOnDisk = serde_json::from_str(&json).unwrap();
  assert_eq!(parsed, desc);
}

#[test]
fn conflicting_items_never_touch_the_disk() {
  let env = TestEnv::new();
  let opts = env.opts("//app:layer");
  let a = env.write_file("src/a", "a");
  let b = env.write_file("src/b", "b");

  let items = vec![
    Item::InstallFile(InstallFileItem::new("//app:a", &a, "/motd").unwrap()),
    Item::InstallFile(InstallFileItem::new("//app:b", &b, "/motd").unwrap()),
  ];

  let err = build_layer(items, Path::new("app:layer"), &opts, &RecordingRunner::succeeding()).unwrap_err();
  match err {
    BuildError::Graph(GraphError::Conflict { path, .. }) => assert_eq!(path, "/motd"),
    other => panic!("expected conflict, got {other}"),
  }
  assert!(!env.layer("app:layer").exists());
}

#[test]
fn copied_trees_on_one_path_never_touch_the_disk() {
  let env = TestEnv::new();
  let opts = env.opts("//app:layer");
  env.write_file("trees/a/bin/tool", "a");
  env.write_file("trees/b/bin/tool", "b");
  let trees = env.temp.path().join("trees");

  let items = vec![
    Item::MakeDirs(MakeDirsItem::new("//app:dirs", "/", "opt").unwrap()),
    Item::InstallFile(InstallFileItem::new("//app:a", trees.join("a"), "/opt/tool").unwrap()),
    Item::InstallFile(InstallFileItem::new("//app:b", trees.join("b"), "/opt/tool").unwrap()),
  ];

  let err = build_layer(items, Path::new("app:layer"), &opts, &RecordingRunner::succeeding()).unwrap_err();
  match err {
    BuildError::Graph(GraphError::Conflict { path, .. }) => assert_eq!(path, "/opt/tool"),
    other => panic!("expected conflict, got {other}"),
  }
  assert!(!env.layer("app:layer").exists());
}

#[test]
fn unsatisfied_requirement_leaves_layer_writable() {
  let env = TestEnv::new();
  let opts = env.opts("//app:layer");
  let src = env.write_file("src/x", "x");
  let items = vec![Item::InstallFile(InstallFileItem::new("//app:x", &src, "/missing/x").unwrap())];

  let err = build_layer(items, Path::new("app:layer"), &opts, &RecordingRunner::succeeding()).unwrap_err();
  assert!(matches!(err, BuildError::Graph(GraphError::Unsatisfied { .. })));

  let layer = env.layer("app:layer");
  assert!(layer.is_dir());
  assert!(!Subvol::new(&layer).is_readonly().unwrap());
}

#[test]
fn cycles_are_reported_with_their_chain() {
  let env = TestEnv::new();
  let opts = env.opts("//app:layer");
  let items = vec![
    Item::Symlink(SymlinkItem::to_dir("//app:a", "/b", "/a").unwrap()),
    Item::Symlink(SymlinkItem::to_dir("//app:b", "/a", "/b").unwrap()),
  ];

  let err = build_layer(items, Path::new("app:layer"), &opts, &RecordingRunner::succeeding()).unwrap_err();
  let message = err.to_string();
  assert!(message.contains("dependency cycle"), "{message}");
  assert!(message.contains("//app:a") && message.contains("//app:b"), "{message}");
}

#[test]
fn changed_tarball_is_refused() {
  let env = TestEnv::new();
  let opts = env.opts("//app:layer");
  let archive = tarball(&env);
  let item = TarballItem::new("//app:pkg", &archive, "/", true).unwrap();

  let mut bytes = fs::read(&archive).unwrap();
  bytes.push(0);
  fs::write(&archive, bytes).unwrap();

  let err = build_layer(vec![Item::Tarball(item)], Path::new("app:layer"), &opts, &RecordingRunner::succeeding())
    .unwrap_err();
  assert!(err.to_string().contains("changed"), "{err}");
}
