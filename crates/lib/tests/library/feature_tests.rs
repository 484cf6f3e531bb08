//! Builds driven by feature JSON, including inline contents and cleanup.

use std::path::Path;

use layerc_lib::execute::{CleanupStack, build_layer};
use layerc_lib::feature::{FeatureError, items_from_feature_paths};

use super::common::{RecordingRunner, TestEnv, read};

#[test]
fn feature_json_builds_a_layer() {
  let env = TestEnv::new();
  env.write_file("tools/bin/hello", "#!/bin/sh\necho hello\n");
  let feature = env.write_file(
    "features/app.json",
    r#"{
      "target": "//app:feature",
      "items": [
        {"type": "install_file", "source": {"target": "//tools:tools", "path": "bin/hello"}, "dest": "/usr/bin/hello", "mode": "0755"},
        {"type": "make_dirs", "into_dir": "/", "path_to_make": "usr/bin"},
        {"type": "symlink_to_file", "source": "/usr/bin/hello", "dest": "/hello"}
      ]
    }"#,
  );
  let mut opts = env.opts("//app:layer");
  opts.target_to_path.insert("//tools:tools".into(), env.temp.path().join("tools"));

  let mut cleanup = CleanupStack::new();
  let items = items_from_feature_paths(&[feature], &opts, &mut cleanup).unwrap();
  assert_eq!(items.len(), 3);

  build_layer(items, Path::new("app"), &opts, &RecordingRunner::succeeding()).unwrap();
  cleanup.close().unwrap();

  let layer = env.layer("app");
  assert!(read(&layer.join("usr/bin/hello")).contains("echo hello"));
  assert_eq!(read(&layer.join("hello")), read(&layer.join("usr/bin/hello")));
}

#[test]
fn cleanup_runs_after_finalize() {
  let env = TestEnv::new();
  let feature = env.write_file(
    "features/motd.json",
    r#"{"target": "//app:motd", "items": [{"type": "install_file", "content": "welcome\n", "dest": "/motd"}]}"#,
  );
  let opts = env.opts("//app:layer");

  let mut cleanup = CleanupStack::new();
  let items = items_from_feature_paths(&[feature], &opts, &mut cleanup).unwrap();
  let staged = match &items[0] {
    layerc_lib::item::Item::InstallFile(install) => install.source.clone(),
    other => panic!("unexpected {other}"),
  };
  assert!(staged.exists());

  build_layer(items, Path::new("motd"), &opts, &RecordingRunner::succeeding()).unwrap();
  assert!(staged.exists());
  cleanup.close().unwrap();

  assert!(!staged.exists());
  assert_eq!(read(&env.layer("motd").join("motd")), "welcome\n");
}

#[test]
fn malformed_feature_is_reported_with_its_path() {
  let env = TestEnv::new();
  let feature = env.write_file("features/bad.json", r#"{"target": "//bad:bad", "items": [{"type": "teleport"}]}"#);
  let opts = env.opts("//app:layer");

  let err = items_from_feature_paths(&[feature.clone()], &opts, &mut CleanupStack::new()).unwrap_err();
  match err {
    FeatureError::Parse { path, .. } => assert_eq!(path, feature),
    other => panic!("expected parse error, got {other}"),
  }
}
