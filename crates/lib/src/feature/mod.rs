//! Feature registry: turns feature JSON into typed build items.
//!
//! Declarations are converted in the order they appear, depth first through
//! nested features. Sources naming another target are resolved through
//! [`LayerOpts::target_to_path`]; inline file contents are staged in a
//! scratch directory owned by the run's [`CleanupStack`].

mod types;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::LayerOpts;
use crate::execute::CleanupStack;
use crate::item::{
  CloneItem, InstallFileItem, Item, ItemError, MakeDirsItem, ParentLayerItem, RemovePathItem, RpmAction, RpmActionItem,
  SymlinkItem, TarballItem,
};
use crate::path::{ImagePath, PathError};
use crate::subvol::SubvolumeOnDisk;

pub use types::{Feature, ItemSpec, Mode, Source};

/// File name of a feature's JSON inside a target output directory.
pub const FEATURE_JSON: &str = "feature.json";

#[derive(Debug, Error)]
pub enum FeatureError {
  #[error("failed to read feature {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("{feature} refers to unknown target {target}")]
  UnknownTarget { feature: String, target: String },

  #[error("{feature} may not use host mount {target}")]
  HostMountNotAllowed { feature: String, target: String },

  #[error("{feature}: install to {dest} needs exactly one of source or content")]
  InstallSource { feature: String, dest: String },

  #[error("{feature}: {message}")]
  Invalid { feature: String, message: String },

  #[error("{feature}: {source}")]
  Item {
    feature: String,
    #[source]
    source: ItemError,
  },

  #[error("{feature}: {source}")]
  Path {
    feature: String,
    #[source]
    source: PathError,
  },

  #[error("failed to stage inline content at {path}: {source}")]
  Stage {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Read one feature JSON file.
pub fn load_feature(path: &Path) -> Result<Feature, FeatureError> {
  let content = fs::read_to_string(path).map_err(|source| FeatureError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  serde_json::from_str(&content).map_err(|source| FeatureError::Parse {
    path: path.to_path_buf(),
    source,
  })
}

/// Load every file in `paths` and convert the features to items.
pub fn items_from_feature_paths(
  paths: &[PathBuf],
  opts: &LayerOpts,
  cleanup: &mut CleanupStack,
) -> Result<Vec<Item>, FeatureError> {
  let features = paths.iter().map(|p| load_feature(p)).collect::<Result<Vec<_>, _>>()?;
  items_from_features(features, opts, cleanup)
}

/// Convert `features`, and the features they include, to items.
pub fn items_from_features(
  features: Vec<Feature>,
  opts: &LayerOpts,
  cleanup: &mut CleanupStack,
) -> Result<Vec<Item>, FeatureError> {
  let mut registry = Registry {
    opts,
    cleanup,
    staging: None,
    staged: 0,
    added: BTreeSet::new(),
    items: Vec::new(),
  };
  for feature in &features {
    registry.add_feature(feature, &mut Vec::new())?;
  }
  info!(items = registry.items.len(), features = features.len(), "loaded features");
  Ok(registry.items)
}

struct Registry<'a> {
  opts: &'a LayerOpts,
  cleanup: &'a mut CleanupStack,
  /// Scratch directory for inline contents, created on first use.
  staging: Option<PathBuf>,
  staged: usize,
  /// Features already expanded; one reached twice contributes its items once.
  added: BTreeSet<String>,
  items: Vec<Item>,
}

impl Registry<'_> {
  fn add_feature(&mut self, feature: &Feature, stack: &mut Vec<String>) -> Result<(), FeatureError> {
    if stack.contains(&feature.target) {
      return Err(FeatureError::Invalid {
        feature: feature.target.clone(),
        message: format!("feature includes itself via {}", stack.join(" -> ")),
      });
    }
    if !self.added.insert(feature.target.clone()) {
      debug!(feature = %feature.target, "feature already added");
      return Ok(());
    }
    debug!(feature = %feature.target, items = feature.items.len(), "adding feature");

    for spec in &feature.items {
      let item = self.item(&feature.target, spec)?;
      self.items.push(item);
    }

    stack.push(feature.target.clone());
    for target in &feature.features {
      let output = self.target_path(&feature.target, target)?;
      let path = if output.is_dir() { output.join(FEATURE_JSON) } else { output };
      let nested = load_feature(&path)?;
      self.add_feature(&nested, stack)?;
    }
    stack.pop();
    Ok(())
  }

  fn target_path(&self, feature: &str, target: &str) -> Result<PathBuf, FeatureError> {
    self
      .opts
      .target_to_path
      .get(target)
      .cloned()
      .ok_or_else(|| FeatureError::UnknownTarget {
        feature: feature.to_string(),
        target: target.to_string(),
      })
  }

  fn resolve(&self, feature: &str, source: &Source) -> Result<PathBuf, FeatureError> {
    match source {
      Source::Path(path) => Ok(path.clone()),
      Source::Target {
        target,
        path,
        host_mount,
      } => {
        if *host_mount && !self.opts.allowed_host_mount_targets.contains(target) {
          return Err(FeatureError::HostMountNotAllowed {
            feature: feature.to_string(),
            target: target.clone(),
          });
        }
        let output = self.target_path(feature, target)?;
        match path {
          Some(rel) => {
            let rel = ImagePath::new(rel).map_err(|source| FeatureError::Path {
              feature: feature.to_string(),
              source,
            })?;
            Ok(rel.under(&output))
          }
          None => Ok(output),
        }
      }
    }
  }

  /// A layer source may point at the layer directory itself, or at the JSON
  /// descriptor the layer's build printed.
  fn resolve_layer(&self, feature: &str, source: &Source) -> Result<PathBuf, FeatureError> {
    let path = self.resolve(feature, source)?;
    if !path.is_file() {
      return Ok(path);
    }
    let content = fs::read_to_string(&path).map_err(|source| FeatureError::Read {
      path: path.clone(),
      source,
    })?;
    let desc: SubvolumeOnDisk = serde_json::from_str(&content).map_err(|source| FeatureError::Parse {
      path: path.clone(),
      source,
    })?;
    Ok(desc.subvolume_path())
  }

  /// Write `content` to a fresh file in the staging directory.
  fn stage(&mut self, content: &str) -> Result<PathBuf, FeatureError> {
    let dir = match &self.staging {
      Some(dir) => dir.clone(),
      None => {
        let temp = TempDir::new().map_err(|source| FeatureError::Stage {
          path: std::env::temp_dir(),
          source,
        })?;
        let dir = temp.path().to_path_buf();
        self.cleanup.hold("inline feature contents", temp);
        self.staging = Some(dir.clone());
        dir
      }
    };
    let path = dir.join(format!("content-{}", self.staged));
    self.staged += 1;
    fs::write(&path, content).map_err(|source| FeatureError::Stage {
      path: path.clone(),
      source,
    })?;
    Ok(path)
  }

  fn item(&mut self, feature: &str, spec: &ItemSpec) -> Result<Item, FeatureError> {
    let item_err = |source| FeatureError::Item {
      feature: feature.to_string(),
      source,
    };
    let mode_err = |message| FeatureError::Invalid {
      feature: feature.to_string(),
      message,
    };

    let item = match spec {
      ItemSpec::MakeDirs {
        into_dir,
        path_to_make,
        mode,
        user_group,
      } => {
        let mut item = MakeDirsItem::new(feature, into_dir, path_to_make).map_err(item_err)?;
        if let Some(mode) = mode {
          item = item.with_mode(mode.bits().map_err(mode_err)?).map_err(item_err)?;
        }
        if let Some(owner) = user_group {
          item = item.with_owner(owner).map_err(item_err)?;
        }
        Item::MakeDirs(item)
      }
      ItemSpec::InstallFile {
        source,
        content,
        dest,
        mode,
        user_group,
      } => {
        let host = match (source, content) {
          (Some(source), None) => self.resolve(feature, source)?,
          (None, Some(content)) => self.stage(content)?,
          _ => {
            return Err(FeatureError::InstallSource {
              feature: feature.to_string(),
              dest: dest.clone(),
            });
          }
        };
        let mut item = InstallFileItem::new(feature, host, dest).map_err(item_err)?;
        if let Some(mode) = mode {
          item = item.with_mode(mode.bits().map_err(mode_err)?).map_err(item_err)?;
        }
        if let Some(owner) = user_group {
          item = item.with_owner(owner).map_err(item_err)?;
        }
        Item::InstallFile(item)
      }
      ItemSpec::SymlinkToDir { source, dest } => {
        Item::Symlink(SymlinkItem::to_dir(feature, source, dest).map_err(item_err)?)
      }
      ItemSpec::SymlinkToFile { source, dest } => {
        Item::Symlink(SymlinkItem::to_file(feature, source, dest).map_err(item_err)?)
      }
      ItemSpec::Tarball {
        source,
        into_dir,
        force_root_ownership,
      } => {
        let host = self.resolve(feature, source)?;
        Item::Tarball(TarballItem::new(feature, host, into_dir, *force_root_ownership).map_err(item_err)?)
      }
      ItemSpec::Clone {
        source,
        source_path,
        dest,
        omit_outer_dir,
        pre_existing_dest,
      } => {
        let layer = self.resolve_layer(feature, source)?;
        Item::Clone(
          CloneItem::new(feature, layer, source_path, dest, *omit_outer_dir, *pre_existing_dest).map_err(item_err)?,
        )
      }
      ItemSpec::ParentLayer { source } => {
        let layer = self.resolve_layer(feature, source)?;
        Item::ParentLayer(ParentLayerItem::new(feature, layer).map_err(item_err)?)
      }
      ItemSpec::RpmInstall { name } => {
        Item::RpmAction(RpmActionItem::new(feature, name, RpmAction::Install).map_err(item_err)?)
      }
      ItemSpec::RpmRemove { name } => {
        Item::RpmAction(RpmActionItem::new(feature, name, RpmAction::Remove).map_err(item_err)?)
      }
      ItemSpec::RemovePath { path, action } => {
        Item::RemovePath(RemovePathItem::new(feature, path, *action).map_err(item_err)?)
      }
    };
    Ok(item)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::host_file;

  fn feature(json: &str) -> Feature {
    serde_json::from_str(json).unwrap()
  }

  #[test]
  fn keeps_declaration_order_across_features() {
    let temp = TempDir::new().unwrap();
    let src = host_file(temp.path(), "out/bin/tool", "#!/bin/sh\n");
    let mut opts = LayerOpts::new("//l:l", temp.path());
    opts.target_to_path.insert("//tools:out".into(), temp.path().join("out"));

    let features = vec![
      feature(
        r#"{"target": "//a:a", "items": [
          {"type": "make_dirs", "into_dir": "/", "path_to_make": "usr/bin"},
          {"type": "install_file", "source": {"target": "//tools:out", "path": "bin/tool"}, "dest": "/usr/bin/tool"}
        ]}"#,
      ),
      feature(r#"{"target": "//b:b", "items": [{"type": "symlink_to_file", "source": "/usr/bin/tool", "dest": "/tool"}]}"#),
    ];

    let mut cleanup = CleanupStack::new();
    let items = items_from_features(features, &opts, &mut cleanup).unwrap();
    let targets: Vec<&str> = items.iter().map(|i| i.from_target()).collect();
    assert_eq!(targets, vec!["//a:a", "//a:a", "//b:b"]);
    match &items[1] {
      Item::InstallFile(install) => assert_eq!(install.source, src),
      other => panic!("unexpected {other}"),
    }
    assert!(cleanup.is_empty());
  }

  #[test]
  fn unknown_target_is_an_error() {
    let temp = TempDir::new().unwrap();
    let opts = LayerOpts::new("//l:l", temp.path());
    let features = vec![feature(
      r#"{"target": "//a:a", "items": [{"type": "tarball", "source": {"target": "//nope:nope"}, "into_dir": "/"}]}"#,
    )];
    let err = items_from_features(features, &opts, &mut CleanupStack::new()).unwrap_err();
    assert!(matches!(err, FeatureError::UnknownTarget { target, .. } if target == "//nope:nope"));
  }

  #[test]
  fn host_mounts_need_an_allowed_target() {
    let temp = TempDir::new().unwrap();
    host_file(temp.path(), "mnt/x", "x");
    let mut opts = LayerOpts::new("//l:l", temp.path());
    opts.target_to_path.insert("//host:mnt".into(), temp.path().join("mnt"));
    let json = r#"{"target": "//a:a", "items": [
      {"type": "install_file", "source": {"target": "//host:mnt", "path": "x", "host_mount": true}, "dest": "/x"}
    ]}"#;

    let err = items_from_features(vec![feature(json)], &opts, &mut CleanupStack::new()).unwrap_err();
    assert!(matches!(err, FeatureError::HostMountNotAllowed { .. }));

    opts.allowed_host_mount_targets.insert("//host:mnt".into());
    assert_eq!(items_from_features(vec![feature(json)], &opts, &mut CleanupStack::new()).unwrap().len(), 1);
  }

  #[test]
  fn inline_content_lives_until_cleanup() {
    let temp = TempDir::new().unwrap();
    let opts = LayerOpts::new("//l:l", temp.path());
    let json = r#"{"target": "//a:a", "items": [
      {"type": "install_file", "content": "hello\n", "dest": "/etc/motd", "mode": "0644"}
    ]}"#;

    let mut cleanup = CleanupStack::new();
    let items = items_from_features(vec![feature(json)], &opts, &mut cleanup).unwrap();
    let Item::InstallFile(install) = &items[0] else {
      panic!("expected an install item");
    };
    assert_eq!(install.mode, Some(0o644));
    assert_eq!(fs::read_to_string(&install.source).unwrap(), "hello\n");
    assert_eq!(cleanup.len(), 1);

    cleanup.close().unwrap();
    assert!(!install.source.exists());
  }

  #[test]
  fn install_needs_one_source() {
    let temp = TempDir::new().unwrap();
    let opts = LayerOpts::new("//l:l", temp.path());
    let json = r#"{"target": "//a:a", "items": [{"type": "install_file", "dest": "/x"}]}"#;
    let err = items_from_features(vec![feature(json)], &opts, &mut CleanupStack::new()).unwrap_err();
    assert!(matches!(err, FeatureError::InstallSource { .. }));
  }

  #[test]
  fn nested_features_are_followed() {
    let temp = TempDir::new().unwrap();
    let nested = host_file(
      temp.path(),
      "child/feature.json",
      r#"{"target": "//child:child", "items": [{"type": "rpm_install", "name": "jq"}]}"#,
    );
    let mut opts = LayerOpts::new("//l:l", temp.path());
    opts.target_to_path.insert("//child:child".into(), temp.path().join("child"));

    let root = host_file(
      temp.path(),
      "root.json",
      r#"{"target": "//root:root", "items": [{"type": "rpm_remove", "name": "vim"}], "features": ["//child:child"]}"#,
    );
    let items = items_from_feature_paths(&[root], &opts, &mut CleanupStack::new()).unwrap();
    let targets: Vec<&str> = items.iter().map(|i| i.from_target()).collect();
    assert_eq!(targets, vec!["//root:root", "//child:child"]);
    assert!(nested.exists());
  }

  #[test]
  fn shared_includes_are_expanded_once() {
    let temp = TempDir::new().unwrap();
    let conf = host_file(temp.path(), "conf/app.conf", "x=1\n");
    host_file(
      temp.path(),
      "shared/feature.json",
      r#"{"target": "//x:x", "items": [{"type": "install_file", "source": {"target": "//conf:conf"}, "dest": "/etc/app.conf"}]}"#,
    );
    host_file(temp.path(), "left/feature.json", r#"{"target": "//left:left", "features": ["//x:x"]}"#);
    host_file(temp.path(), "right/feature.json", r#"{"target": "//right:right", "features": ["//x:x"]}"#);
    let mut opts = LayerOpts::new("//l:l", temp.path());
    for (target, dir) in [("//x:x", "shared"), ("//left:left", "left"), ("//right:right", "right")] {
      opts.target_to_path.insert(target.into(), temp.path().join(dir));
    }
    opts.target_to_path.insert("//conf:conf".into(), conf);

    let features = vec![feature(
      r#"{"target": "//top:top", "features": ["//left:left", "//right:right"]}"#,
    )];
    let items = items_from_features(features, &opts, &mut CleanupStack::new()).unwrap();
    let targets: Vec<&str> = items.iter().map(|i| i.from_target()).collect();
    assert_eq!(targets, vec!["//x:x"]);
  }

  #[test]
  fn self_inclusion_is_rejected() {
    let temp = TempDir::new().unwrap();
    host_file(temp.path(), "loop/feature.json", r#"{"target": "//loop:loop", "features": ["//loop:loop"]}"#);
    let mut opts = LayerOpts::new("//l:l", temp.path());
    opts.target_to_path.insert("//loop:loop".into(), temp.path().join("loop"));
    let features = vec![feature(r#"{"target": "//loop:loop", "features": ["//loop:loop"]}"#)];
    assert!(matches!(
      items_from_features(features, &opts, &mut CleanupStack::new()),
      Err(FeatureError::Invalid { .. })
    ));
  }

  #[test]
  fn parent_layer_accepts_a_descriptor() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("subvols/base:1")).unwrap();
    let desc = SubvolumeOnDisk::from_subvolume_path(
      &temp.path().join("subvols/base:1"),
      &temp.path().join("subvols"),
      "//base:base",
    )
    .unwrap();
    let desc_path = host_file(temp.path(), "base/layer.json", &desc.to_json().unwrap());

    let opts = LayerOpts::new("//l:l", temp.path().join("subvols"));
    let json = format!(
      r#"{{"target": "//a:a", "items": [{{"type": "parent_layer", "source": "{}"}}]}}"#,
      desc_path.display()
    );
    let items = items_from_features(vec![feature(&json)], &opts, &mut CleanupStack::new()).unwrap();
    match &items[0] {
      Item::ParentLayer(parent) => assert_eq!(parent.subvol_path, desc.subvolume_path()),
      other => panic!("unexpected {other}"),
    }
  }
}
