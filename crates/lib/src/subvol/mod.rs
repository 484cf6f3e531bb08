//! The filesystem target every build operation writes to.
//!
//! A [`Subvol`] is a directory tree standing in for a copy-on-write
//! subvolume: it can be created empty or as a snapshot of another layer,
//! mutated by items, and toggled read-only once the layer is complete.

pub mod immutable;
mod on_disk;

pub use on_disk::{DescribeError, SubvolumeOnDisk};

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::path::ImagePath;
use immutable::ImmutableError;

#[derive(Debug, Error)]
pub enum SubvolError {
  #[error("subvolume {0} already exists")]
  AlreadyExists(PathBuf),

  #[error("subvolume {0} does not exist")]
  Missing(PathBuf),

  #[error("io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to walk {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("{path} resolves outside the subvolume")]
  Escapes { path: ImagePath },

  #[error("too many levels of symbolic links resolving {path}")]
  SymlinkLoop { path: ImagePath },

  #[error(transparent)]
  Immutable(#[from] ImmutableError),
}

/// Links followed while resolving one path, as with `MAXSYMLINKS`.
const MAX_SYMLINKS: usize = 40;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SubvolError + '_ {
  move |source| SubvolError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// A layer under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subvol {
  path: PathBuf,
}

impl Subvol {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn exists(&self) -> bool {
    self.path.is_dir()
  }

  /// Host path of `rel` inside this layer, with symlinks among its
  /// ancestors resolved as if the layer were `/`. The last component is left
  /// alone so callers can inspect, create or remove it.
  pub fn abs(&self, rel: &ImagePath) -> Result<PathBuf, SubvolError> {
    match (rel.parent(), rel.file_name()) {
      (Some(parent), Some(name)) => Ok(self.resolve(&parent)?.join(name)),
      _ => Ok(self.path.clone()),
    }
  }

  /// Host path of `rel` inside this layer with every symlink on the way
  /// resolved.
  ///
  /// Absolute link targets are taken relative to the layer root, and a
  /// target climbing above the root is an error. Missing components are
  /// kept as written.
  pub fn resolve(&self, rel: &ImagePath) -> Result<PathBuf, SubvolError> {
    let mut resolved: Vec<OsString> = Vec::new();
    let mut pending: Vec<OsString> = rel
      .as_str()
      .split('/')
      .filter(|c| !c.is_empty())
      .rev()
      .map(OsString::from)
      .collect();
    let mut links = 0;

    while let Some(part) = pending.pop() {
      if part == ".." {
        if resolved.pop().is_none() {
          return Err(SubvolError::Escapes { path: rel.clone() });
        }
        continue;
      }
      resolved.push(part);

      let host = self.host_path(&resolved);
      let is_link = fs::symlink_metadata(&host).is_ok_and(|m| m.file_type().is_symlink());
      if !is_link {
        continue;
      }
      links += 1;
      if links > MAX_SYMLINKS {
        return Err(SubvolError::SymlinkLoop { path: rel.clone() });
      }
      let target = fs::read_link(&host).map_err(io_err(&host))?;
      resolved.pop();
      if target.is_absolute() {
        resolved.clear();
      }
      for component in target.components().rev() {
        match component {
          Component::Normal(name) => pending.push(name.to_os_string()),
          Component::ParentDir => pending.push(OsString::from("..")),
          Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
      }
    }

    Ok(self.host_path(&resolved))
  }

  fn host_path(&self, parts: &[OsString]) -> PathBuf {
    let mut out = self.path.clone();
    out.extend(parts);
    out
  }

  /// Create an empty layer. The parent directory must already exist.
  pub fn create(&self) -> Result<(), SubvolError> {
    if self.path.exists() {
      return Err(SubvolError::AlreadyExists(self.path.clone()));
    }
    info!(path = %self.path.display(), "creating subvolume");
    fs::create_dir(&self.path).map_err(io_err(&self.path))
  }

  /// Create this layer as a writable copy of `source`.
  pub fn snapshot(&self, source: &Path) -> Result<(), SubvolError> {
    if self.path.exists() {
      return Err(SubvolError::AlreadyExists(self.path.clone()));
    }
    if !source.is_dir() {
      return Err(SubvolError::Missing(source.to_path_buf()));
    }
    info!(source = %source.display(), path = %self.path.display(), "snapshotting subvolume");
    copy_tree(source, &self.path)?;
    immutable::make_mutable(&self.path)?;
    Ok(())
  }

  pub fn set_readonly(&self, readonly: bool) -> Result<(), SubvolError> {
    if !self.exists() {
      return Err(SubvolError::Missing(self.path.clone()));
    }
    if readonly {
      immutable::make_immutable(&self.path)?;
    } else {
      immutable::make_mutable(&self.path)?;
    }
    Ok(())
  }

  pub fn is_readonly(&self) -> Result<bool, SubvolError> {
    Ok(immutable::is_immutable(&self.path)?)
  }
}

/// Copy the tree at `src` to `dst`, which must not exist. `src` may also be a
/// single file or symlink.
///
/// Regular files, directories and symlinks are reproduced with their modes;
/// symlinks are copied verbatim, never followed. Other file types are
/// skipped. Directory modes are applied after their contents so read-only
/// source directories still copy.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<(), SubvolError> {
  let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();

  for entry in WalkDir::new(src).sort_by_file_name() {
    let entry = entry.map_err(|e| SubvolError::Walk {
      path: src.to_path_buf(),
      source: e,
    })?;
    let target = match entry.path().strip_prefix(src) {
      Ok(rel) if !rel.as_os_str().is_empty() => dst.join(rel),
      _ => dst.to_path_buf(),
    };
    let file_type = entry.file_type();

    if file_type.is_symlink() {
      let link = fs::read_link(entry.path()).map_err(io_err(entry.path()))?;
      symlink(&link, &target).map_err(io_err(&target))?;
    } else if file_type.is_dir() {
      fs::create_dir(&target).map_err(io_err(&target))?;
      let mode = entry.metadata().map_err(|e| SubvolError::Walk {
        path: entry.path().to_path_buf(),
        source: e,
      })?;
      dir_modes.push((target, mode.permissions().mode() & 0o7777));
    } else if file_type.is_file() {
      fs::copy(entry.path(), &target).map_err(io_err(&target))?;
    } else {
      debug!(path = %entry.path().display(), "skipping special file");
    }
  }

  for (dir, mode) in dir_modes.into_iter().rev() {
    fs::set_permissions(&dir, fs::Permissions::from_mode(mode)).map_err(io_err(&dir))?;
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn create_requires_fresh_path() {
    let temp = TempDir::new().unwrap();
    let subvol = Subvol::new(temp.path().join("layer"));
    subvol.create().unwrap();
    assert!(subvol.exists());
    assert!(matches!(subvol.create(), Err(SubvolError::AlreadyExists(_))));
  }

  #[test]
  fn snapshot_copies_tree_and_is_writable() {
    let temp = TempDir::new().unwrap();
    let parent = temp.path().join("parent");
    fs::create_dir_all(parent.join("etc")).unwrap();
    fs::write(parent.join("etc/os-release"), "ID=test\n").unwrap();
    symlink("etc/os-release", parent.join("os-release")).unwrap();
    immutable::make_immutable(&parent).unwrap();

    let child = Subvol::new(temp.path().join("child"));
    child.snapshot(&parent).unwrap();

    assert_eq!(fs::read_to_string(child.path().join("etc/os-release")).unwrap(), "ID=test\n");
    assert_eq!(
      fs::read_link(child.path().join("os-release")).unwrap(),
      PathBuf::from("etc/os-release")
    );
    assert!(!child.is_readonly().unwrap());
    fs::create_dir(child.path().join("etc/new")).unwrap();

    immutable::make_mutable(&parent).unwrap();
  }

  #[test]
  fn readonly_roundtrip() {
    let temp = TempDir::new().unwrap();
    let subvol = Subvol::new(temp.path().join("layer"));
    subvol.create().unwrap();
    fs::write(subvol.path().join("f"), "x").unwrap();

    subvol.set_readonly(true).unwrap();
    assert!(subvol.is_readonly().unwrap());
    subvol.set_readonly(false).unwrap();
    assert!(!subvol.is_readonly().unwrap());
  }

  #[test]
  fn abs_keeps_links_inside_the_layer() {
    let temp = TempDir::new().unwrap();
    let layer = temp.path().join("layer");
    fs::create_dir_all(layer.join("usr/lib")).unwrap();
    fs::create_dir_all(temp.path().join("host/lib")).unwrap();
    symlink("/usr/lib", layer.join("lib")).unwrap();
    symlink(temp.path().join("host"), layer.join("host")).unwrap();
    symlink("usr/../usr/lib", layer.join("rel")).unwrap();
    let subvol = Subvol::new(&layer);
    let ip = |s: &str| ImagePath::new(s).unwrap();

    assert_eq!(subvol.abs(&ip("lib/x")).unwrap(), layer.join("usr/lib/x"));
    assert_eq!(subvol.abs(&ip("rel/x")).unwrap(), layer.join("usr/lib/x"));
    // The last component is not followed.
    assert_eq!(subvol.abs(&ip("lib")).unwrap(), layer.join("lib"));
    assert_eq!(subvol.abs(&ip("")).unwrap(), layer);
    // A host-absolute target is re-rooted at the layer.
    let rerooted = subvol.abs(&ip("host/lib/x")).unwrap();
    assert!(rerooted.starts_with(&layer), "{}", rerooted.display());
    assert!(rerooted.ends_with("host/lib/x"));
    assert_eq!(subvol.resolve(&ip("lib")).unwrap(), layer.join("usr/lib"));
  }

  #[test]
  fn links_climbing_out_of_the_layer_are_rejected() {
    let temp = TempDir::new().unwrap();
    let layer = temp.path().join("layer");
    fs::create_dir_all(layer.join("a")).unwrap();
    symlink("../../..", layer.join("a/up")).unwrap();
    symlink("loop", layer.join("loop")).unwrap();
    let subvol = Subvol::new(&layer);

    let up = ImagePath::new("a/up/x").unwrap();
    assert!(matches!(subvol.abs(&up), Err(SubvolError::Escapes { .. })));
    let looped = ImagePath::new("loop/x").unwrap();
    assert!(matches!(subvol.abs(&looped), Err(SubvolError::SymlinkLoop { .. })));
  }

  #[test]
  fn readonly_on_missing_subvol_fails() {
    let temp = TempDir::new().unwrap();
    let subvol = Subvol::new(temp.path().join("absent"));
    assert!(matches!(subvol.set_readonly(true), Err(SubvolError::Missing(_))));
  }
}
