//! Build items.
//!
//! An [`Item`] is one declarative build action. Every variant reports the
//! facts it provides and requires so the dependency graph can validate and
//! order it, and knows how to apply itself to a [`Subvol`].
//!
//! Ordinary items are built one at a time in dependency order. Phase items
//! (creating the subvolume, RPM transactions, path removal) have effects that
//! cannot be predicted statically; they are grouped by [`PhaseOrder`] and
//! applied through a [`PhaseBuilder`] before ordinary items are resolved.

mod clone;
mod install;
mod make_dirs;
mod parent_layer;
mod phase;
mod phases_provide;
mod remove_path;
mod rpm_action;
mod scan;
mod symlink;
mod tarball;

pub use clone::CloneItem;
pub use install::InstallFileItem;
pub use make_dirs::MakeDirsItem;
pub use parent_layer::{FilesystemRootItem, ParentLayerItem};
pub use phase::{PhaseBuilder, PhaseOrder, PhasePlan};
pub use phases_provide::PhasesProvideItem;
pub use remove_path::{RemovePathAction, RemovePathItem};
pub use rpm_action::{RpmAction, RpmActionItem, RpmTransaction};
pub use symlink::SymlinkItem;
pub use tarball::TarballItem;

use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::config::LayerOpts;
use crate::facts::{Provide, Require};
use crate::path::{ImagePath, PathError};
use crate::sandbox::RunError;
use crate::subvol::{Subvol, SubvolError};
use crate::util::hash::HashError;
use crate::util::passwd::{self, PasswdError};

#[derive(Debug, Error)]
pub enum ItemError {
  #[error(transparent)]
  InvalidPath(#[from] PathError),

  #[error("invalid owner {0:?}, expected `user:group`")]
  InvalidUserGroup(String),

  #[error("invalid mode {0:#o}")]
  InvalidMode(u32),

  #[error("{0}")]
  Invalid(String),

  #[error("source {0} does not exist")]
  MissingSource(PathBuf),

  #[error("{0} already exists")]
  DestinationExists(PathBuf),

  #[error("{0} does not exist")]
  PathMissing(ImagePath),

  #[error("unsupported archive {0}, expected .tar, .tar.gz, .tgz or .tar.zst")]
  UnsupportedArchive(PathBuf),

  #[error("{path} changed since it was scanned: expected sha256 {expected}, got {actual}")]
  SourceChanged {
    path: PathBuf,
    expected: String,
    actual: String,
  },

  #[error("failed to read archive {path}: {source}")]
  Archive {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("layer option `{0}` is required")]
  MissingOption(&'static str),

  #[error("{0} is not an ordinary item")]
  NotOrdinary(String),

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

  #[error(transparent)]
  Hash(#[from] HashError),

  #[error(transparent)]
  Passwd(#[from] PasswdError),

  #[error(transparent)]
  Subvol(#[from] SubvolError),

  #[error(transparent)]
  Run(#[from] RunError),
}

pub(crate) fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ItemError + '_ {
  move |source| ItemError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// A `user:group` pair, resolved against the layer at build time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserGroup {
  pub user: String,
  pub group: String,
}

impl FromStr for UserGroup {
  type Err = ItemError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.split(':').collect::<Vec<_>>().as_slice() {
      [user, group] if !user.is_empty() && !group.is_empty() => Ok(Self {
        user: user.to_string(),
        group: group.to_string(),
      }),
      _ => Err(ItemError::InvalidUserGroup(s.to_string())),
    }
  }
}

impl fmt::Display for UserGroup {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.user, self.group)
  }
}

impl UserGroup {
  fn requires(&self) -> [Require; 2] {
    [
      Require::User {
        name: self.user.clone(),
      },
      Require::Group {
        name: self.group.clone(),
      },
    ]
  }

  /// Resolve the pair to numeric ids and apply them to `path`.
  fn apply(&self, layer_root: &Path, path: &Path) -> Result<(), ItemError> {
    let uid = passwd::lookup_uid(layer_root, &self.user)?;
    let gid = passwd::lookup_gid(layer_root, &self.group)?;
    std::os::unix::fs::lchown(path, Some(uid), Some(gid)).map_err(io_err(path))
  }
}

pub(crate) fn validate_mode(mode: u32) -> Result<u32, ItemError> {
  if mode & !0o7777 != 0 {
    return Err(ItemError::InvalidMode(mode));
  }
  Ok(mode)
}

pub(crate) fn set_mode(path: &Path, mode: u32) -> Result<(), ItemError> {
  fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(io_err(path))
}

/// Refuse to build over anything already at `path`, including dangling
/// symlinks.
pub(crate) fn ensure_absent(path: &Path) -> Result<(), ItemError> {
  if fs::symlink_metadata(path).is_ok() {
    return Err(ItemError::DestinationExists(path.to_path_buf()));
  }
  Ok(())
}

pub(crate) fn non_root(path: ImagePath, what: &str) -> Result<ImagePath, ItemError> {
  if path.is_root() {
    return Err(ItemError::Invalid(format!("{what} may not be the layer root")));
  }
  Ok(path)
}

/// One declarative build action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
  MakeDirs(MakeDirsItem),
  InstallFile(InstallFileItem),
  Symlink(SymlinkItem),
  Tarball(TarballItem),
  Clone(CloneItem),
  ParentLayer(ParentLayerItem),
  FilesystemRoot(FilesystemRootItem),
  RpmAction(RpmActionItem),
  RemovePath(RemovePathItem),
  PhasesProvide(PhasesProvideItem),
}

impl Item {
  /// The feature target that declared this item.
  pub fn from_target(&self) -> &str {
    match self {
      Item::MakeDirs(i) => &i.from_target,
      Item::InstallFile(i) => &i.from_target,
      Item::Symlink(i) => &i.from_target,
      Item::Tarball(i) => &i.from_target,
      Item::Clone(i) => &i.from_target,
      Item::ParentLayer(i) => &i.from_target,
      Item::FilesystemRoot(i) => &i.from_target,
      Item::RpmAction(i) => &i.from_target,
      Item::RemovePath(i) => &i.from_target,
      Item::PhasesProvide(i) => &i.from_target,
    }
  }

  /// The phase this item belongs to, or `None` for ordinary items.
  pub fn phase_order(&self) -> Option<PhaseOrder> {
    match self {
      Item::ParentLayer(_) | Item::FilesystemRoot(_) => Some(PhaseOrder::MakeSubvol),
      Item::RpmAction(i) => Some(i.phase_order()),
      Item::RemovePath(_) => Some(PhaseOrder::RemovePaths),
      Item::MakeDirs(_)
      | Item::InstallFile(_)
      | Item::Symlink(_)
      | Item::Tarball(_)
      | Item::Clone(_)
      | Item::PhasesProvide(_) => None,
    }
  }

  /// Facts this item guarantees once built, freshly computed on each call.
  ///
  /// Phase items provide nothing statically; their effects are observed
  /// through [`PhasesProvideItem`] after they ran.
  pub fn provides(&self) -> Result<Vec<Provide>, ItemError> {
    match self {
      Item::MakeDirs(i) => Ok(i.provides()),
      Item::InstallFile(i) => i.provides(),
      Item::Symlink(i) => Ok(i.provides()),
      Item::Tarball(i) => i.provides(),
      Item::Clone(i) => i.provides(),
      Item::PhasesProvide(i) => i.provides(),
      Item::ParentLayer(_) | Item::FilesystemRoot(_) | Item::RpmAction(_) | Item::RemovePath(_) => Ok(Vec::new()),
    }
  }

  /// Facts that must hold before this item is built.
  pub fn requires(&self) -> Vec<Require> {
    match self {
      Item::MakeDirs(i) => i.requires(),
      Item::InstallFile(i) => i.requires(),
      Item::Symlink(i) => i.requires(),
      Item::Tarball(i) => i.requires(),
      Item::Clone(i) => i.requires(),
      Item::ParentLayer(_)
      | Item::FilesystemRoot(_)
      | Item::RpmAction(_)
      | Item::RemovePath(_)
      | Item::PhasesProvide(_) => Vec::new(),
    }
  }

  /// Apply an ordinary item to `subvol`.
  ///
  /// Phase items are applied through their [`PhaseBuilder`] instead.
  pub fn build(&self, subvol: &Subvol, opts: &LayerOpts) -> Result<(), ItemError> {
    match self {
      Item::MakeDirs(i) => i.build(subvol),
      Item::InstallFile(i) => i.build(subvol),
      Item::Symlink(i) => i.build(subvol),
      Item::Tarball(i) => i.build(subvol, opts),
      Item::Clone(i) => i.build(subvol),
      Item::PhasesProvide(_) => Ok(()),
      Item::ParentLayer(_) | Item::FilesystemRoot(_) | Item::RpmAction(_) | Item::RemovePath(_) => {
        Err(ItemError::NotOrdinary(self.to_string()))
      }
    }
  }
}

impl fmt::Display for Item {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Item::MakeDirs(i) => write!(f, "make_dirs {}", i.made_path())?,
      Item::InstallFile(i) => write!(f, "install_file {}", i.dest)?,
      Item::Symlink(i) => write!(f, "symlink {} -> {}", i.dest, i.source)?,
      Item::Tarball(i) => write!(f, "tarball {} into {}", i.source.display(), i.into_dir)?,
      Item::Clone(i) => write!(f, "clone {} to {}", i.source_path, i.dest)?,
      Item::ParentLayer(i) => write!(f, "parent_layer {}", i.subvol_path.display())?,
      Item::FilesystemRoot(_) => write!(f, "filesystem_root")?,
      Item::RpmAction(i) => write!(f, "{} {}", i.action, i.name)?,
      Item::RemovePath(i) => write!(f, "remove_path {}", i.path)?,
      Item::PhasesProvide(i) => write!(f, "phases_provide {}", i.subvol_path.display())?,
    }
    write!(f, " ({})", self.from_target())
  }
}
