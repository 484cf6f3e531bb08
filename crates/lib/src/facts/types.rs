use std::fmt;

use serde::{Deserialize, Serialize};

use crate::path::ImagePath;

/// What a symlink is expected to resolve to inside the layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymlinkTarget {
  Directory,
  File,
}

/// A fact an item guarantees about the layer once it has been built.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provide {
  Directory { path: ImagePath },
  /// A directory copied into place whole; no other fact may share its path.
  OwnedDirectory { path: ImagePath },
  File { path: ImagePath },
  Symlink { path: ImagePath, target: SymlinkTarget },
  /// The path exists but nothing may depend on it.
  DoNotAccess { path: ImagePath },
  User { name: String },
  Group { name: String },
}

/// A fact an item needs to hold before it can be built.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Require {
  Directory { path: ImagePath },
  File { path: ImagePath },
  User { name: String },
  Group { name: String },
}

/// The identity facts are indexed by; a provide and a require can only ever
/// interact when their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FactKey {
  Path(ImagePath),
  User(String),
  Group(String),
}

impl Provide {
  pub fn directory(path: ImagePath) -> Self {
    Provide::Directory { path }
  }

  pub fn file(path: ImagePath) -> Self {
    Provide::File { path }
  }

  pub fn key(&self) -> FactKey {
    match self {
      Provide::Directory { path }
      | Provide::OwnedDirectory { path }
      | Provide::File { path }
      | Provide::Symlink { path, .. }
      | Provide::DoNotAccess { path } => FactKey::Path(path.clone()),
      Provide::User { name } => FactKey::User(name.clone()),
      Provide::Group { name } => FactKey::Group(name.clone()),
    }
  }

  /// The path this fact is about, if it is a path fact.
  pub fn path(&self) -> Option<&ImagePath> {
    match self {
      Provide::Directory { path }
      | Provide::OwnedDirectory { path }
      | Provide::File { path }
      | Provide::Symlink { path, .. }
      | Provide::DoNotAccess { path } => Some(path),
      Provide::User { .. } | Provide::Group { .. } => None,
    }
  }

  /// Two providers of the same key may coexist only when both create the
  /// same directory, and neither claims it as a [`Provide::OwnedDirectory`].
  pub fn can_share_key_with(&self, other: &Provide) -> bool {
    matches!((self, other), (Provide::Directory { .. }, Provide::Directory { .. }))
  }

  pub fn is_do_not_access(&self) -> bool {
    matches!(self, Provide::DoNotAccess { .. })
  }
}

impl Require {
  pub fn directory(path: ImagePath) -> Self {
    Require::Directory { path }
  }

  pub fn file(path: ImagePath) -> Self {
    Require::File { path }
  }

  pub fn key(&self) -> FactKey {
    match self {
      Require::Directory { path } | Require::File { path } => FactKey::Path(path.clone()),
      Require::User { name } => FactKey::User(name.clone()),
      Require::Group { name } => FactKey::Group(name.clone()),
    }
  }
}

impl fmt::Display for SymlinkTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SymlinkTarget::Directory => write!(f, "dir"),
      SymlinkTarget::File => write!(f, "file"),
    }
  }
}

impl fmt::Display for Provide {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Provide::Directory { path } => write!(f, "directory {}", path),
      Provide::OwnedDirectory { path } => write!(f, "owned-directory {}", path),
      Provide::File { path } => write!(f, "file {}", path),
      Provide::Symlink { path, target } => write!(f, "symlink-to-{} {}", target, path),
      Provide::DoNotAccess { path } => write!(f, "do-not-access {}", path),
      Provide::User { name } => write!(f, "user {}", name),
      Provide::Group { name } => write!(f, "group {}", name),
    }
  }
}

impl fmt::Display for Require {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Require::Directory { path } => write!(f, "directory {}", path),
      Require::File { path } => write!(f, "file {}", path),
      Require::User { name } => write!(f, "user {}", name),
      Require::Group { name } => write!(f, "group {}", name),
    }
  }
}

impl fmt::Display for FactKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FactKey::Path(path) => write!(f, "{}", path),
      FactKey::User(name) => write!(f, "user {}", name),
      FactKey::Group(name) => write!(f, "group {}", name),
    }
  }
}
