//! Normalized, layer-relative paths.
//!
//! Every path that appears in an item field or in a fact is an [`ImagePath`]:
//! relative to the root of the layer being built, with `.` and redundant
//! separators removed and no `..` that could climb above the root. The root
//! itself is the empty path and displays as `/`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
  #[error("path {0:?} escapes the layer root")]
  EscapesRoot(String),

  #[error("path {0:?} contains a NUL byte")]
  NulByte(String),

  #[error("path {0:?} is not valid UTF-8")]
  NotUtf8(String),
}

/// A path relative to the layer root, always in normal form.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImagePath(String);

impl ImagePath {
  /// The root of the layer.
  pub fn root() -> Self {
    Self(String::new())
  }

  /// Normalize `raw` into a layer-relative path.
  ///
  /// Leading slashes are dropped, so `/a/b` and `a/b` are the same path.
  pub fn new(raw: &str) -> Result<Self, PathError> {
    if raw.contains('\0') {
      return Err(PathError::NulByte(raw.to_string()));
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in raw.split('/') {
      match component {
        "" | "." => {}
        ".." => {
          if parts.pop().is_none() {
            return Err(PathError::EscapesRoot(raw.to_string()));
          }
        }
        other => parts.push(other),
      }
    }

    Ok(Self(parts.join("/")))
  }

  /// Normalize a host-style path, e.g. a tar member name.
  pub fn from_path(path: &Path) -> Result<Self, PathError> {
    let raw = path
      .to_str()
      .ok_or_else(|| PathError::NotUtf8(path.to_string_lossy().into_owned()))?;
    Self::new(raw)
  }

  pub fn is_root(&self) -> bool {
    self.0.is_empty()
  }

  /// The path without the leading `/`; empty for the root.
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Append a relative path, normalizing the result.
  ///
  /// `rel` may not climb above `self`.
  pub fn join(&self, rel: &str) -> Result<Self, PathError> {
    let tail = Self::new(rel)?;
    if tail.is_root() {
      return Ok(self.clone());
    }
    if self.is_root() {
      return Ok(tail);
    }
    Ok(Self(format!("{}/{}", self.0, tail.0)))
  }

  /// The parent directory, or `None` for the root.
  pub fn parent(&self) -> Option<Self> {
    if self.is_root() {
      return None;
    }
    match self.0.rfind('/') {
      Some(idx) => Some(Self(self.0[..idx].to_string())),
      None => Some(Self::root()),
    }
  }

  /// The last component, or `None` for the root.
  pub fn file_name(&self) -> Option<&str> {
    if self.is_root() {
      return None;
    }
    Some(self.0.rsplit('/').next().unwrap_or(&self.0))
  }

  /// All proper ancestors, nearest first, ending with the root.
  pub fn ancestors(&self) -> Vec<Self> {
    let mut out = Vec::new();
    let mut cur = self.parent();
    while let Some(p) = cur {
      cur = p.parent();
      out.push(p);
    }
    out
  }

  /// True if `self` equals `other` or lies beneath it.
  pub fn starts_with(&self, other: &ImagePath) -> bool {
    if other.is_root() {
      return true;
    }
    self.0 == other.0 || (self.0.starts_with(&other.0) && self.0.as_bytes().get(other.0.len()) == Some(&b'/'))
  }

  /// The absolute host path of this image path under `root`.
  pub fn under(&self, root: &Path) -> PathBuf {
    if self.is_root() {
      root.to_path_buf()
    } else {
      root.join(&self.0)
    }
  }
}

impl fmt::Display for ImagePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "/{}", self.0)
  }
}

impl Serialize for ImagePath {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for ImagePath {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    ImagePath::new(&raw).map_err(serde::de::Error::custom)
  }
}
