use std::fmt;
use std::fs;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ItemError, io_err, non_root};
use crate::consts::META_DIR;
use crate::path::ImagePath;
use crate::subvol::Subvol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovePathAction {
  /// Fail if the path is missing.
  AssertExists,
  IfExists,
}

impl fmt::Display for RemovePathAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RemovePathAction::AssertExists => write!(f, "assert_exists"),
      RemovePathAction::IfExists => write!(f, "if_exists"),
    }
  }
}

/// Delete a path, typically one brought in by a parent layer or a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovePathItem {
  pub from_target: String,
  pub path: ImagePath,
  pub action: RemovePathAction,
}

impl RemovePathItem {
  pub fn new(from_target: impl Into<String>, path: &str, action: RemovePathAction) -> Result<Self, ItemError> {
    let path = non_root(ImagePath::new(path)?, "removed path")?;
    if path.as_str().split('/').next() == Some(META_DIR) {
      return Err(ItemError::Invalid(format!("{path} may not be removed")));
    }
    Ok(Self {
      from_target: from_target.into(),
      path,
      action,
    })
  }

  pub(super) fn build(&self, subvol: &Subvol) -> Result<(), ItemError> {
    let abs = subvol.abs(&self.path)?;
    let Ok(meta) = fs::symlink_metadata(&abs) else {
      return match self.action {
        RemovePathAction::AssertExists => Err(ItemError::PathMissing(self.path.clone())),
        RemovePathAction::IfExists => {
          debug!(path = %self.path, "nothing to remove");
          Ok(())
        }
      };
    };

    info!(path = %self.path, "removing path");
    if meta.is_dir() {
      fs::remove_dir_all(&abs).map_err(io_err(&abs))
    } else {
      fs::remove_file(&abs).map_err(io_err(&abs))
    }
  }
}
