use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DescribeError {
  #[error("cannot resolve {path}: {source}")]
  Resolve {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("{path} is not a directory")]
  NotADirectory { path: PathBuf },

  #[error("{path} is not inside subvolumes dir {subvolumes_dir}")]
  OutsideSubvolumesDir { path: PathBuf, subvolumes_dir: PathBuf },

  #[error("failed to serialize descriptor: {0}")]
  Serialize(#[from] serde_json::Error),
}

/// Descriptor of a finished layer, consumed by whatever builds on top of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubvolumeOnDisk {
  pub subvolumes_dir: PathBuf,
  pub subvolume_rel_path: PathBuf,
  pub layer_target: String,
}

impl SubvolumeOnDisk {
  /// Describe the layer at `subvol_path`, which must live under
  /// `subvolumes_dir`.
  pub fn from_subvolume_path(
    subvol_path: &Path,
    subvolumes_dir: &Path,
    layer_target: &str,
  ) -> Result<Self, DescribeError> {
    let resolve = |path: &Path| {
      fs::canonicalize(path).map_err(|source| DescribeError::Resolve {
        path: path.to_path_buf(),
        source,
      })
    };
    let subvol_path = resolve(subvol_path)?;
    let subvolumes_dir = resolve(subvolumes_dir)?;

    if !subvol_path.is_dir() {
      return Err(DescribeError::NotADirectory { path: subvol_path });
    }
    let rel = match subvol_path.strip_prefix(&subvolumes_dir) {
      Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
      _ => {
        return Err(DescribeError::OutsideSubvolumesDir {
          path: subvol_path,
          subvolumes_dir,
        });
      }
    };

    Ok(Self {
      subvolumes_dir,
      subvolume_rel_path: rel,
      layer_target: layer_target.to_string(),
    })
  }

  /// Absolute path of the layer.
  pub fn subvolume_path(&self) -> PathBuf {
    self.subvolumes_dir.join(&self.subvolume_rel_path)
  }

  pub fn to_json(&self) -> Result<String, DescribeError> {
    Ok(serde_json::to_string(self)?)
  }
}
