use std::fs;
use std::path::PathBuf;

use tracing::info;

use super::{ItemError, io_err, set_mode};
use crate::consts::META_DIR;
use crate::subvol::Subvol;

/// Start the layer as a writable snapshot of a finished layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLayerItem {
  pub from_target: String,
  pub subvol_path: PathBuf,
}

impl ParentLayerItem {
  pub fn new(from_target: impl Into<String>, subvol_path: impl Into<PathBuf>) -> Result<Self, ItemError> {
    let subvol_path = subvol_path.into();
    if !subvol_path.is_dir() {
      return Err(ItemError::MissingSource(subvol_path));
    }
    Ok(Self {
      from_target: from_target.into(),
      subvol_path,
    })
  }

  pub(super) fn build(&self, subvol: &Subvol) -> Result<(), ItemError> {
    info!(parent = %self.subvol_path.display(), "starting from parent layer");
    subvol.snapshot(&self.subvol_path)?;
    ensure_meta(subvol)
  }
}

/// Start the layer from an empty root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemRootItem {
  pub from_target: String,
}

impl FilesystemRootItem {
  pub fn new(from_target: impl Into<String>) -> Self {
    Self {
      from_target: from_target.into(),
    }
  }

  pub(super) fn build(&self, subvol: &Subvol) -> Result<(), ItemError> {
    info!("starting from an empty root");
    subvol.create()?;
    set_mode(subvol.path(), 0o755)?;
    ensure_meta(subvol)
  }
}

fn ensure_meta(subvol: &Subvol) -> Result<(), ItemError> {
  let meta = subvol.path().join(META_DIR);
  if !meta.is_dir() {
    fs::create_dir(&meta).map_err(io_err(&meta))?;
    set_mode(&meta, 0o755)?;
  }
  Ok(())
}
