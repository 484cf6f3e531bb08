use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::scan::scan_copy;
use super::{ItemError, ensure_absent, io_err};
use crate::consts::META_DIR;
use crate::facts::{Provide, Require};
use crate::path::ImagePath;
use crate::subvol::{Subvol, copy_tree};

/// Copy a path out of another, already finished, layer.
///
/// With `pre_existing_dest`, `dest` must already be a directory and the copy
/// lands inside it: as `dest/<name>`, or with `omit_outer_dir` as the bare
/// contents of a source directory. Otherwise the copy becomes `dest` itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneItem {
  pub from_target: String,
  pub source_layer: PathBuf,
  pub source_path: ImagePath,
  pub dest: ImagePath,
  pub omit_outer_dir: bool,
  pub pre_existing_dest: bool,
}

impl CloneItem {
  pub fn new(
    from_target: impl Into<String>,
    source_layer: impl Into<PathBuf>,
    source_path: &str,
    dest: &str,
    omit_outer_dir: bool,
    pre_existing_dest: bool,
  ) -> Result<Self, ItemError> {
    let source_layer = source_layer.into();
    let source_path = ImagePath::new(source_path)?;
    let dest = ImagePath::new(dest)?;

    if omit_outer_dir && !pre_existing_dest {
      return Err(ItemError::Invalid("omit_outer_dir requires pre_existing_dest".into()));
    }
    if !pre_existing_dest && dest.is_root() {
      return Err(ItemError::Invalid("clone destination may not be the layer root".into()));
    }
    if !omit_outer_dir && source_path.is_root() {
      return Err(ItemError::Invalid("cloning a whole layer requires omit_outer_dir".into()));
    }
    if source_path.as_str().split('/').next() == Some(META_DIR) {
      return Err(ItemError::Invalid(format!("{source_path} is not cloneable")));
    }

    let source = source_path.under(&source_layer);
    let meta = fs::symlink_metadata(&source).map_err(|_| ItemError::MissingSource(source.clone()))?;
    if omit_outer_dir && !meta.is_dir() {
      return Err(ItemError::Invalid(format!("omit_outer_dir needs a directory, {source_path} is not one")));
    }

    Ok(Self {
      from_target: from_target.into(),
      source_layer,
      source_path,
      dest,
      omit_outer_dir,
      pre_existing_dest,
    })
  }

  fn source(&self) -> PathBuf {
    self.source_path.under(&self.source_layer)
  }

  /// Source host path paired with its layer destination, one per top-level
  /// entry copied.
  fn copies(&self) -> Result<Vec<(PathBuf, ImagePath)>, ItemError> {
    let source = self.source();
    if !self.pre_existing_dest {
      return Ok(vec![(source, self.dest.clone())]);
    }
    if !self.omit_outer_dir {
      let name = self.source_path.file_name().unwrap_or_default();
      return Ok(vec![(source, self.dest.join(name)?)]);
    }

    let mut out = Vec::new();
    let mut children: Vec<_> = fs::read_dir(&source)
      .map_err(io_err(&source))?
      .collect::<Result<_, _>>()
      .map_err(io_err(&source))?;
    children.sort_by_key(|e| e.file_name());
    for child in children {
      let path = child.path();
      if self.is_meta(&path) {
        continue;
      }
      let name = ImagePath::from_path(Path::new(&child.file_name()))?;
      out.push((path, self.dest.join(name.as_str())?));
    }
    Ok(out)
  }

  fn is_meta(&self, path: &Path) -> bool {
    path == self.source_layer.join(META_DIR)
  }

  pub fn provides(&self) -> Result<Vec<Provide>, ItemError> {
    let mut out = Vec::new();
    for (source, dest) in self.copies()? {
      out.extend(scan_copy(&source, &dest, &self.source_layer)?);
    }
    Ok(out)
  }

  pub fn requires(&self) -> Vec<Require> {
    if self.pre_existing_dest {
      vec![Require::directory(self.dest.clone())]
    } else {
      vec![Require::directory(self.dest.parent().unwrap_or_default())]
    }
  }

  pub fn build(&self, subvol: &Subvol) -> Result<(), ItemError> {
    for (source, dest) in self.copies()? {
      let abs = subvol.abs(&dest)?;
      ensure_absent(&abs)?;
      debug!(source = %source.display(), dest = %dest, "cloning");
      copy_tree(&source, &abs)?;
    }
    Ok(())
  }
}
