use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use tracing::debug;
use walkdir::WalkDir;

use super::scan::scan_copy;
use super::{ItemError, UserGroup, ensure_absent, io_err, non_root, set_mode, validate_mode};
use crate::facts::{Provide, Require};
use crate::path::ImagePath;
use crate::subvol::{Subvol, copy_tree};

/// Copy a host file, or a whole directory, to `dest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallFileItem {
  pub from_target: String,
  pub source: PathBuf,
  pub dest: ImagePath,
  /// Explicit mode for `dest`; files default to read-only, keeping
  /// execute bits from the source.
  pub mode: Option<u32>,
  pub owner: Option<UserGroup>,
  is_dir: bool,
}

impl InstallFileItem {
  pub fn new(from_target: impl Into<String>, source: impl Into<PathBuf>, dest: &str) -> Result<Self, ItemError> {
    let source = source.into();
    let meta = fs::metadata(&source).map_err(|_| ItemError::MissingSource(source.clone()))?;
    Ok(Self {
      from_target: from_target.into(),
      dest: non_root(ImagePath::new(dest)?, "install destination")?,
      is_dir: meta.is_dir(),
      source,
      mode: None,
      owner: None,
    })
  }

  pub fn with_mode(mut self, mode: u32) -> Result<Self, ItemError> {
    self.mode = Some(validate_mode(mode)?);
    Ok(self)
  }

  pub fn with_owner(mut self, owner: &str) -> Result<Self, ItemError> {
    self.owner = Some(owner.parse()?);
    Ok(self)
  }

  pub fn is_dir(&self) -> bool {
    self.is_dir
  }

  pub fn provides(&self) -> Result<Vec<Provide>, ItemError> {
    if self.is_dir {
      return scan_copy(&self.source, &self.dest, &self.source);
    }
    Ok(vec![Provide::file(self.dest.clone())])
  }

  pub fn requires(&self) -> Vec<Require> {
    let parent = self.dest.parent().unwrap_or_default();
    let mut out = vec![Require::directory(parent)];
    if let Some(owner) = &self.owner {
      out.extend(owner.requires());
    }
    out
  }

  fn default_file_mode(&self) -> Result<u32, ItemError> {
    let meta = fs::metadata(&self.source).map_err(io_err(&self.source))?;
    let exec = meta.permissions().mode() & 0o111;
    Ok(if exec != 0 { 0o555 } else { 0o444 })
  }

  pub fn build(&self, subvol: &Subvol) -> Result<(), ItemError> {
    let dest = subvol.abs(&self.dest)?;
    ensure_absent(&dest)?;
    debug!(source = %self.source.display(), dest = %self.dest, "installing");

    if self.is_dir {
      copy_tree(&self.source, &dest)?;
      if let Some(mode) = self.mode {
        set_mode(&dest, mode)?;
      }
      if let Some(owner) = &self.owner {
        for entry in WalkDir::new(&dest) {
          let entry = entry.map_err(|e| ItemError::Walk {
            path: dest.clone(),
            source: e,
          })?;
          owner.apply(subvol.path(), entry.path())?;
        }
      }
      return Ok(());
    }

    fs::copy(&self.source, &dest).map_err(io_err(&dest))?;
    let mode = match self.mode {
      Some(mode) => mode,
      None => self.default_file_mode()?,
    };
    if let Some(owner) = &self.owner {
      owner.apply(subvol.path(), &dest)?;
    }
    // Last, so setuid bits survive the ownership change.
    set_mode(&dest, mode)
  }
}
