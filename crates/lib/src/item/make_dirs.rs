use std::fs;

use tracing::debug;

use super::{ItemError, UserGroup, io_err, non_root, set_mode, validate_mode};
use crate::facts::{Provide, Require};
use crate::path::ImagePath;
use crate::subvol::Subvol;

/// Create `path_to_make` and any missing components below `into_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeDirsItem {
  pub from_target: String,
  pub into_dir: ImagePath,
  pub path_to_make: ImagePath,
  pub mode: u32,
  pub owner: Option<UserGroup>,
}

impl MakeDirsItem {
  pub fn new(from_target: impl Into<String>, into_dir: &str, path_to_make: &str) -> Result<Self, ItemError> {
    Ok(Self {
      from_target: from_target.into(),
      into_dir: ImagePath::new(into_dir)?,
      path_to_make: non_root(ImagePath::new(path_to_make)?, "path_to_make")?,
      mode: 0o755,
      owner: None,
    })
  }

  pub fn with_mode(mut self, mode: u32) -> Result<Self, ItemError> {
    self.mode = validate_mode(mode)?;
    Ok(self)
  }

  pub fn with_owner(mut self, owner: &str) -> Result<Self, ItemError> {
    self.owner = Some(owner.parse()?);
    Ok(self)
  }

  /// Every directory this item may create, outermost first.
  fn components(&self) -> Vec<ImagePath> {
    let mut out = Vec::new();
    let mut cur = self.into_dir.clone();
    for part in self.path_to_make.as_str().split('/') {
      // Components of a normalized path always join cleanly.
      if let Ok(next) = cur.join(part) {
        out.push(next.clone());
        cur = next;
      }
    }
    out
  }

  /// The deepest directory this item creates.
  pub fn made_path(&self) -> ImagePath {
    self.components().pop().unwrap_or_else(|| self.into_dir.clone())
  }

  pub fn provides(&self) -> Vec<Provide> {
    self.components().into_iter().map(Provide::directory).collect()
  }

  pub fn requires(&self) -> Vec<Require> {
    let mut out = vec![Require::directory(self.into_dir.clone())];
    if let Some(owner) = &self.owner {
      out.extend(owner.requires());
    }
    out
  }

  /// Existing directories are left alone; mode and owner only apply to the
  /// ones created here.
  pub fn build(&self, subvol: &Subvol) -> Result<(), ItemError> {
    for component in self.components() {
      let abs = subvol.abs(&component)?;
      match fs::symlink_metadata(&abs) {
        Ok(meta) if meta.is_dir() => {
          debug!(path = %component, "directory already exists");
          continue;
        }
        Ok(_) => return Err(ItemError::DestinationExists(abs)),
        Err(_) => {}
      }
      fs::create_dir(&abs).map_err(io_err(&abs))?;
      set_mode(&abs, self.mode)?;
      if let Some(owner) = &self.owner {
        owner.apply(subvol.path(), &abs)?;
      }
    }
    Ok(())
  }
}
