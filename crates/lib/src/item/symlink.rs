use std::os::unix::fs::symlink;
use std::path::PathBuf;

use super::{ItemError, ensure_absent, io_err, non_root};
use crate::facts::{Provide, Require, SymlinkTarget};
use crate::path::ImagePath;
use crate::subvol::Subvol;

/// Create `dest` as a symlink to `source`, both inside the layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkItem {
  pub from_target: String,
  pub source: ImagePath,
  pub dest: ImagePath,
  pub target: SymlinkTarget,
}

impl SymlinkItem {
  pub fn new(
    from_target: impl Into<String>,
    source: &str,
    dest: &str,
    target: SymlinkTarget,
  ) -> Result<Self, ItemError> {
    let source = ImagePath::new(source)?;
    let dest = non_root(ImagePath::new(dest)?, "symlink destination")?;
    if dest.starts_with(&source) {
      return Err(ItemError::Invalid(format!("symlink {dest} may not point at itself or an ancestor")));
    }
    Ok(Self {
      from_target: from_target.into(),
      source,
      dest,
      target,
    })
  }

  pub fn to_dir(from_target: impl Into<String>, source: &str, dest: &str) -> Result<Self, ItemError> {
    Self::new(from_target, source, dest, SymlinkTarget::Directory)
  }

  pub fn to_file(from_target: impl Into<String>, source: &str, dest: &str) -> Result<Self, ItemError> {
    Self::new(from_target, source, dest, SymlinkTarget::File)
  }

  pub fn provides(&self) -> Vec<Provide> {
    vec![Provide::Symlink {
      path: self.dest.clone(),
      target: self.target,
    }]
  }

  pub fn requires(&self) -> Vec<Require> {
    let source = match self.target {
      SymlinkTarget::Directory => Require::directory(self.source.clone()),
      SymlinkTarget::File => Require::file(self.source.clone()),
    };
    vec![source, Require::directory(self.dest.parent().unwrap_or_default())]
  }

  /// The link is relative so it resolves the same inside and outside a
  /// container.
  pub fn build(&self, subvol: &Subvol) -> Result<(), ItemError> {
    let dest = subvol.abs(&self.dest)?;
    ensure_absent(&dest)?;
    let link = relative_link(&self.dest.parent().unwrap_or_default(), &self.source);
    symlink(&link, &dest).map_err(io_err(&dest))
  }
}

/// Path from directory `from` to `to`, both layer-relative.
fn relative_link(from: &ImagePath, to: &ImagePath) -> PathBuf {
  let from_parts: Vec<&str> = from.as_str().split('/').filter(|s| !s.is_empty()).collect();
  let to_parts: Vec<&str> = to.as_str().split('/').filter(|s| !s.is_empty()).collect();
  let common = from_parts.iter().zip(&to_parts).take_while(|(a, b)| a == b).count();

  let mut out = PathBuf::new();
  for _ in common..from_parts.len() {
    out.push("..");
  }
  for part in &to_parts[common..] {
    out.push(part);
  }
  if out.as_os_str().is_empty() {
    out.push(".");
  }
  out
}
