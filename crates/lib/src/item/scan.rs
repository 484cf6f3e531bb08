//! Derive provides from a tree that already exists on disk.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::ItemError;
use crate::consts::META_DIR;
use crate::facts::{Provide, SymlinkTarget};
use crate::path::ImagePath;

/// Facts for every entry of the host tree `src`, placed at `dest`.
///
/// `layer_root` anchors absolute symlink targets; its metadata directory is
/// reported as do-not-access and not descended into.
pub(crate) fn scan_tree(src: &Path, dest: &ImagePath, layer_root: &Path) -> Result<Vec<Provide>, ItemError> {
  let meta = layer_root.join(META_DIR);
  let mut out = Vec::new();

  let mut walker = WalkDir::new(src).sort_by_file_name().into_iter();
  while let Some(entry) = walker.next() {
    let entry = entry.map_err(|e| ItemError::Walk {
      path: src.to_path_buf(),
      source: e,
    })?;
    let rel = ImagePath::from_path(entry.path().strip_prefix(src).unwrap_or(Path::new("")))?;
    let path = dest.join(rel.as_str())?;
    let file_type = entry.file_type();

    if entry.path() == meta {
      out.push(Provide::DoNotAccess { path });
      if file_type.is_dir() {
        walker.skip_current_dir();
      }
      continue;
    }

    if file_type.is_dir() {
      out.push(Provide::directory(path));
    } else if file_type.is_symlink() {
      let target = if resolve_link(entry.path(), layer_root).is_some_and(|p| p.is_dir()) {
        SymlinkTarget::Directory
      } else {
        SymlinkTarget::File
      };
      out.push(Provide::Symlink { path, target });
    } else {
      out.push(Provide::file(path));
    }
  }

  Ok(out)
}

/// [`scan_tree`] for a tree copied to a `dest` that must not exist yet. A
/// directory at `dest` itself is claimed as an [`Provide::OwnedDirectory`].
pub(crate) fn scan_copy(src: &Path, dest: &ImagePath, layer_root: &Path) -> Result<Vec<Provide>, ItemError> {
  let mut out = scan_tree(src, dest, layer_root)?;
  for fact in &mut out {
    if matches!(fact, Provide::Directory { path } if *path == *dest) {
      *fact = Provide::OwnedDirectory { path: dest.clone() };
    }
  }
  Ok(out)
}

/// Where `link` points, with absolute targets taken relative to
/// `layer_root` rather than the host.
fn resolve_link(link: &Path, layer_root: &Path) -> Option<PathBuf> {
  let target = fs::read_link(link).ok()?;
  if target.is_absolute() {
    let rel = target.strip_prefix("/").ok()?;
    Some(layer_root.join(rel))
  } else {
    Some(link.parent()?.join(target))
  }
}
