//! Read-only toggling for a layer tree.
//!
//! Finalizing a layer clears every write bit beneath its root so that nothing,
//! including cleanup that runs after the build, can modify it. Unfinalizing
//! restores owner write access so a copy of the layer can be built upon.
//!
//! Only write bits are touched; the read and execute bits an item chose are
//! preserved. Symlinks are skipped since their own mode is meaningless.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

/// Error during read-only toggling.
#[derive(Debug, thiserror::Error)]
pub enum ImmutableError {
  #[error("failed to set permissions on {path}: {source}")]
  SetPermissions {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read metadata for {path}: {source}")]
  Metadata {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to traverse directory {path}: {source}")]
  WalkDir {
    path: String,
    #[source]
    source: walkdir::Error,
  },
}

const WRITE_BITS: u32 = 0o222;
const OWNER_WRITE: u32 = 0o200;

/// Recursively remove write permission from everything under `path`.
///
/// Unlike a best-effort cache cleanup, a layer that failed to finalize is not
/// usable, so the first failure is returned.
pub fn make_immutable(path: &Path) -> Result<(), ImmutableError> {
  if !path.exists() {
    return Ok(());
  }

  debug!(path = ?path, "making layer read-only");

  // Post-order: a directory loses write access only after its contents.
  for entry in WalkDir::new(path).contents_first(true) {
    let entry = entry.map_err(|e| ImmutableError::WalkDir {
      path: path.display().to_string(),
      source: e,
    })?;
    if entry.path_is_symlink() {
      continue;
    }
    update_mode(entry.path(), |mode| mode & !WRITE_BITS)?;
  }

  Ok(())
}

/// Recursively restore owner write permission under `path`.
pub fn make_mutable(path: &Path) -> Result<(), ImmutableError> {
  if !path.exists() {
    return Ok(());
  }

  debug!(path = ?path, "making layer writable");

  // Pre-order: a directory must be writable before we can touch its contents.
  // WalkDir only needs read+execute to descend, which finalize preserves.
  for entry in WalkDir::new(path) {
    let entry = entry.map_err(|e| ImmutableError::WalkDir {
      path: path.display().to_string(),
      source: e,
    })?;
    if entry.path_is_symlink() {
      continue;
    }
    update_mode(entry.path(), |mode| mode | OWNER_WRITE)?;
  }

  Ok(())
}

/// True if the root of `path` carries no write bits.
pub fn is_immutable(path: &Path) -> Result<bool, ImmutableError> {
  let metadata = fs::symlink_metadata(path).map_err(|e| ImmutableError::Metadata {
    path: path.display().to_string(),
    source: e,
  })?;
  Ok(metadata.permissions().mode() & WRITE_BITS == 0)
}

fn update_mode(path: &Path, f: impl Fn(u32) -> u32) -> Result<(), ImmutableError> {
  let metadata = fs::symlink_metadata(path).map_err(|e| ImmutableError::Metadata {
    path: path.display().to_string(),
    source: e,
  })?;

  let current = metadata.permissions().mode() & 0o7777;
  let new_mode = f(current);
  if new_mode == current {
    return Ok(());
  }

  fs::set_permissions(path, fs::Permissions::from_mode(new_mode)).map_err(|e| ImmutableError::SetPermissions {
    path: path.display().to_string(),
    source: e,
  })
}
