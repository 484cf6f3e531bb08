//! Provides/requires fact algebra.
//!
//! Items describe their effect on the layer as a set of [`Provide`] facts and
//! their preconditions as a set of [`Require`] facts. The dependency graph
//! connects a requirement to every provide that [`matches`] it.
//!
//! # Implied directories
//!
//! A provided path implies that its ancestors exist. An item only implies the
//! ancestors it must create itself: those strictly below the deepest directory
//! it requires on that path's ancestry (its *anchor*). A tarball extracted into
//! `/opt` that contains `pkg/bin/tool` therefore implies `/opt/pkg` and
//! `/opt/pkg/bin`, but not `/opt`, which it requires. The root is never
//! implied; it always comes from the phases.

mod types;

pub use types::*;

use std::collections::BTreeSet;

use crate::path::ImagePath;

/// How a provide relates to a requirement with the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
  /// The provide satisfies the requirement.
  Satisfied,
  /// Same key, incompatible kind (e.g. a file required as a directory).
  KindMismatch,
  /// The path is marked do-not-access.
  Protected,
  /// The facts are about different things.
  Unrelated,
}

/// Classify `provided` against `requirement`.
pub fn verdict(requirement: &Require, provided: &Provide) -> Verdict {
  if requirement.key() != provided.key() {
    return Verdict::Unrelated;
  }
  match (requirement, provided) {
    (_, Provide::DoNotAccess { .. }) => Verdict::Protected,
    (Require::Directory { .. }, Provide::Directory { .. } | Provide::OwnedDirectory { .. })
    | (
      Require::Directory { .. },
      Provide::Symlink {
        target: SymlinkTarget::Directory,
        ..
      },
    )
    | (Require::File { .. }, Provide::File { .. })
    | (
      Require::File { .. },
      Provide::Symlink {
        target: SymlinkTarget::File,
        ..
      },
    )
    | (Require::User { .. }, Provide::User { .. })
    | (Require::Group { .. }, Provide::Group { .. }) => Verdict::Satisfied,
    _ => Verdict::KindMismatch,
  }
}

/// True if `provided` satisfies `requirement`.
pub fn matches(requirement: &Require, provided: &Provide) -> bool {
  verdict(requirement, provided) == Verdict::Satisfied
}

/// Directories implied by `provides` that are not already explicit.
///
/// See the module docs for which ancestors count.
pub fn implied_directories(provides: &[Provide], requires: &[Require]) -> Vec<Provide> {
  let required_dirs: BTreeSet<&ImagePath> = requires
    .iter()
    .filter_map(|r| match r {
      Require::Directory { path } => Some(path),
      _ => None,
    })
    .collect();
  let explicit: BTreeSet<&ImagePath> = provides.iter().filter_map(Provide::path).collect();

  let mut implied: BTreeSet<ImagePath> = BTreeSet::new();
  for provide in provides {
    if provide.is_do_not_access() {
      continue;
    }
    let Some(path) = provide.path() else {
      continue;
    };
    for ancestor in path.ancestors() {
      if ancestor.is_root() || required_dirs.contains(&ancestor) {
        break;
      }
      if !explicit.contains(&ancestor) {
        implied.insert(ancestor);
      }
    }
  }

  implied.into_iter().map(Provide::directory).collect()
}
