//! Feature declarations as they appear on disk.

use std::path::PathBuf;

use serde::Deserialize;

use crate::item::RemovePathAction;

/// One feature: items declared by `target`, plus other features it pulls in
/// by target name.
#[derive(Debug, Clone, Deserialize)]
pub struct Feature {
  pub target: String,
  #[serde(default)]
  pub items: Vec<ItemSpec>,
  #[serde(default)]
  pub features: Vec<String>,
}

/// Where an item gets its host-side input from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Source {
  /// Output of another target, optionally a path inside it.
  Target {
    target: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    host_mount: bool,
  },
  Path(PathBuf),
}

/// Permission bits, either as a number or as an octal string like `"0755"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Mode {
  Bits(u32),
  Octal(String),
}

impl Mode {
  pub fn bits(&self) -> Result<u32, String> {
    match self {
      Mode::Bits(bits) => Ok(*bits),
      Mode::Octal(s) => {
        let digits = s.strip_prefix("0o").unwrap_or(s);
        u32::from_str_radix(digits, 8).map_err(|_| format!("invalid octal mode {s:?}"))
      }
    }
  }
}

/// One item declaration, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemSpec {
  MakeDirs {
    into_dir: String,
    path_to_make: String,
    #[serde(default)]
    mode: Option<Mode>,
    #[serde(default)]
    user_group: Option<String>,
  },
  InstallFile {
    #[serde(default)]
    source: Option<Source>,
    /// Inline file body, used instead of `source`.
    #[serde(default)]
    content: Option<String>,
    dest: String,
    #[serde(default)]
    mode: Option<Mode>,
    #[serde(default)]
    user_group: Option<String>,
  },
  SymlinkToDir {
    source: String,
    dest: String,
  },
  SymlinkToFile {
    source: String,
    dest: String,
  },
  Tarball {
    source: Source,
    into_dir: String,
    #[serde(default)]
    force_root_ownership: bool,
  },
  Clone {
    source: Source,
    source_path: String,
    dest: String,
    #[serde(default)]
    omit_outer_dir: bool,
    #[serde(default)]
    pre_existing_dest: bool,
  },
  ParentLayer {
    source: Source,
  },
  RpmInstall {
    name: String,
  },
  RpmRemove {
    name: String,
  },
  RemovePath {
    path: String,
    action: RemovePathAction,
  },
}
