//! Minimal readers for a layer's `etc/passwd` and `etc/group`.
//!
//! User and group names are resolved against the layer being built, never
//! against the host, since the two can disagree on numeric ids.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswdError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("{path}:{line}: malformed entry")]
  Malformed { path: String, line: usize },

  #[error("{kind} {name:?} not found in {path}")]
  NotFound {
    kind: &'static str,
    name: String,
    path: String,
  },
}

/// One `name:...:id:...` entry; `id` is the uid for passwd and gid for group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountEntry {
  pub name: String,
  pub id: u32,
}

/// Parse the text of a passwd or group file.
///
/// Both formats keep the name in field 0 and the numeric id in field 2.
/// Blank lines and `#` comments are skipped.
pub fn parse_accounts(content: &str, path: &str) -> Result<Vec<AccountEntry>, PasswdError> {
  let mut out = Vec::new();
  for (idx, line) in content.lines().enumerate() {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }
    let fields: Vec<&str> = line.split(':').collect();
    let malformed = || PasswdError::Malformed {
      path: path.to_string(),
      line: idx + 1,
    };
    if fields.len() < 3 || fields[0].is_empty() {
      return Err(malformed());
    }
    let id = fields[2].parse::<u32>().map_err(|_| malformed())?;
    out.push(AccountEntry {
      name: fields[0].to_string(),
      id,
    });
  }
  Ok(out)
}

/// Read accounts from `root/rel`; a missing file yields no accounts.
pub fn read_accounts(root: &Path, rel: &str) -> Result<Vec<AccountEntry>, PasswdError> {
  let path = root.join(rel);
  match std::fs::read_to_string(&path) {
    Ok(content) => parse_accounts(&content, &path.display().to_string()),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
    Err(source) => Err(PasswdError::Read {
      path: path.display().to_string(),
      source,
    }),
  }
}

/// Look up the uid of `user` in the layer rooted at `root`.
pub fn lookup_uid(root: &Path, user: &str) -> Result<u32, PasswdError> {
  lookup(root, "etc/passwd", "user", user)
}

/// Look up the gid of `group` in the layer rooted at `root`.
pub fn lookup_gid(root: &Path, group: &str) -> Result<u32, PasswdError> {
  lookup(root, "etc/group", "group", group)
}

fn lookup(root: &Path, rel: &str, kind: &'static str, name: &str) -> Result<u32, PasswdError> {
  read_accounts(root, rel)?
    .into_iter()
    .find(|e| e.name == name)
    .map(|e| e.id)
    .ok_or_else(|| PasswdError::NotFound {
      kind,
      name: name.to_string(),
      path: root.join(rel).display().to_string(),
    })
}
