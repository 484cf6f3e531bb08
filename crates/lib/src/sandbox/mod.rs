//! Running commands inside another layer.
//!
//! Phase builders that need a package manager do not run it on the host:
//! they describe the command, the root it runs against and what to mount,
//! and hand that to a [`ProcessRunner`].

mod nspawn;

pub use nspawn::NspawnRunner;

use std::collections::BTreeMap;
use std::fmt;
use std::os::fd::RawFd;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
  #[error("failed to spawn {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("command failed with exit code {code:?}: {cmd}\n{stderr}")]
  Failed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },
}

/// A host path made visible inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
  pub source: PathBuf,
  pub dest: PathBuf,
  pub readonly: bool,
}

impl BindMount {
  pub fn rw(source: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
    Self {
      source: source.into(),
      dest: dest.into(),
      readonly: false,
    }
  }

  pub fn ro(source: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
    Self {
      source: source.into(),
      dest: dest.into(),
      readonly: true,
    }
  }
}

/// Everything needed to run one command in isolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
  pub cmd: Vec<String>,
  /// Layer used as `/` for the command.
  pub root: PathBuf,
  pub binds: Vec<BindMount>,
  pub user: String,
  pub env: BTreeMap<String, String>,
  /// Host descriptors passed to the command as 3, 4, ...
  pub forward_fds: Vec<RawFd>,
}

impl RunRequest {
  pub fn new(root: impl Into<PathBuf>, cmd: Vec<String>) -> Self {
    Self {
      cmd,
      root: root.into(),
      binds: Vec::new(),
      user: "root".to_string(),
      env: BTreeMap::new(),
      forward_fds: Vec::new(),
    }
  }

  pub fn bind(mut self, mount: BindMount) -> Self {
    self.binds.push(mount);
    self
  }
}

impl fmt::Display for RunRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.cmd.join(" "))
  }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
  pub code: Option<i32>,
  pub stdout: Vec<u8>,
  pub stderr: Vec<u8>,
}

impl RunOutput {
  pub fn success(&self) -> bool {
    self.code == Some(0)
  }

  /// Turn a non-zero exit into [`RunError::Failed`].
  pub fn check(self, request: &RunRequest) -> Result<Self, RunError> {
    if self.success() {
      return Ok(self);
    }
    Err(RunError::Failed {
      cmd: request.to_string(),
      code: self.code,
      stderr: String::from_utf8_lossy(&self.stderr).trim().to_string(),
    })
  }
}

/// Executes a [`RunRequest`] to completion.
pub trait ProcessRunner {
  fn run(&self, request: &RunRequest) -> Result<RunOutput, RunError>;
}
