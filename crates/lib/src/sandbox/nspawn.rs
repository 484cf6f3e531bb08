//! `systemd-nspawn` backed [`ProcessRunner`].

use std::ffi::OsString;
use std::os::fd::RawFd;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use super::{ProcessRunner, RunError, RunOutput, RunRequest};

/// First descriptor number handed to the sandboxed command.
const LISTEN_FDS_START: RawFd = 3;

/// Runs commands as PID 2 of a non-booted container.
#[derive(Debug, Clone)]
pub struct NspawnRunner {
  program: PathBuf,
}

impl Default for NspawnRunner {
  fn default() -> Self {
    Self {
      program: PathBuf::from("systemd-nspawn"),
    }
  }
}

impl NspawnRunner {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
    }
  }

  /// The full argument vector passed to the nspawn binary.
  pub fn args(&self, request: &RunRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
      "--quiet".into(),
      "--register=no".into(),
      "--keep-unit".into(),
      "--as-pid2".into(),
      "--read-only".into(),
      "--console=pipe".into(),
    ];

    let mut dir = OsString::from("--directory=");
    dir.push(&request.root);
    args.push(dir);
    args.push(format!("--user={}", request.user).into());

    for mount in &request.binds {
      let mut arg = OsString::from(if mount.readonly { "--bind-ro=" } else { "--bind=" });
      arg.push(&mount.source);
      arg.push(":");
      arg.push(&mount.dest);
      args.push(arg);
    }

    for (key, value) in &request.env {
      args.push(format!("--setenv={key}={value}").into());
    }
    if !request.forward_fds.is_empty() {
      args.push(format!("--setenv=LISTEN_FDS={}", request.forward_fds.len()).into());
    }

    args.push("--".into());
    args.extend(request.cmd.iter().map(OsString::from));
    args
  }
}

/// Hand `fds` to the child as descriptors 3, 4, ... in order.
///
/// Every source is first duplicated above the target range, so a source
/// that is also an earlier target is never overwritten before it is placed.
fn forward_fds(command: &mut Command, fds: Vec<RawFd>) {
  command.env("LISTEN_FDS", fds.len().to_string());
  let floor = LISTEN_FDS_START + fds.len() as RawFd;
  // Filled in the child; allocated here since the child may not allocate.
  let mut moved = vec![-1; fds.len()];

  // SAFETY: only async-signal-safe libc calls between fork and exec.
  unsafe {
    command.pre_exec(move || {
      for (slot, &fd) in moved.iter_mut().zip(&fds) {
        *slot = libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, floor);
        if *slot < 0 {
          return Err(std::io::Error::last_os_error());
        }
      }
      // dup2 clears close-on-exec on the target; the high copies close at exec.
      for (offset, &fd) in moved.iter().enumerate() {
        if libc::dup2(fd, LISTEN_FDS_START + offset as RawFd) < 0 {
          return Err(std::io::Error::last_os_error());
        }
      }
      Ok(())
    });
  }
}

impl ProcessRunner for NspawnRunner {
  fn run(&self, request: &RunRequest) -> Result<RunOutput, RunError> {
    info!(root = %request.root.display(), cmd = %request, "running in container");

    let mut command = Command::new(&self.program);
    command
      .args(self.args(request))
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());

    if !request.forward_fds.is_empty() {
      forward_fds(&mut command, request.forward_fds.clone());
    }

    debug!(program = %self.program.display(), "spawning nspawn");
    let output = command.output().map_err(|source| RunError::Spawn {
      program: self.program.display().to_string(),
      source,
    })?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
      debug!(stderr = %stderr, "container stderr");
    }

    Ok(RunOutput {
      code: output.status.code(),
      stdout: output.stdout,
      stderr: output.stderr,
    })
  }
}
