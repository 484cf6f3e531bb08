//! Shared helpers for library integration tests.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use layerc_lib::config::LayerOpts;
use layerc_lib::sandbox::{ProcessRunner, RunError, RunOutput, RunRequest};
use layerc_lib::subvol::immutable::make_mutable;
use tempfile::TempDir;

/// Isolated subvolumes directory plus a place for feature inputs.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    fs::create_dir(temp.path().join("subvols")).unwrap();
    Self { temp }
  }

  pub fn subvolumes_dir(&self) -> PathBuf {
    self.temp.path().join("subvols")
  }

  pub fn layer(&self, rel: &str) -> PathBuf {
    self.subvolumes_dir().join(rel)
  }

  pub fn opts(&self, target: &str) -> LayerOpts {
    LayerOpts::new(target, self.subvolumes_dir())
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
  }

  /// A layer that looks like the output of an earlier build.
  pub fn parent_layer(&self, rel: &str, files: &[(&str, &str)]) -> PathBuf {
    let root = self.layer(rel);
    fs::create_dir_all(root.join(".meta")).unwrap();
    for (path, content) in files {
      let path = root.join(path);
      fs::create_dir_all(path.parent().unwrap()).unwrap();
      fs::write(path, content).unwrap();
    }
    root
  }
}

impl Drop for TestEnv {
  fn drop(&mut self) {
    // Finalized layers have no write bits left; restore them so the temp
    // directory can be removed.
    let _ = make_mutable(&self.subvolumes_dir());
  }
}

/// Runner that records requests and pretends they succeeded.
pub struct RecordingRunner {
  pub requests: RefCell<Vec<RunRequest>>,
  pub code: Option<i32>,
}

impl RecordingRunner {
  pub fn succeeding() -> Self {
    Self {
      requests: RefCell::new(Vec::new()),
      code: Some(0),
    }
  }

  pub fn failing(code: i32) -> Self {
    Self {
      requests: RefCell::new(Vec::new()),
      code: Some(code),
    }
  }
}

impl ProcessRunner for RecordingRunner {
  fn run(&self, request: &RunRequest) -> Result<RunOutput, RunError> {
    self.requests.borrow_mut().push(request.clone());
    Ok(RunOutput {
      code: self.code,
      stdout: Vec::new(),
      stderr: b"simulated failure".to_vec(),
    })
  }
}

pub fn read(path: &Path) -> String {
  fs::read_to_string(path).unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()))
}
