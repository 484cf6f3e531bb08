//! Run-scoped release of temporary resources.
//!
//! Anything a run acquires that must outlive a single item (staged inline
//! files, scratch directories) is registered on one [`CleanupStack`]. The
//! stack is unwound in reverse order of registration, either explicitly via
//! [`CleanupStack::close`] or when it is dropped.

use std::any::Any;
use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
#[error("cleanup {name} failed: {source}")]
pub struct CleanupError {
  pub name: String,
  #[source]
  pub source: std::io::Error,
}

type Action = Box<dyn FnOnce() -> std::io::Result<()>>;

enum Entry {
  Action { name: String, action: Action },
  Guard { name: String, _guard: Box<dyn Any> },
}

/// Release actions, unwound last-in first-out.
#[derive(Default)]
pub struct CleanupStack {
  entries: Vec<Entry>,
}

impl fmt::Debug for CleanupStack {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CleanupStack").field("entries", &self.entries.len()).finish()
  }
}

impl CleanupStack {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `action` to run when the stack unwinds.
  pub fn defer(&mut self, name: impl Into<String>, action: impl FnOnce() -> std::io::Result<()> + 'static) {
    self.entries.push(Entry::Action {
      name: name.into(),
      action: Box::new(action),
    });
  }

  /// Keep `guard` alive until the stack unwinds, then drop it.
  pub fn hold<T: 'static>(&mut self, name: impl Into<String>, guard: T) {
    self.entries.push(Entry::Guard {
      name: name.into(),
      _guard: Box::new(guard),
    });
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Unwind everything, returning the first failure. Later entries still
  /// run after a failure.
  pub fn close(mut self) -> Result<(), CleanupError> {
    match self.unwind().into_iter().next() {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  fn unwind(&mut self) -> Vec<CleanupError> {
    let mut errors = Vec::new();
    while let Some(entry) = self.entries.pop() {
      match entry {
        Entry::Action { name, action } => {
          debug!(name = %name, "running cleanup");
          if let Err(source) = action() {
            warn!(name = %name, error = %source, "cleanup failed");
            errors.push(CleanupError { name, source });
          }
        }
        Entry::Guard { name, _guard: guard } => {
          debug!(name = %name, "releasing guard");
          drop(guard);
        }
      }
    }
    errors
  }
}

impl Drop for CleanupStack {
  fn drop(&mut self) {
    // Failures were already logged by unwind.
    let _ = self.unwind();
  }
}
