//! Error and state types for building a layer.

use std::fmt;

use thiserror::Error;

use crate::graph::GraphError;
use crate::item::{ItemError, PhaseOrder};
use crate::subvol::{DescribeError, SubvolError};

/// Where a [`LayerBuilder`](super::LayerBuilder) is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
  Initialized,
  PhasesBuilt,
  ItemsBuilt,
  Finalized,
  Failed,
}

impl fmt::Display for BuildState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      BuildState::Initialized => "initialized",
      BuildState::PhasesBuilt => "phases built",
      BuildState::ItemsBuilt => "items built",
      BuildState::Finalized => "finalized",
      BuildState::Failed => "failed",
    };
    f.write_str(name)
  }
}

/// Errors that can occur while building a layer.
#[derive(Debug, Error)]
pub enum BuildError {
  /// The items do not form a valid, orderable set.
  #[error(transparent)]
  Graph(#[from] GraphError),

  /// An ordinary item failed to build.
  #[error("failed to build {item}: {source}")]
  Item {
    item: String,
    #[source]
    source: ItemError,
  },

  /// A phase failed validation or failed to build.
  #[error("phase {phase} failed: {source}")]
  Phase {
    phase: PhaseOrder,
    #[source]
    source: ItemError,
  },

  /// The finished layer could not be made read-only.
  #[error("failed to finalize layer: {0}")]
  Finalize(#[source] SubvolError),

  /// The finished layer could not be described.
  #[error("failed to describe layer: {0}")]
  Describe(#[from] DescribeError),

  /// A step was requested out of order.
  #[error("cannot {step} while {actual}, expected {expected}")]
  InvalidState {
    step: &'static str,
    expected: BuildState,
    actual: BuildState,
  },
}
