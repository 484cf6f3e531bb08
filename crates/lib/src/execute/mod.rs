//! Layer build execution.
//!
//! A [`LayerBuilder`] drives one run against one subvolume:
//! - every phase builder is constructed (and so validated) before the first
//!   phase runs, then the phases run in order
//! - the layer is scanned, and ordinary items are built in dependency order
//! - the layer is made read-only
//!
//! The first failure aborts the run and leaves the layer as it is, writable,
//! for inspection. Nothing is rolled back.

mod cleanup;
mod types;

use std::path::Path;

use tracing::{error, info};

use crate::config::LayerOpts;
use crate::graph::DependencyGraph;
use crate::item::{Item, PhaseBuilder, PhasesProvideItem};
use crate::sandbox::ProcessRunner;
use crate::subvol::{Subvol, SubvolumeOnDisk};

pub use cleanup::{CleanupError, CleanupStack};
pub use types::{BuildError, BuildState};

/// State machine applying a [`DependencyGraph`] to a [`Subvol`].
pub struct LayerBuilder<'a> {
  graph: DependencyGraph,
  subvol: Subvol,
  opts: &'a LayerOpts,
  runner: &'a dyn ProcessRunner,
  state: BuildState,
}

impl<'a> LayerBuilder<'a> {
  pub fn new(graph: DependencyGraph, subvol: Subvol, opts: &'a LayerOpts, runner: &'a dyn ProcessRunner) -> Self {
    Self {
      graph,
      subvol,
      opts,
      runner,
      state: BuildState::Initialized,
    }
  }

  pub fn state(&self) -> BuildState {
    self.state
  }

  pub fn subvol(&self) -> &Subvol {
    &self.subvol
  }

  /// Run `f` if in `expected` state, moving to `next` on success and to
  /// `Failed` otherwise.
  fn step<T>(
    &mut self,
    name: &'static str,
    expected: BuildState,
    next: BuildState,
    f: impl FnOnce(&Self) -> Result<T, BuildError>,
  ) -> Result<T, BuildError> {
    if self.state != expected {
      return Err(BuildError::InvalidState {
        step: name,
        expected,
        actual: self.state,
      });
    }
    match f(self) {
      Ok(value) => {
        self.state = next;
        Ok(value)
      }
      Err(e) => {
        error!(step = name, error = %e, "layer build failed");
        self.state = BuildState::Failed;
        Err(e)
      }
    }
  }

  /// Validate every phase, then apply them in order.
  pub fn build_phases(&mut self) -> Result<(), BuildError> {
    self.step("build phases", BuildState::Initialized, BuildState::PhasesBuilt, |this| {
      let mut builders: Vec<PhaseBuilder> = Vec::new();
      for plan in this.graph.ordered_phases() {
        let builder = plan.builder(this.opts).map_err(|source| BuildError::Phase {
          phase: plan.order,
          source,
        })?;
        builders.push(builder);
      }

      for builder in &builders {
        builder
          .build(&this.subvol, this.runner)
          .map_err(|source| BuildError::Phase {
            phase: builder.order(),
            source,
          })?;
      }
      info!(phases = builders.len(), "phases built");
      Ok(())
    })
  }

  /// Build ordinary items in dependency order, seeded with what the phases
  /// produced.
  pub fn build_items(&mut self) -> Result<(), BuildError> {
    self.step("build items", BuildState::PhasesBuilt, BuildState::ItemsBuilt, |this| {
      let seed = PhasesProvideItem::new(this.opts.layer_target.clone(), this.subvol.path());
      let items = this.graph.gen_dependency_order_items(&seed)?;
      for item in &items {
        info!(item = %item, "building item");
        item.build(&this.subvol, this.opts).map_err(|source| BuildError::Item {
          item: item.to_string(),
          source,
        })?;
      }
      info!(items = items.len(), "items built");
      Ok(())
    })
  }

  /// Mark the layer read-only.
  pub fn finalize(&mut self) -> Result<(), BuildError> {
    self.step("finalize", BuildState::ItemsBuilt, BuildState::Finalized, |this| {
      this.subvol.set_readonly(true).map_err(BuildError::Finalize)?;
      info!(path = %this.subvol.path().display(), "layer finalized");
      Ok(())
    })
  }

  /// Describe the finalized layer.
  pub fn describe(&self) -> Result<SubvolumeOnDisk, BuildError> {
    if self.state != BuildState::Finalized {
      return Err(BuildError::InvalidState {
        step: "describe",
        expected: BuildState::Finalized,
        actual: self.state,
      });
    }
    Ok(SubvolumeOnDisk::from_subvolume_path(
      self.subvol.path(),
      &self.opts.subvolumes_dir,
      &self.opts.layer_target,
    )?)
  }
}

/// Build `items` into `subvolumes_dir/subvolume_rel_path` and describe the
/// result.
///
/// Conflicting or otherwise invalid items are rejected before the
/// subvolume is created.
pub fn build_layer(
  items: Vec<Item>,
  subvolume_rel_path: &Path,
  opts: &LayerOpts,
  runner: &dyn ProcessRunner,
) -> Result<SubvolumeOnDisk, BuildError> {
  info!(layer = %opts.layer_target, items = items.len(), "building layer");
  let graph = DependencyGraph::new(items, &opts.layer_target)?;
  let subvol = Subvol::new(opts.subvolumes_dir.join(subvolume_rel_path));

  let mut builder = LayerBuilder::new(graph, subvol, opts, runner);
  builder.build_phases()?;
  builder.build_items()?;
  builder.finalize()?;
  builder.describe()
}
