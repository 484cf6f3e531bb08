use std::fmt;

use tracing::info;

use super::rpm_action::RpmTransaction;
use super::{FilesystemRootItem, Item, ItemError, ParentLayerItem, RemovePathItem, RpmAction, RpmActionItem};
use crate::config::LayerOpts;
use crate::sandbox::ProcessRunner;
use crate::subvol::Subvol;

/// Phases run in this order, before any ordinary item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PhaseOrder {
  MakeSubvol,
  RpmInstall,
  RpmRemove,
  RemovePaths,
}

impl fmt::Display for PhaseOrder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PhaseOrder::MakeSubvol => write!(f, "make_subvol"),
      PhaseOrder::RpmInstall => write!(f, "rpm_install"),
      PhaseOrder::RpmRemove => write!(f, "rpm_remove"),
      PhaseOrder::RemovePaths => write!(f, "remove_paths"),
    }
  }
}

/// The items of one phase, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhasePlan<'a> {
  pub order: PhaseOrder,
  pub items: Vec<&'a Item>,
}

impl PhasePlan<'_> {
  /// Validate the phase against `opts` and prepare it to run.
  ///
  /// Nothing is touched on disk here, so every phase can be checked before
  /// the first one runs.
  pub fn builder(&self, opts: &LayerOpts) -> Result<PhaseBuilder, ItemError> {
    match self.order {
      PhaseOrder::MakeSubvol => {
        let [item] = self.items.as_slice() else {
          return Err(ItemError::Invalid(format!(
            "expected exactly one make_subvol item, got {}",
            self.items.len()
          )));
        };
        match item {
          Item::ParentLayer(i) => Ok(PhaseBuilder::ParentLayer(i.clone())),
          Item::FilesystemRoot(i) => Ok(PhaseBuilder::FilesystemRoot(i.clone())),
          other => Err(self.misplaced(other)),
        }
      }
      PhaseOrder::RpmInstall | PhaseOrder::RpmRemove => {
        let action = if self.order == PhaseOrder::RpmInstall {
          RpmAction::Install
        } else {
          RpmAction::Remove
        };
        let mut rpms: Vec<&RpmActionItem> = Vec::new();
        for item in &self.items {
          match item {
            Item::RpmAction(i) if i.action == action => rpms.push(i),
            other => return Err(self.misplaced(other)),
          }
        }
        Ok(PhaseBuilder::Rpm(RpmTransaction::new(action, &rpms, opts)?))
      }
      PhaseOrder::RemovePaths => {
        let mut removals: Vec<RemovePathItem> = Vec::new();
        for item in &self.items {
          match item {
            Item::RemovePath(i) => removals.push(i.clone()),
            other => return Err(self.misplaced(other)),
          }
        }
        Ok(PhaseBuilder::RemovePaths(removals))
      }
    }
  }

  fn misplaced(&self, item: &Item) -> ItemError {
    ItemError::Invalid(format!("{item} does not belong to phase {}", self.order))
  }
}

/// A validated phase, ready to apply to the layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseBuilder {
  ParentLayer(ParentLayerItem),
  FilesystemRoot(FilesystemRootItem),
  Rpm(RpmTransaction),
  RemovePaths(Vec<RemovePathItem>),
}

impl PhaseBuilder {
  pub fn order(&self) -> PhaseOrder {
    match self {
      PhaseBuilder::ParentLayer(_) | PhaseBuilder::FilesystemRoot(_) => PhaseOrder::MakeSubvol,
      PhaseBuilder::Rpm(tx) => match tx.action {
        RpmAction::Install => PhaseOrder::RpmInstall,
        RpmAction::Remove => PhaseOrder::RpmRemove,
      },
      PhaseBuilder::RemovePaths(_) => PhaseOrder::RemovePaths,
    }
  }

  pub fn build(&self, subvol: &Subvol, runner: &dyn ProcessRunner) -> Result<(), ItemError> {
    info!(phase = %self.order(), "building phase");
    match self {
      PhaseBuilder::ParentLayer(item) => item.build(subvol),
      PhaseBuilder::FilesystemRoot(item) => item.build(subvol),
      PhaseBuilder::Rpm(tx) => tx.run(subvol, runner),
      PhaseBuilder::RemovePaths(items) => items.iter().try_for_each(|item| item.build(subvol)),
    }
  }
}
