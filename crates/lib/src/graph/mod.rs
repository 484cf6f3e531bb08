//! Dependency graph over build items.
//!
//! Phase items are split off and kept in declaration order. Ordinary items
//! are validated against each other as soon as the graph is constructed, so
//! conflicting declarations are rejected before anything touches the layer.
//! Once the phases ran, [`DependencyGraph::gen_dependency_order_items`]
//! resolves every requirement against the ordinary items and the facts the
//! phases left behind, and yields a deterministic build order.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::{debug, info};

use crate::facts::{FactKey, Provide, Require, Verdict, implied_directories, verdict};
use crate::item::{FilesystemRootItem, Item, ItemError, PhaseOrder, PhasePlan, PhasesProvideItem};

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("{item}: {source}")]
  Item {
    item: String,
    #[source]
    source: ItemError,
  },

  #[error("{path} is provided by both {first} and {second}")]
  Conflict {
    path: String,
    first: String,
    second: String,
  },

  #[error("{item} requires {requirement}, but {provider} provides {provided}")]
  KindMismatch {
    item: String,
    requirement: Require,
    provider: String,
    provided: Provide,
  },

  #[error("RPM {name} is both installed by {install} and removed by {remove}")]
  RpmConflict {
    name: String,
    install: String,
    remove: String,
  },

  #[error("only one item may create the subvolume, got {first} and {second}")]
  MultipleMakeSubvol { first: String, second: String },

  #[error("{item} requires {requirement}, which nothing provides")]
  Unsatisfied { item: String, requirement: Require },

  #[error("{item} requires {requirement}, which is protected")]
  ProtectedPath { item: String, requirement: Require },

  #[error("dependency cycle: {}", chain.join(" -> "))]
  Cycle { chain: Vec<String> },
}

/// Where a provide came from: an ordinary item by index, or the phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
  Item(usize),
  Phases,
}

/// Validated set of build items.
#[derive(Debug)]
pub struct DependencyGraph {
  phases: BTreeMap<PhaseOrder, Vec<Item>>,
  items: Vec<Item>,
  /// Explicit plus implied provides per ordinary item.
  provides: Vec<Vec<Provide>>,
  index: BTreeMap<FactKey, Vec<(usize, Provide)>>,
}

impl DependencyGraph {
  /// Partition `items` and check ordinary provides for conflicts.
  ///
  /// Without an item that creates the subvolume, one starting from an empty
  /// root is added for `layer_target`.
  pub fn new(items: Vec<Item>, layer_target: &str) -> Result<Self, GraphError> {
    let mut phases: BTreeMap<PhaseOrder, Vec<Item>> = BTreeMap::new();
    let mut ordinary = Vec::new();
    for item in items {
      match item.phase_order() {
        Some(order) => phases.entry(order).or_default().push(item),
        None => ordinary.push(item),
      }
    }

    let make_subvol = phases.entry(PhaseOrder::MakeSubvol).or_default();
    if let [first, second, ..] = make_subvol.as_slice() {
      return Err(GraphError::MultipleMakeSubvol {
        first: first.to_string(),
        second: second.to_string(),
      });
    }
    if make_subvol.is_empty() {
      make_subvol.push(Item::FilesystemRoot(FilesystemRootItem::new(layer_target)));
    }
    check_rpm_conflicts(&phases)?;

    let mut provides = Vec::with_capacity(ordinary.len());
    let mut index: BTreeMap<FactKey, Vec<(usize, Provide)>> = BTreeMap::new();
    for (idx, item) in ordinary.iter().enumerate() {
      let mut facts = item.provides().map_err(|source| GraphError::Item {
        item: item.to_string(),
        source,
      })?;
      facts.extend(implied_directories(&facts, &item.requires()));
      facts.sort();
      facts.dedup();
      debug!(item = %item, provides = facts.len(), "computed provides");

      for fact in &facts {
        let existing = index.entry(fact.key()).or_default();
        if let Some((other, _)) = existing.iter().find(|(_, p)| !p.can_share_key_with(fact)) {
          return Err(GraphError::Conflict {
            path: fact.key().to_string(),
            first: ordinary[*other].to_string(),
            second: item.to_string(),
          });
        }
        existing.push((idx, fact.clone()));
      }
      provides.push(facts);
    }

    info!(
      phases = phases.len(),
      items = ordinary.len(),
      "dependency graph constructed"
    );

    Ok(Self {
      phases,
      items: ordinary,
      provides,
      index,
    })
  }

  /// Phases in the order they must run, each with its items in declaration
  /// order.
  pub fn ordered_phases(&self) -> Vec<PhasePlan<'_>> {
    self
      .phases
      .iter()
      .filter(|(_, items)| !items.is_empty())
      .map(|(order, items)| PhasePlan {
        order: *order,
        items: items.iter().collect(),
      })
      .collect()
  }

  /// Provides of the `idx`-th ordinary item, implied directories included.
  pub fn provides_of(&self, idx: usize) -> &[Provide] {
    &self.provides[idx]
  }

  /// Ordinary items in an order where every provider precedes the items
  /// requiring it. Ties keep declaration order.
  ///
  /// `phases_provide` describes what the phases left in the layer; it
  /// satisfies requirements like any other provider but must not overlap
  /// with ordinary provides except on directories.
  pub fn gen_dependency_order_items(&self, phases_provide: &PhasesProvideItem) -> Result<Vec<&Item>, GraphError> {
    let seed_item = Item::PhasesProvide(phases_provide.clone());
    let mut seed: BTreeMap<FactKey, Vec<Provide>> = BTreeMap::new();
    for fact in phases_provide.provides().map_err(|source| GraphError::Item {
      item: seed_item.to_string(),
      source,
    })? {
      let facts = seed.entry(fact.key()).or_default();
      if !facts.contains(&fact) {
        facts.push(fact);
      }
    }
    debug!(facts = seed.len(), "seeded facts from phases");

    for (key, provided) in &self.index {
      let Some(seeded) = seed.get(key) else {
        continue;
      };
      for (idx, fact) in provided {
        if seeded.iter().any(|s| !s.can_share_key_with(fact)) {
          return Err(GraphError::Conflict {
            path: key.to_string(),
            first: seed_item.to_string(),
            second: self.items[*idx].to_string(),
          });
        }
      }
    }

    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(self.items.len(), 0);
    let nodes: Vec<NodeIndex> = (0..self.items.len()).map(|idx| graph.add_node(idx)).collect();

    for (idx, item) in self.items.iter().enumerate() {
      for requirement in item.requires() {
        let key = requirement.key();
        let candidates = self
          .index
          .get(&key)
          .into_iter()
          .flatten()
          .filter(|(provider, _)| *provider != idx)
          .map(|(provider, fact)| (Provider::Item(*provider), fact))
          .chain(seed.get(&key).into_iter().flatten().map(|fact| (Provider::Phases, fact)));

        let mut satisfied = false;
        let mut mismatch: Option<(Provider, &Provide)> = None;
        for (provider, fact) in candidates {
          match verdict(&requirement, fact) {
            Verdict::Satisfied => {
              satisfied = true;
              if let Provider::Item(from) = provider {
                graph.update_edge(nodes[from], nodes[idx], ());
              }
            }
            Verdict::Protected => {
              return Err(GraphError::ProtectedPath {
                item: item.to_string(),
                requirement,
              });
            }
            Verdict::KindMismatch => mismatch = mismatch.or(Some((provider, fact))),
            Verdict::Unrelated => {}
          }
        }

        if satisfied {
          continue;
        }
        if let Some((provider, fact)) = mismatch {
          let provider = match provider {
            Provider::Item(from) => self.items[from].to_string(),
            Provider::Phases => seed_item.to_string(),
          };
          return Err(GraphError::KindMismatch {
            item: item.to_string(),
            requirement,
            provider,
            provided: fact.clone(),
          });
        }
        return Err(GraphError::Unsatisfied {
          item: item.to_string(),
          requirement,
        });
      }
    }

    let order = self.topological_order(&graph, &nodes)?;
    Ok(order.into_iter().map(|idx| &self.items[idx]).collect())
  }

  /// Kahn's algorithm, always taking the earliest-declared ready item.
  fn topological_order(&self, graph: &DiGraph<usize, ()>, nodes: &[NodeIndex]) -> Result<Vec<usize>, GraphError> {
    let mut in_degree: Vec<usize> = nodes
      .iter()
      .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
      .collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
      .iter()
      .enumerate()
      .filter(|(_, d)| **d == 0)
      .map(|(idx, _)| Reverse(idx))
      .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(idx)) = ready.pop() {
      order.push(idx);
      for next in graph.neighbors_directed(nodes[idx], Direction::Outgoing) {
        let next = graph[next];
        in_degree[next] -= 1;
        if in_degree[next] == 0 {
          ready.push(Reverse(next));
        }
      }
    }

    if order.len() < nodes.len() {
      return Err(GraphError::Cycle {
        chain: self.find_cycle(graph),
      });
    }
    Ok(order)
  }

  /// One dependency cycle, as item names, closed by repeating its start.
  fn find_cycle(&self, graph: &DiGraph<usize, ()>) -> Vec<String> {
    let Some(component) = tarjan_scc(graph)
      .into_iter()
      .filter(|scc| scc.len() > 1)
      .min_by_key(|scc| scc.iter().map(|n| graph[*n]).min())
    else {
      return Vec::new();
    };
    let members: BTreeSet<NodeIndex> = component.iter().copied().collect();

    // Inside a strongly connected component every walk eventually repeats.
    let mut path: Vec<NodeIndex> = Vec::new();
    let mut cur = component.iter().copied().min_by_key(|n| graph[*n]);
    while let Some(node) = cur {
      if let Some(pos) = path.iter().position(|n| *n == node) {
        let mut chain: Vec<String> = path[pos..].iter().map(|n| self.items[graph[*n]].to_string()).collect();
        chain.push(self.items[graph[node]].to_string());
        return chain;
      }
      path.push(node);
      cur = graph
        .neighbors_directed(node, Direction::Outgoing)
        .filter(|n| members.contains(n))
        .min_by_key(|n| graph[*n]);
    }
    Vec::new()
  }
}

fn rpm_names(phases: &BTreeMap<PhaseOrder, Vec<Item>>, order: PhaseOrder) -> BTreeMap<&str, &Item> {
  phases
    .get(&order)
    .into_iter()
    .flatten()
    .filter_map(|item| match item {
      Item::RpmAction(rpm) => Some((rpm.name.as_str(), item)),
      _ => None,
    })
    .collect()
}

fn check_rpm_conflicts(phases: &BTreeMap<PhaseOrder, Vec<Item>>) -> Result<(), GraphError> {
  let removes = rpm_names(phases, PhaseOrder::RpmRemove);
  for (name, install) in rpm_names(phases, PhaseOrder::RpmInstall) {
    if let Some(remove) = removes.get(name) {
      return Err(GraphError::RpmConflict {
        name: name.to_string(),
        install: install.to_string(),
        remove: remove.to_string(),
      });
    }
  }
  Ok(())
}
