//! layerc-lib: Core types and logic for compiling image layers
//!
//! This crate turns declarative build items into a finished, read-only
//! filesystem layer:
//! - `facts`: what items provide to and require from the layer
//! - `item`: the closed set of build actions, including phase items
//! - `feature`: feature JSON to typed items
//! - `graph`: validation and deterministic dependency ordering
//! - `execute`: the build state machine and run-scoped cleanup
//! - `subvol`: the on-disk layer and its descriptor
//! - `sandbox`: running commands inside a build appliance

pub mod config;
pub mod consts;
pub mod execute;
pub mod facts;
pub mod feature;
pub mod graph;
pub mod item;
pub mod path;
pub mod sandbox;
pub mod subvol;
pub mod util;
