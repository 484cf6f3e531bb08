//! Library integration tests: feature JSON in, finished layer out.

mod build_tests;
mod common;
mod feature_tests;
mod phase_tests;
