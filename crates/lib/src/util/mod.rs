//! Shared utilities.
//!
//! Common utilities used across the crate including hashing, account database
//! parsing and test helpers.

pub mod hash;
pub mod passwd;

#[cfg(test)]
pub mod testutil;
