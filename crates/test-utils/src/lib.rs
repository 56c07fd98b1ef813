//! Shared test utilities for DriftKV crates.
//!
//! This crate provides common test helpers to reduce boilerplate across test modules:
//!
//! - [`TestDir`] - Managed temporary directory with path helpers
//! - [`TimeTraveller`] - Advance a shared wall clock without sleeping
//! - [`assert_eventually`] - Poll a condition until it's true or timeout
//! - [`make_item`] - Engine item factory with sensible defaults
//! - [`strategies`] - proptest strategies for keys and manifests

#![deny(unsafe_code)]
// Test utilities are allowed to use unwrap for simplicity
#![cfg_attr(test, allow(clippy::disallowed_methods))]

mod assertions;
mod factory;
pub mod strategies;
mod test_dir;
mod time_traveller;

pub use assertions::assert_eventually;
pub use factory::{make_item, make_item_with_expiry};
pub use test_dir::TestDir;
pub use time_traveller::TimeTraveller;
