//! Read-through caching for the Fusion template proxy.
//!
//! The interesting parts live in [`caching`]. The remaining modules carry the configuration,
//! logging and metrics plumbing the cache relies on.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod logging;
pub mod utils;
