//! Shared helpers for the segstore benchmarks.

pub mod utils;
