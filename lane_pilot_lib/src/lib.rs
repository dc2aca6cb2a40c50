//! # Lane Pilot Library
//!
//! Shared types and utilities for the vision-language lane pilot.
//! Used by the driver node of the dora-rs dataflow.

pub mod types;
pub mod utils;

// Re-export everything for convenience
pub use types::*;
pub use utils::*;
