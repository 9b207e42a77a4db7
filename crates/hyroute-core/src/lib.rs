//! Core constants shared across hyroute crates.
//!
//! This crate provides:
//! - Default configuration values
//! - Error type constants for logging and metrics labels

pub mod defaults;
pub mod errors;

pub use defaults::*;
pub use errors::*;
