//! # herald-common
//!
//! Shared configuration, models, and error handling used across all Herald crates.
//! This is the foundation layer: no delivery or storage logic, just primitives and contracts.

pub mod config;
pub mod error;
pub mod models;
