//! # Configuration Module
//!
//! Centralizes the on-disk geometry constants. Values are grouped with their
//! interdependencies documented and enforced through compile-time assertions;
//! import constants from here rather than defining them locally.

pub mod constants;
pub use constants::*;
