//! CCM Core - Domain entities, services, and traits.
//!
//! This crate contains the currency conversion logic for cloud cost data.
//! It is database-agnostic and defines traits that are implemented
//! by the `storage-sqlite` crate.

pub mod constants;
pub mod currency;
pub mod errors;
pub mod utils;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
