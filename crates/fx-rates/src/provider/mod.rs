//! Rate provider abstractions and implementations.
//!
//! - [`UsdRateProvider`] - the trait every provider implements
//! - [`currency_api`] - HTTP provider for the public currency API
//! - [`backup`] - pinned snapshot compiled into the binary
//!
//! Providers return the full USD table for a billing month. Picking the
//! currencies that matter, and the order in which providers are consulted,
//! is left to the caller.

mod traits;

pub mod backup;
pub mod currency_api;

pub use traits::UsdRateProvider;
