//! CCM FX Rates Crate
//!
//! This crate fetches USD-based exchange rates for the currency conversion
//! pipeline. Every provider answers the same question: "for this billing month,
//! how many units of each currency does one US dollar buy?"
//!
//! # Overview
//!
//! - [`CurrencyApiProvider`] - the public currency API, queried per date
//! - [`BackupRateTable`] - a pinned snapshot used when the API is unreachable
//!
//! Cross rates are derived from the USD table: if `1 USD = x SRC` and
//! `1 USD = y DEST`, then `1 SRC = y / x DEST`.
//!
//! ```text
//! +--------------------+        +------------------+
//! | CurrencyApiProvider| -----> |                  |
//! +--------------------+        |     UsdRates     | --> cross_rate(src, dest)
//! +--------------------+        |                  |
//! |  BackupRateTable   | -----> |                  |
//! +--------------------+        +------------------+
//! ```

pub mod errors;
pub mod models;
pub mod provider;

pub use errors::FxRateError;
pub use models::UsdRates;
pub use provider::backup::BackupRateTable;
pub use provider::currency_api::{CurrencyApiProvider, DEFAULT_CURRENCY_API_BASE_URL};
pub use provider::UsdRateProvider;
