//! Rate provider trait definition.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::FxRateError;
use crate::models::UsdRates;

/// Source of USD-based exchange rates.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use ccm_fx_rates::{FxRateError, UsdRateProvider, UsdRates};
///
/// struct FixedProvider;
///
/// #[async_trait]
/// impl UsdRateProvider for FixedProvider {
///     fn id(&self) -> &'static str {
///         "FIXED"
///     }
///
///     async fn get_usd_rates(&self, month: NaiveDate) -> Result<UsdRates, FxRateError> {
///         let mut rates = UsdRates::new(month);
///         rates.insert("USD", Decimal::ONE);
///         Ok(rates)
///     }
/// }
/// ```
#[async_trait]
pub trait UsdRateProvider: Send + Sync {
    /// Constant identifier used in logs, e.g. "CURRENCY_API".
    fn id(&self) -> &'static str;

    /// Returns the USD table for the given billing month (first-of-month date).
    async fn get_usd_rates(&self, month: NaiveDate) -> Result<UsdRates, FxRateError>;
}
