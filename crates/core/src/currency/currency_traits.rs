use super::currency_model::{
    CloudProvider, ConversionRequest, ConversionStatus, CostRewrite, CostTable,
    CustomConversionFactor, DefaultConversionFactor, HistoricalUpdateTrigger, QueryOptions,
    SourceCurrencyObservation,
};
use crate::errors::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Account configuration: preferred currency and persisted conversion factors.
#[async_trait]
pub trait CurrencyPreferenceRepositoryTrait: Send + Sync {
    /// Destination currency configured for the account, if any.
    fn get_preferred_currency(&self, account_id: &str) -> Result<Option<String>>;

    /// Persisted factors towards `destination_currency` whose month is on or
    /// before `up_to` (inclusive), in any conversion type.
    fn get_custom_conversion_factors(
        &self,
        account_id: &str,
        provider: CloudProvider,
        destination_currency: &str,
        up_to: NaiveDate,
    ) -> Result<Vec<CustomConversionFactor>>;

    /// Factors flagged for a historical update, outside `excluded_months`.
    fn get_historical_update_factors(
        &self,
        account_id: &str,
        provider: CloudProvider,
        excluded_months: &[NaiveDate],
    ) -> Result<Vec<CustomConversionFactor>>;

    /// Clears the historical-update flag for the given months. Returns rows touched.
    async fn clear_historical_update_flag(
        &self,
        account_id: &str,
        provider: CloudProvider,
        months: &[NaiveDate],
    ) -> Result<usize>;
}

/// Raw billing data and the tables derived from it.
#[async_trait]
pub trait BillingRepositoryTrait: Send + Sync {
    /// Distinct source currencies per (billing key, month) for the requested months.
    fn get_source_currencies(
        &self,
        account_id: &str,
        provider: CloudProvider,
        months: &[NaiveDate],
    ) -> Result<Vec<SourceCurrencyObservation>>;

    /// Tables to rewrite for `provider`, in rewrite order.
    fn list_cost_tables(&self, provider: CloudProvider) -> Vec<CostTable>;

    /// Adds `fx_rate_src_to_dest` and `ccm_preferred_currency` when missing.
    async fn ensure_currency_columns(&self, table: &CostTable) -> Result<()>;

    /// Multiplies monetary columns by the rewrite's rate expression. Returns rows updated.
    async fn apply_conversion(
        &self,
        table: &CostTable,
        rewrite: &CostRewrite,
        options: QueryOptions,
    ) -> Result<usize>;
}

/// Shared default-factor reference table.
#[async_trait]
pub trait ConversionFactorRepositoryTrait: Send + Sync {
    /// Replaces rows with the same key (account, provider, source, destination,
    /// month, source kind). Returns rows written.
    async fn replace_default_factors(&self, factors: Vec<DefaultConversionFactor>)
        -> Result<usize>;
}

#[async_trait]
pub trait CurrencyConversionServiceTrait: Send + Sync {
    async fn convert_historical_costs(&self, request: ConversionRequest) -> ConversionStatus;

    /// Builds the request from the factors flagged for a historical update.
    async fn plan_historical_update(
        &self,
        trigger: &HistoricalUpdateTrigger,
    ) -> Result<Option<ConversionRequest>>;

    async fn trigger_historical_update(&self, trigger: HistoricalUpdateTrigger)
        -> ConversionStatus;
}
