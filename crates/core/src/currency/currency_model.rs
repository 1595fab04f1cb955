use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::currency_errors::CurrencyError;
use super::rate_expression::RateExpression;
use crate::constants::DEFAULT_QUERY_TIMEOUT;
use crate::errors::Result;
use crate::utils::time_utils::first_of_month;

/// Cloud whose billing data is being converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CloudProvider {
    Gcp,
    Azure,
    Aws,
}

impl CloudProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::Gcp => "GCP",
            CloudProvider::Azure => "AZURE",
            CloudProvider::Aws => "AWS",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudProvider {
    type Err = CurrencyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GCP" => Ok(CloudProvider::Gcp),
            "AZURE" => Ok(CloudProvider::Azure),
            "AWS" => Ok(CloudProvider::Aws),
            other => Err(CurrencyError::InvalidRequest(format!(
                "unknown cloud provider '{}'",
                other
            ))),
        }
    }
}

/// One invocation of the conversion pipeline. Immutable once normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    pub account_id: String,
    pub cloud_service_provider: CloudProvider,
    pub months: Vec<NaiveDate>,
    #[serde(default, alias = "userInputfxRates")]
    pub user_input_fx_rates: HashMap<String, Decimal>,
}

impl ConversionRequest {
    pub fn new(account_id: &str, provider: CloudProvider, months: Vec<NaiveDate>) -> Self {
        Self {
            account_id: account_id.to_string(),
            cloud_service_provider: provider,
            months,
            user_input_fx_rates: HashMap::new(),
        }
    }

    pub fn with_override(mut self, currency: &str, rate: Decimal) -> Self {
        self.user_input_fx_rates.insert(currency.to_string(), rate);
        self
    }

    /// Snaps months to their first day, sorts and dedupes them, and upper-cases
    /// override codes. Non-positive overrides are dropped with a warning.
    pub fn normalized(self) -> Result<Self> {
        let account_id = self.account_id.trim().to_string();
        if account_id.is_empty() {
            return Err(CurrencyError::InvalidRequest("accountId is empty".to_string()).into());
        }

        let months: BTreeSet<NaiveDate> = self.months.into_iter().map(first_of_month).collect();
        if months.is_empty() {
            return Err(CurrencyError::InvalidRequest("no billing months given".to_string()).into());
        }

        let mut overrides = HashMap::with_capacity(self.user_input_fx_rates.len());
        for (currency, rate) in self.user_input_fx_rates {
            if rate <= Decimal::ZERO {
                log::warn!("Ignoring non-positive override {} for {}", rate, currency);
                continue;
            }
            overrides.insert(currency.trim().to_uppercase(), rate);
        }

        Ok(Self {
            account_id,
            cloud_service_provider: self.cloud_service_provider,
            months: months.into_iter().collect(),
            user_input_fx_rates: overrides,
        })
    }
}

/// Request to plan and run a historical update from the flags the account set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalUpdateTrigger {
    pub account_id: String,
    pub cloud_service_provider: CloudProvider,
    /// Months left alone because regular ingestion may still write to them.
    /// Defaults to the current month.
    #[serde(default)]
    pub disable_historical_update_for_months: Vec<NaiveDate>,
}

/// Exchange rate reported inside the provider's own billing export.
///
/// Already inverted: one unit of the source currency is worth `rate` units of
/// `destination_currency`.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedRate {
    pub destination_currency: String,
    pub rate: Decimal,
}

impl EmbeddedRate {
    /// Builds the hint from the export's "billing units per pricing unit" figure.
    pub fn from_reported(pricing_currency: &str, reported_rate: Decimal) -> Option<Self> {
        if reported_rate <= Decimal::ZERO || pricing_currency.trim().is_empty() {
            return None;
        }
        Decimal::ONE
            .checked_div(reported_rate)
            .map(|rate| EmbeddedRate {
                destination_currency: pricing_currency.trim().to_uppercase(),
                rate,
            })
    }
}

/// The currency one billing key was charged in during one month.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceCurrencyObservation {
    /// Subscription or billing-account id
    pub billing_key: String,
    pub month: NaiveDate,
    pub source_currency: String,
    pub embedded_rate: Option<EmbeddedRate>,
}

/// Where a resolved rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateSource {
    BillingExport,
    UserOverride,
    CustomFactor,
    Api,
    Backup,
}

impl RateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateSource::BillingExport => "BILLING_EXPORT",
            RateSource::UserOverride => "USER_OVERRIDE",
            RateSource::CustomFactor => "CUSTOM_FACTOR",
            RateSource::Api => "API",
            RateSource::Backup => "BACKUP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedRate {
    pub rate: Decimal,
    pub source: RateSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConversionType {
    Custom,
    Default,
}

impl ConversionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionType::Custom => crate::constants::CONVERSION_TYPE_CUSTOM,
            ConversionType::Default => crate::constants::CONVERSION_TYPE_DEFAULT,
        }
    }

    pub fn from_db(value: &str) -> Self {
        if value.eq_ignore_ascii_case(crate::constants::CONVERSION_TYPE_CUSTOM) {
            ConversionType::Custom
        } else {
            ConversionType::Default
        }
    }
}

/// A conversion factor row the account entered or accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomConversionFactor {
    pub account_id: String,
    pub cloud_service_provider: CloudProvider,
    pub source_currency: String,
    pub destination_currency: String,
    pub conversion_factor: Decimal,
    pub month: NaiveDate,
    pub conversion_type: ConversionType,
    pub is_historical_update_required: bool,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversionSource {
    Api,
    BillingExport,
    BillingExportSrcCcy,
}

impl ConversionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionSource::Api => "API",
            ConversionSource::BillingExport => "BILLING_EXPORT",
            ConversionSource::BillingExportSrcCcy => "BILLING_EXPORT_SRC_CCY",
        }
    }
}

/// Row of the shared default-factor reference table.
///
/// API rows are shared across accounts, so `account_id` and
/// `cloud_service_provider` are empty for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultConversionFactor {
    pub account_id: Option<String>,
    pub cloud_service_provider: Option<CloudProvider>,
    pub source_currency: String,
    pub destination_currency: String,
    pub conversion_factor: Decimal,
    pub month: NaiveDate,
    pub conversion_source: ConversionSource,
}

/// A table whose monetary columns get rewritten in the preferred currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostTable {
    pub name: String,
    pub start_time_column: String,
    pub billing_key_column: String,
    pub monetary_columns: Vec<String>,
    /// Column holding the cloud name, for tables shared by all clouds.
    pub provider_column: Option<String>,
}

/// One rewrite, shared by every table of the run.
#[derive(Debug, Clone, PartialEq)]
pub struct CostRewrite {
    pub account_id: String,
    pub provider: CloudProvider,
    pub months: Vec<NaiveDate>,
    pub preferred_currency: String,
    pub expression: RateExpression,
}

/// Limits for one rewrite job on the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub timeout: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

/// Knobs the host application sets for the pipeline.
#[derive(Debug, Clone)]
pub struct ConversionSettings {
    pub rewrite_options: QueryOptions,
    /// Store API rates in the default-factor table for later runs.
    pub write_back_default_factors: bool,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            rewrite_options: QueryOptions::default(),
            write_back_default_factors: true,
        }
    }
}

/// Final state of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionStatus {
    Converted {
        tables_updated: usize,
        rows_updated: usize,
    },
    NoPreferredCurrency,
    NoBillingData,
    NoHistoricalUpdate,
    Incomplete(Vec<super::MissingRate>),
    PartiallyApplied {
        failed_tables: Vec<String>,
    },
    Failed(String),
}

impl ConversionStatus {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ConversionStatus::Converted { .. }
                | ConversionStatus::NoPreferredCurrency
                | ConversionStatus::NoBillingData
                | ConversionStatus::NoHistoricalUpdate
        )
    }

    /// Short status line handed back to the caller.
    pub fn message(&self) -> &'static str {
        match self {
            ConversionStatus::Converted { .. } => {
                "Historical cost successfully converted in preferred currency."
            }
            ConversionStatus::NoPreferredCurrency => {
                "No preferred currency configured; nothing to convert."
            }
            ConversionStatus::NoBillingData => {
                "No billing data found for the requested months; nothing to convert."
            }
            ConversionStatus::NoHistoricalUpdate => "No months flagged for historical update.",
            ConversionStatus::Incomplete(_) => {
                "Required conversion factors missing; historical cost left unchanged."
            }
            ConversionStatus::PartiallyApplied { .. } | ConversionStatus::Failed(_) => {
                "Failed to convert historical cost data in preferred currency."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let json = r#"{
            "accountId": "nvsv7gjbtzya3cgsgxnocg",
            "cloudServiceProvider": "AZURE",
            "months": ["2022-12-01", "2022-11-01"],
            "userInputFxRates": {"INR": 82.48}
        }"#;
        let request: ConversionRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.cloud_service_provider, CloudProvider::Azure);
        assert_eq!(request.months.len(), 2);
        assert_eq!(request.user_input_fx_rates.get("INR"), Some(&dec!(82.48)));
    }

    #[test]
    fn test_request_without_overrides() {
        let json = r#"{"accountId": "a", "cloudServiceProvider": "GCP", "months": ["2022-12-01"]}"#;
        let request: ConversionRequest = serde_json::from_str(json).unwrap();
        assert!(request.user_input_fx_rates.is_empty());
    }

    #[test]
    fn test_normalized_sorts_and_snaps_months() {
        let request = ConversionRequest::new(
            " acc ",
            CloudProvider::Gcp,
            vec![ymd(2022, 12, 1), ymd(2022, 11, 15), ymd(2022, 12, 20)],
        )
        .with_override("inr", dec!(82.5))
        .with_override("EUR", dec!(-1))
        .normalized()
        .unwrap();

        assert_eq!(request.account_id, "acc");
        assert_eq!(request.months, vec![ymd(2022, 11, 1), ymd(2022, 12, 1)]);
        assert_eq!(request.user_input_fx_rates.get("INR"), Some(&dec!(82.5)));
        assert!(!request.user_input_fx_rates.contains_key("EUR"));
    }

    #[test]
    fn test_normalized_rejects_empty_months() {
        let result = ConversionRequest::new("acc", CloudProvider::Gcp, vec![]).normalized();
        assert!(result.is_err());
    }

    #[test]
    fn test_embedded_rate_inverts_reported_rate() {
        let hint = EmbeddedRate::from_reported("usd", dec!(80)).unwrap();
        assert_eq!(hint.destination_currency, "USD");
        assert_eq!(hint.rate, dec!(0.0125));

        assert!(EmbeddedRate::from_reported("USD", Decimal::ZERO).is_none());
        assert!(EmbeddedRate::from_reported("", dec!(1)).is_none());
    }

    #[test]
    fn test_cloud_provider_from_str() {
        assert_eq!("azure".parse::<CloudProvider>().unwrap(), CloudProvider::Azure);
        assert!("oracle".parse::<CloudProvider>().is_err());
    }

    #[test]
    fn test_status_messages() {
        let converted = ConversionStatus::Converted {
            tables_updated: 3,
            rows_updated: 10,
        };
        assert!(converted.is_success());
        assert_eq!(
            converted.message(),
            "Historical cost successfully converted in preferred currency."
        );

        let partial = ConversionStatus::PartiallyApplied {
            failed_tables: vec!["unified_table".to_string()],
        };
        assert!(!partial.is_success());
        assert_eq!(
            partial.message(),
            "Failed to convert historical cost data in preferred currency."
        );
    }
}
