//! Public currency API provider.
//!
//! Fetches `{base}/{YYYY-MM-DD}/currencies/usd.json`, which lists how many
//! units of every currency one US dollar bought on that date. Currency codes
//! in the payload are lower-case.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;

use crate::errors::FxRateError;
use crate::models::{UsdRates, UsdRatesPayload};
use crate::provider::UsdRateProvider;

/// Provider ID constant
const PROVIDER_ID: &str = "CURRENCY_API";

/// Default API root
pub const DEFAULT_CURRENCY_API_BASE_URL: &str =
    "https://cdn.jsdelivr.net/gh/fawazahmed0/currency-api@1";

/// Default HTTP request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP provider for the public currency API.
///
/// # Example
///
/// ```ignore
/// use ccm_fx_rates::CurrencyApiProvider;
///
/// let provider = CurrencyApiProvider::default();
/// let rates = provider.get_usd_rates(month).await?;
/// ```
pub struct CurrencyApiProvider {
    client: Client,
    base_url: String,
}

impl Default for CurrencyApiProvider {
    fn default() -> Self {
        Self::new(DEFAULT_CURRENCY_API_BASE_URL, REQUEST_TIMEOUT)
    }
}

impl CurrencyApiProvider {
    /// Create a provider against the given API root.
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn rates_url(&self, date: NaiveDate) -> String {
        format!(
            "{}/{}/currencies/usd.json",
            self.base_url,
            date.format("%Y-%m-%d")
        )
    }

    fn parse_body(date: NaiveDate, body: &str) -> Result<UsdRates, FxRateError> {
        let payload: UsdRatesPayload =
            serde_json::from_str(body).map_err(|e| FxRateError::MalformedResponse {
                provider: PROVIDER_ID.to_string(),
                message: e.to_string(),
            })?;

        let rates = UsdRates::from_payload(date, payload);
        if rates.is_empty() {
            return Err(FxRateError::MalformedResponse {
                provider: PROVIDER_ID.to_string(),
                message: "no usable rates in response".to_string(),
            });
        }
        Ok(rates)
    }
}

#[async_trait]
impl UsdRateProvider for CurrencyApiProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    async fn get_usd_rates(&self, month: NaiveDate) -> Result<UsdRates, FxRateError> {
        let url = self.rates_url(month);
        log::info!("Fetching USD rates for {} from {}", month, url);

        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FxRateError::ProviderError {
                provider: PROVIDER_ID.to_string(),
                message: format!("HTTP {}", status),
            });
        }

        let body = response.text().await?;
        Self::parse_body(month, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn month() -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 12, 1).unwrap()
    }

    #[test]
    fn test_provider_id() {
        let provider = CurrencyApiProvider::default();
        assert_eq!(provider.id(), "CURRENCY_API");
    }

    #[test]
    fn test_rates_url_uses_billing_month() {
        let provider = CurrencyApiProvider::default();
        assert_eq!(
            provider.rates_url(month()),
            "https://cdn.jsdelivr.net/gh/fawazahmed0/currency-api@1/2022-12-01/currencies/usd.json"
        );
    }

    #[test]
    fn test_rates_url_trims_trailing_slash() {
        let provider = CurrencyApiProvider::new("http://localhost:9000/", REQUEST_TIMEOUT);
        assert_eq!(
            provider.rates_url(month()),
            "http://localhost:9000/2022-12-01/currencies/usd.json"
        );
    }

    #[test]
    fn test_parse_body() {
        let rates = CurrencyApiProvider::parse_body(
            month(),
            r#"{"date": "2022-12-01", "usd": {"inr": 82.48, "usd": 1, "eur": 0.95}}"#,
        )
        .unwrap();

        assert_eq!(rates.date, month());
        assert_eq!(rates.get("INR"), Some(dec!(82.48)));
        assert_eq!(rates.cross_rate("USD", "INR").unwrap(), dec!(82.48));
    }

    #[test]
    fn test_parse_body_rejects_garbage() {
        let err = CurrencyApiProvider::parse_body(month(), "<html>rate limited</html>").unwrap_err();
        assert!(matches!(err, FxRateError::MalformedResponse { .. }));
        assert!(err.should_use_backup());
    }

    #[test]
    fn test_parse_body_rejects_empty_table() {
        let err = CurrencyApiProvider::parse_body(month(), r#"{"usd": {}}"#).unwrap_err();
        assert!(matches!(err, FxRateError::MalformedResponse { .. }));
    }
}
