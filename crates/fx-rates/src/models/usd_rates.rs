use std::collections::HashMap;

use chrono::NaiveDate;
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::errors::FxRateError;

/// Wire shape of `currencies/usd.json`: `{"date": "...", "usd": {"inr": 82.48}}`.
///
/// The backup snapshot stores one of these per month as well.
#[derive(Debug, Deserialize)]
pub(crate) struct UsdRatesPayload {
    #[serde(default)]
    #[allow(dead_code)]
    pub date: Option<String>,
    pub usd: HashMap<String, f64>,
}

/// Units of each currency bought by one US dollar on a given date.
///
/// Codes are stored upper-case. Non-finite and non-positive rates are dropped
/// on ingestion so every stored rate can be used as a divisor.
#[derive(Debug, Clone, PartialEq)]
pub struct UsdRates {
    pub date: NaiveDate,
    rates: HashMap<String, Decimal>,
}

impl UsdRates {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            rates: HashMap::new(),
        }
    }

    pub(crate) fn from_payload(date: NaiveDate, payload: UsdRatesPayload) -> Self {
        let mut table = Self::new(date);
        for (code, rate) in payload.usd {
            if !rate.is_finite() || rate <= 0.0 {
                log::debug!("Dropping unusable USD rate {} for {} on {}", rate, code, date);
                continue;
            }
            match Decimal::from_f64(rate) {
                Some(value) => table.insert(&code, value),
                None => log::debug!("USD rate {} for {} does not fit a decimal", rate, code),
            }
        }
        table
    }

    /// Inserts or replaces a rate. Non-positive rates are ignored.
    pub fn insert(&mut self, code: &str, rate: Decimal) {
        if rate <= Decimal::ZERO {
            return;
        }
        self.rates.insert(code.to_uppercase(), rate);
    }

    pub fn get(&self, code: &str) -> Option<Decimal> {
        self.rates.get(&code.to_uppercase()).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.rates.iter().map(|(code, rate)| (code.as_str(), *rate))
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Rate converting one unit of `source` into `destination`.
    ///
    /// 1 USD = x SRC and 1 USD = y DEST, so 1 SRC = y / x DEST.
    pub fn cross_rate(&self, source: &str, destination: &str) -> Result<Decimal, FxRateError> {
        let source_rate = self.require(source)?;
        let destination_rate = self.require(destination)?;

        destination_rate
            .checked_div(source_rate)
            .ok_or_else(|| FxRateError::CurrencyNotFound {
                currency: source.to_uppercase(),
                date: self.date,
            })
    }

    fn require(&self, code: &str) -> Result<Decimal, FxRateError> {
        self.get(code).ok_or_else(|| FxRateError::CurrencyNotFound {
            currency: code.to_uppercase(),
            date: self.date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 12, 1).unwrap()
    }

    fn payload(json: &str) -> UsdRatesPayload {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_payload_codes_are_upper_cased() {
        let rates = UsdRates::from_payload(
            date(),
            payload(r#"{"date": "2022-12-01", "usd": {"inr": 82.48, "usd": 1}}"#),
        );

        assert_eq!(rates.len(), 2);
        assert_eq!(rates.get("INR"), Some(dec!(82.48)));
        assert_eq!(rates.get("inr"), Some(dec!(82.48)));
        assert_eq!(rates.get("USD"), Some(dec!(1)));
    }

    #[test]
    fn test_payload_drops_non_positive_rates() {
        let rates = UsdRates::from_payload(
            date(),
            payload(r#"{"usd": {"eur": 0.94, "xxx": 0, "yyy": -3.5}}"#),
        );

        assert_eq!(rates.len(), 1);
        assert!(rates.get("XXX").is_none());
        assert!(rates.get("YYY").is_none());
    }

    #[test]
    fn test_cross_rate_from_usd() {
        let mut rates = UsdRates::new(date());
        rates.insert("usd", dec!(1));
        rates.insert("inr", dec!(82.48));

        assert_eq!(rates.cross_rate("USD", "INR").unwrap(), dec!(82.48));
    }

    #[test]
    fn test_cross_rate_between_non_usd_currencies() {
        let mut rates = UsdRates::new(date());
        rates.insert("EUR", dec!(0.8));
        rates.insert("INR", dec!(80));

        // 1 EUR = 80 / 0.8 INR
        assert_eq!(rates.cross_rate("EUR", "INR").unwrap(), dec!(100));
    }

    #[test]
    fn test_cross_rate_missing_currency() {
        let mut rates = UsdRates::new(date());
        rates.insert("USD", dec!(1));

        let err = rates.cross_rate("USD", "JPY").unwrap_err();
        assert!(matches!(
            err,
            FxRateError::CurrencyNotFound { ref currency, .. } if currency == "JPY"
        ));
    }

    #[test]
    fn test_insert_ignores_zero() {
        let mut rates = UsdRates::new(date());
        rates.insert("EUR", Decimal::ZERO);
        assert!(rates.is_empty());
    }
}
