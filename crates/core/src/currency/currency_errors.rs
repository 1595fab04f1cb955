use chrono::NaiveDate;
use thiserror::Error;

/// A (month, currency) pair the waterfall could not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingRate {
    pub month: NaiveDate,
    pub source_currency: String,
}

impl std::fmt::Display for MissingRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.month, self.source_currency)
    }
}

#[derive(Error, Debug)]
pub enum CurrencyError {
    #[error("Invalid conversion request: {0}")]
    InvalidRequest(String),

    #[error("Invalid rate {rate} for {currency}")]
    InvalidRate { currency: String, rate: String },

    #[error("Required conversion factors missing for {}", format_missing(.0))]
    MissingConversionFactors(Vec<MissingRate>),

    #[error("No rate for billing key {billing_key} in {month}")]
    UnmatchedObservation {
        billing_key: String,
        month: NaiveDate,
    },
}

fn format_missing(missing: &[MissingRate]) -> String {
    missing
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
