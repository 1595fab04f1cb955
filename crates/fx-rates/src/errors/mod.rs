//! Error types for rate providers.
//!
//! [`FxRateError::should_use_backup`] separates outright fetch failures, after
//! which the pinned backup snapshot takes over, from answers that arrived but
//! lack the requested data.

use chrono::NaiveDate;
use thiserror::Error;

/// Errors that can occur while fetching or reading exchange rates.
#[derive(Error, Debug)]
pub enum FxRateError {
    /// The HTTP request itself failed (DNS, connect, timeout, TLS).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("Provider error: {provider} - {message}")]
    ProviderError {
        /// The provider that returned the error
        provider: String,
        /// Status or message returned by the provider
        message: String,
    },

    /// The payload could not be parsed into a USD rate table.
    #[error("Malformed response from {provider}: {message}")]
    MalformedResponse {
        /// The provider whose payload was rejected
        provider: String,
        /// Parser message
        message: String,
    },

    /// A currency needed for a cross rate is not present in the table.
    #[error("Currency {currency} not found in rates for {date}")]
    CurrencyNotFound {
        /// Upper-case ISO code
        currency: String,
        /// Date of the rate table
        date: NaiveDate,
    },

    /// The backup table holds no snapshot on or before the requested month.
    #[error("No backup rates on or before {0}")]
    NoSnapshot(NaiveDate),
}

impl FxRateError {
    /// Whether the failure means the API call failed outright.
    ///
    /// Only these failures hand the month over to the backup snapshot. A
    /// missing currency in an otherwise valid answer does not.
    pub fn should_use_backup(&self) -> bool {
        match self {
            Self::Network(_) | Self::ProviderError { .. } | Self::MalformedResponse { .. } => {
                true
            }
            Self::CurrencyNotFound { .. } | Self::NoSnapshot(_) => false,
        }
    }
}
