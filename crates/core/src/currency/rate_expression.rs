use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::currency_errors::CurrencyError;
use super::currency_model::SourceCurrencyObservation;
use super::rate_table::VerifiedRates;
use crate::constants::FALLBACK_RATE;

/// One branch of the piecewise rate: rows of `billing_key` in `month` are
/// multiplied by `rate`.
#[derive(Debug, Clone, PartialEq)]
pub struct RateArm {
    pub billing_key: String,
    pub month: NaiveDate,
    pub source_currency: String,
    pub rate: Decimal,
}

/// Piecewise `(billing key, month) -> rate` function.
///
/// Storage renders it as a parameterised `CASE` expression; the same arms are
/// used for in-memory lookups. Rows without an arm keep their value
/// (rate [`FALLBACK_RATE`]).
#[derive(Debug, Clone, PartialEq)]
pub struct RateExpression {
    arms: BTreeMap<(String, NaiveDate), RateArm>,
}

impl RateExpression {
    pub fn build(
        observations: &[SourceCurrencyObservation],
        rates: &VerifiedRates,
    ) -> Result<Self, CurrencyError> {
        let mut arms: BTreeMap<(String, NaiveDate), RateArm> = BTreeMap::new();

        for observation in observations {
            let resolved = rates
                .get(observation.month, &observation.source_currency)
                .ok_or_else(|| CurrencyError::UnmatchedObservation {
                    billing_key: observation.billing_key.clone(),
                    month: observation.month,
                })?;

            let currency = observation.source_currency.to_uppercase();
            let key = (observation.billing_key.clone(), observation.month);
            // Mixed currencies under one key: the greatest code wins.
            if let Some(existing) = arms.get(&key) {
                if existing.source_currency == currency {
                    continue;
                }
                let kept = existing.source_currency.clone().max(currency.clone());
                log::warn!(
                    "Billing key {} reports both {} and {} in {}. Keeping {}",
                    observation.billing_key,
                    existing.source_currency,
                    currency,
                    observation.month,
                    kept
                );
                if kept == existing.source_currency {
                    continue;
                }
            }

            arms.insert(
                key,
                RateArm {
                    billing_key: observation.billing_key.clone(),
                    month: observation.month,
                    source_currency: currency,
                    rate: resolved.rate,
                },
            );
        }

        Ok(Self { arms })
    }

    pub fn rate_for(&self, billing_key: &str, month: NaiveDate) -> Decimal {
        self.arms
            .get(&(billing_key.to_string(), month))
            .map(|arm| arm.rate)
            .unwrap_or(FALLBACK_RATE)
    }

    pub fn arms(&self) -> impl Iterator<Item = &RateArm> {
        self.arms.values()
    }

    pub fn len(&self) -> usize {
        self.arms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    pub fn default_rate(&self) -> Decimal {
        FALLBACK_RATE
    }
}
