use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::currency_errors::{CurrencyError, MissingRate};
use super::currency_model::{RateSource, ResolvedRate};

/// Billing month -> source currency -> resolved rate, or `None` while unresolved.
///
/// Entries only exist for currencies seen in the billing data. Stages fill them
/// in order; nothing here ever stores a non-positive rate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateTable {
    entries: BTreeMap<NaiveDate, BTreeMap<String, Option<ResolvedRate>>>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an unresolved entry. Existing entries are left alone.
    pub fn seed(&mut self, month: NaiveDate, currency: &str) {
        self.entries
            .entry(month)
            .or_default()
            .entry(currency.to_uppercase())
            .or_insert(None);
    }

    /// Resolves an entry that is still unresolved. Returns whether it was filled.
    pub fn fill(
        &mut self,
        month: NaiveDate,
        currency: &str,
        rate: Decimal,
        source: RateSource,
    ) -> bool {
        if rate <= Decimal::ZERO {
            return false;
        }
        match self.slot(month, currency) {
            Some(slot) if slot.is_none() => {
                *slot = Some(ResolvedRate { rate, source });
                true
            }
            _ => false,
        }
    }

    /// Overwrites an existing entry, resolved or not. Returns whether it was set.
    pub fn set(
        &mut self,
        month: NaiveDate,
        currency: &str,
        rate: Decimal,
        source: RateSource,
    ) -> bool {
        if rate <= Decimal::ZERO {
            return false;
        }
        match self.slot(month, currency) {
            Some(slot) => {
                *slot = Some(ResolvedRate { rate, source });
                true
            }
            None => false,
        }
    }

    fn slot(&mut self, month: NaiveDate, currency: &str) -> Option<&mut Option<ResolvedRate>> {
        self.entries
            .get_mut(&month)
            .and_then(|currencies| currencies.get_mut(&currency.to_uppercase()))
    }

    pub fn get(&self, month: NaiveDate, currency: &str) -> Option<ResolvedRate> {
        self.entries
            .get(&month)
            .and_then(|currencies| currencies.get(&currency.to_uppercase()))
            .copied()
            .flatten()
    }

    pub fn contains(&self, month: NaiveDate, currency: &str) -> bool {
        self.entries
            .get(&month)
            .is_some_and(|currencies| currencies.contains_key(&currency.to_uppercase()))
    }

    pub fn months(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.entries.keys().copied()
    }

    /// Currencies registered for `month`, resolved or not.
    pub fn currencies(&self, month: NaiveDate) -> impl Iterator<Item = &str> {
        self.entries
            .get(&month)
            .into_iter()
            .flat_map(|currencies| currencies.keys().map(String::as_str))
    }

    pub fn unresolved(&self) -> Vec<MissingRate> {
        self.entries
            .iter()
            .flat_map(|(month, currencies)| {
                currencies
                    .iter()
                    .filter(|(_, rate)| rate.is_none())
                    .map(move |(currency, _)| MissingRate {
                        month: *month,
                        source_currency: currency.clone(),
                    })
            })
            .collect()
    }

    pub fn unresolved_in(&self, month: NaiveDate) -> Vec<String> {
        self.entries
            .get(&month)
            .map(|currencies| {
                currencies
                    .iter()
                    .filter(|(_, rate)| rate.is_none())
                    .map(|(currency, _)| currency.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn unresolved_months(&self) -> Vec<NaiveDate> {
        self.entries
            .iter()
            .filter(|(_, currencies)| currencies.values().any(Option::is_none))
            .map(|(month, _)| *month)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(BTreeMap::is_empty)
    }

    /// Completeness gate run before any cost rewrite.
    pub fn verify(&self) -> Result<VerifiedRates, CurrencyError> {
        let missing = self.unresolved();
        if !missing.is_empty() {
            return Err(CurrencyError::MissingConversionFactors(missing));
        }

        let mut rates = BTreeMap::new();
        for (month, currencies) in &self.entries {
            for (currency, resolved) in currencies {
                if let Some(resolved) = resolved {
                    rates.insert((*month, currency.clone()), *resolved);
                }
            }
        }
        Ok(VerifiedRates { rates })
    }
}

/// A rate table in which every entry is resolved and strictly positive.
///
/// Only [`RateTable::verify`] produces one.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedRates {
    rates: BTreeMap<(NaiveDate, String), ResolvedRate>,
}

impl VerifiedRates {
    pub fn get(&self, month: NaiveDate, currency: &str) -> Option<ResolvedRate> {
        self.rates.get(&(month, currency.to_uppercase())).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, &str, ResolvedRate)> {
        self.rates
            .iter()
            .map(|((month, currency), rate)| (*month, currency.as_str(), *rate))
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// `{"2022-12-01": {"USD": 82.5}}` view, used in logs.
    pub fn by_month(&self) -> BTreeMap<NaiveDate, BTreeMap<String, Decimal>> {
        let mut view: BTreeMap<NaiveDate, BTreeMap<String, Decimal>> = BTreeMap::new();
        for ((month, currency), resolved) in &self.rates {
            view.entry(*month)
                .or_default()
                .insert(currency.clone(), resolved.rate);
        }
        view
    }
}
