//! Rate resolution waterfall.
//!
//! Stages run in a fixed order over one [`ResolutionState`]:
//!
//! 1. rate embedded in the billing export (fills unresolved entries)
//! 2. user override for this invocation (overwrites)
//! 3. persisted CUSTOM factors (fills unresolved entries)
//! 4. currency API, per month that still has gaps (fills unresolved entries)
//! 5. pinned backup table, only for months whose API call failed outright
//!
//! A stage never aborts the pipeline. It reports a [`StageOutcome`] and the
//! completeness gate decides afterwards.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::currency_model::{
    ConversionType, CustomConversionFactor, RateSource, SourceCurrencyObservation,
};
use super::rate_table::RateTable;
use crate::constants::is_supported_currency;
use crate::utils::time_utils::last_of_month;
use ccm_fx_rates::{UsdRateProvider, UsdRates};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    BillingExport,
    UserOverride,
    CustomFactor,
    Api,
    Backup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::BillingExport => "billing-export",
            Stage::UserOverride => "user-override",
            Stage::CustomFactor => "custom-factor",
            Stage::Api => "api",
            Stage::Backup => "backup",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Applied { filled: usize },
    Skipped,
    FetchFailed { reason: String },
}

/// Mutable state threaded through the stages of one invocation.
#[derive(Debug, Clone)]
pub struct ResolutionState {
    pub preferred_currency: String,
    pub observations: Vec<SourceCurrencyObservation>,
    pub rate_table: RateTable,
    pub outcomes: Vec<(Stage, StageOutcome)>,
    /// USD tables the API returned, by month.
    pub api_rates: BTreeMap<NaiveDate, UsdRates>,
    /// Months whose API call failed in a way the backup table may cover.
    pub api_failed_months: Vec<NaiveDate>,
}

impl ResolutionState {
    /// Seeds one unresolved entry per observed (month, currency).
    pub fn new(preferred_currency: &str, observations: Vec<SourceCurrencyObservation>) -> Self {
        let mut rate_table = RateTable::new();
        for observation in &observations {
            rate_table.seed(observation.month, &observation.source_currency);
        }
        Self {
            preferred_currency: preferred_currency.to_uppercase(),
            observations,
            rate_table,
            outcomes: Vec::new(),
            api_rates: BTreeMap::new(),
            api_failed_months: Vec::new(),
        }
    }

    pub fn record(&mut self, stage: Stage, outcome: StageOutcome) {
        match &outcome {
            StageOutcome::Applied { filled } => {
                log::info!("Stage {} resolved {} rate(s)", stage, filled)
            }
            StageOutcome::Skipped => log::debug!("Stage {} skipped", stage),
            StageOutcome::FetchFailed { reason } => {
                log::warn!("Stage {} failed: {}", stage, reason)
            }
        }
        self.outcomes.push((stage, outcome));
    }
}

pub fn apply_embedded_rates(state: &mut ResolutionState) -> StageOutcome {
    let mut filled = 0;
    let mut seen_hint = false;

    for observation in &state.observations {
        let Some(hint) = &observation.embedded_rate else {
            continue;
        };
        seen_hint = true;
        if hint.destination_currency != state.preferred_currency {
            continue;
        }
        if state.rate_table.fill(
            observation.month,
            &observation.source_currency,
            hint.rate,
            RateSource::BillingExport,
        ) {
            filled += 1;
        }
    }

    if seen_hint {
        StageOutcome::Applied { filled }
    } else {
        StageOutcome::Skipped
    }
}

/// Overrides apply to every requested month, but only to currencies that were
/// discovered. They replace whatever earlier stages found.
pub fn apply_user_overrides(
    state: &mut ResolutionState,
    overrides: &HashMap<String, Decimal>,
) -> StageOutcome {
    if overrides.is_empty() {
        return StageOutcome::Skipped;
    }

    let months: Vec<NaiveDate> = state.rate_table.months().collect();
    let mut filled = 0;
    for (currency, rate) in overrides {
        if *rate <= Decimal::ZERO {
            log::warn!("Rejecting non-positive override {} for {}", rate, currency);
            continue;
        }
        for month in &months {
            if state
                .rate_table
                .set(*month, currency, *rate, RateSource::UserOverride)
            {
                filled += 1;
            }
        }
    }
    StageOutcome::Applied { filled }
}

/// Latest factor per source currency among rows dated on or before `month_end`.
///
/// The latest row decides: if it is not CUSTOM the currency falls through to
/// the default sources, even when an older CUSTOM row exists.
pub fn latest_custom_factors(
    factors: &[CustomConversionFactor],
    destination_currency: &str,
    month_end: NaiveDate,
) -> HashMap<String, Decimal> {
    let mut latest: HashMap<String, &CustomConversionFactor> = HashMap::new();
    for factor in factors {
        if factor.month > month_end
            || !factor
                .destination_currency
                .eq_ignore_ascii_case(destination_currency)
        {
            continue;
        }
        let key = factor.source_currency.to_uppercase();
        match latest.get(&key) {
            Some(current) if current.updated_at >= factor.updated_at => {}
            _ => {
                latest.insert(key, factor);
            }
        }
    }

    latest
        .into_iter()
        .filter(|(_, factor)| {
            factor.conversion_type == ConversionType::Custom
                && factor.conversion_factor > Decimal::ZERO
        })
        .map(|(currency, factor)| (currency, factor.conversion_factor))
        .collect()
}

pub fn apply_custom_factors(
    state: &mut ResolutionState,
    factors: &[CustomConversionFactor],
) -> StageOutcome {
    if factors.is_empty() {
        return StageOutcome::Skipped;
    }

    let mut filled = 0;
    for month in state.rate_table.unresolved_months() {
        let month_factors =
            latest_custom_factors(factors, &state.preferred_currency, last_of_month(month));
        for (currency, rate) in month_factors {
            if state
                .rate_table
                .fill(month, &currency, rate, RateSource::CustomFactor)
            {
                filled += 1;
            }
        }
    }
    StageOutcome::Applied { filled }
}

/// Fills unresolved entries of `month` from a USD table. Returns entries filled.
fn fill_from_usd_rates(
    table: &mut RateTable,
    preferred_currency: &str,
    month: NaiveDate,
    rates: &UsdRates,
    source: RateSource,
) -> usize {
    if !is_supported_currency(preferred_currency) {
        log::warn!(
            "Preferred currency {} is not in the supported list; {} rates unused",
            preferred_currency,
            source.as_str()
        );
        return 0;
    }

    let mut filled = 0;
    for currency in table.unresolved_in(month) {
        if !is_supported_currency(&currency) {
            log::debug!("Ignoring unsupported currency {} for {}", currency, month);
            continue;
        }
        match rates.cross_rate(&currency, preferred_currency) {
            Ok(rate) => {
                if table.fill(month, &currency, rate, source) {
                    filled += 1;
                }
            }
            Err(e) => log::warn!(
                "No {} rate for {} in {}: {}",
                source.as_str(),
                currency,
                month,
                e
            ),
        }
    }
    filled
}

pub async fn apply_api_rates(
    state: &mut ResolutionState,
    provider: &dyn UsdRateProvider,
) -> StageOutcome {
    let months = state.rate_table.unresolved_months();
    if months.is_empty() {
        return StageOutcome::Skipped;
    }

    let mut filled = 0;
    let mut failures = Vec::new();
    for month in &months {
        match provider.get_usd_rates(*month).await {
            Ok(rates) => {
                filled += fill_from_usd_rates(
                    &mut state.rate_table,
                    &state.preferred_currency,
                    *month,
                    &rates,
                    RateSource::Api,
                );
                state.api_rates.insert(*month, rates);
            }
            Err(e) => {
                log::warn!("{} rates for {} unavailable: {}", provider.id(), month, e);
                if e.should_use_backup() {
                    state.api_failed_months.push(*month);
                }
                failures.push(format!("{}: {}", month, e));
            }
        }
    }

    if failures.len() == months.len() {
        StageOutcome::FetchFailed {
            reason: failures.join("; "),
        }
    } else {
        StageOutcome::Applied { filled }
    }
}

pub async fn apply_backup_rates(
    state: &mut ResolutionState,
    backup: &dyn UsdRateProvider,
) -> StageOutcome {
    let months: Vec<NaiveDate> = state
        .api_failed_months
        .iter()
        .copied()
        .filter(|month| !state.rate_table.unresolved_in(*month).is_empty())
        .collect();
    if months.is_empty() {
        return StageOutcome::Skipped;
    }

    let mut filled = 0;
    let mut failures = Vec::new();
    for month in &months {
        match backup.get_usd_rates(*month).await {
            Ok(rates) => {
                filled += fill_from_usd_rates(
                    &mut state.rate_table,
                    &state.preferred_currency,
                    *month,
                    &rates,
                    RateSource::Backup,
                );
            }
            Err(e) => failures.push(format!("{}: {}", month, e)),
        }
    }

    if failures.len() == months.len() {
        StageOutcome::FetchFailed {
            reason: failures.join("; "),
        }
    } else {
        StageOutcome::Applied { filled }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::currency_model::{CloudProvider, EmbeddedRate};
    use async_trait::async_trait;
    use ccm_fx_rates::FxRateError;
    use rust_decimal_macros::dec;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn observation(month: NaiveDate, currency: &str) -> SourceCurrencyObservation {
        SourceCurrencyObservation {
            billing_key: "billing-1".to_string(),
            month,
            source_currency: currency.to_string(),
            embedded_rate: None,
        }
    }

    fn factor(
        source: &str,
        rate: Decimal,
        month: NaiveDate,
        conversion_type: ConversionType,
        updated_day: u32,
    ) -> CustomConversionFactor {
        CustomConversionFactor {
            account_id: "acc".to_string(),
            cloud_service_provider: CloudProvider::Gcp,
            source_currency: source.to_string(),
            destination_currency: "INR".to_string(),
            conversion_factor: rate,
            month,
            conversion_type,
            is_historical_update_required: false,
            updated_at: ymd(2023, 1, updated_day).and_hms_opt(0, 0, 0).unwrap(),
        }
    }

    struct FixedProvider(Result<UsdRates, FxRateError>);

    #[async_trait]
    impl UsdRateProvider for FixedProvider {
        fn id(&self) -> &'static str {
            "FIXED"
        }

        async fn get_usd_rates(&self, _month: NaiveDate) -> Result<UsdRates, FxRateError> {
            match &self.0 {
                Ok(rates) => Ok(rates.clone()),
                Err(_) => Err(FxRateError::ProviderError {
                    provider: "FIXED".to_string(),
                    message: "HTTP 503".to_string(),
                }),
            }
        }
    }

    #[test]
    fn test_embedded_rate_needs_matching_destination() {
        let mut usd = observation(ymd(2022, 12, 1), "USD");
        usd.embedded_rate = EmbeddedRate::from_reported("INR", dec!(0.0125));
        let mut eur = observation(ymd(2022, 12, 1), "EUR");
        eur.embedded_rate = EmbeddedRate::from_reported("GBP", dec!(1.2));

        let mut state = ResolutionState::new("INR", vec![usd, eur]);
        let outcome = apply_embedded_rates(&mut state);

        assert_eq!(outcome, StageOutcome::Applied { filled: 1 });
        assert_eq!(state.rate_table.get(ymd(2022, 12, 1), "USD").unwrap().rate, dec!(80));
        assert!(state.rate_table.get(ymd(2022, 12, 1), "EUR").is_none());
    }

    #[test]
    fn test_override_only_touches_discovered_currencies() {
        let mut state = ResolutionState::new("INR", vec![observation(ymd(2022, 12, 1), "USD")]);
        let overrides = HashMap::from([
            ("USD".to_string(), dec!(82.5)),
            ("EUR".to_string(), dec!(90)),
        ]);

        let outcome = apply_user_overrides(&mut state, &overrides);

        assert_eq!(outcome, StageOutcome::Applied { filled: 1 });
        assert!(!state.rate_table.contains(ymd(2022, 12, 1), "EUR"));
    }

    #[test]
    fn test_latest_factor_decides_even_when_default() {
        let month = ymd(2022, 12, 1);
        let factors = vec![
            factor("USD", dec!(80), month, ConversionType::Custom, 1),
            factor("USD", dec!(81), month, ConversionType::Default, 5),
            factor("EUR", dec!(85), ymd(2022, 10, 1), ConversionType::Custom, 2),
            factor("GBP", dec!(99), ymd(2023, 1, 1), ConversionType::Custom, 3),
        ];

        let latest = latest_custom_factors(&factors, "INR", last_of_month(month));

        assert!(!latest.contains_key("USD"));
        assert_eq!(latest.get("EUR"), Some(&dec!(85)));
        assert!(!latest.contains_key("GBP"));
    }

    #[test]
    fn test_custom_factors_fill_gaps_only() {
        let month = ymd(2022, 12, 1);
        let mut state = ResolutionState::new(
            "INR",
            vec![observation(month, "USD"), observation(month, "EUR")],
        );
        state.rate_table.set(month, "USD", dec!(82.5), RateSource::UserOverride);

        let factors = vec![
            factor("USD", dec!(80), month, ConversionType::Custom, 1),
            factor("EUR", dec!(88), month, ConversionType::Custom, 1),
        ];
        let outcome = apply_custom_factors(&mut state, &factors);

        assert_eq!(outcome, StageOutcome::Applied { filled: 1 });
        assert_eq!(state.rate_table.get(month, "USD").unwrap().rate, dec!(82.5));
        assert_eq!(state.rate_table.get(month, "EUR").unwrap().source, RateSource::CustomFactor);
    }

    #[tokio::test]
    async fn test_api_rates_cross_through_usd() {
        let month = ymd(2022, 12, 1);
        let mut rates = UsdRates::new(month);
        rates.insert("INR", dec!(82.48));
        rates.insert("USD", dec!(1));
        rates.insert("EUR", dec!(0.96));

        let mut state = ResolutionState::new(
            "INR",
            vec![observation(month, "USD"), observation(month, "EUR")],
        );
        let outcome = apply_api_rates(&mut state, &FixedProvider(Ok(rates))).await;

        assert_eq!(outcome, StageOutcome::Applied { filled: 2 });
        assert_eq!(state.rate_table.get(month, "USD").unwrap().rate, dec!(82.48));
        assert_eq!(
            state.rate_table.get(month, "EUR").unwrap().rate,
            dec!(82.48) / dec!(0.96)
        );
        assert!(state.api_rates.contains_key(&month));
    }

    #[tokio::test]
    async fn test_backup_only_for_failed_months() {
        let month = ymd(2022, 11, 1);
        let mut state = ResolutionState::new("INR", vec![observation(month, "USD")]);

        let failing = FixedProvider(Err(FxRateError::NoSnapshot(month)));
        let outcome = apply_api_rates(&mut state, &failing).await;
        assert!(matches!(outcome, StageOutcome::FetchFailed { .. }));
        assert_eq!(state.api_failed_months, vec![month]);

        let mut backup_rates = UsdRates::new(month);
        backup_rates.insert("INR", dec!(81.79));
        backup_rates.insert("USD", dec!(1));
        let outcome = apply_backup_rates(&mut state, &FixedProvider(Ok(backup_rates))).await;

        assert_eq!(outcome, StageOutcome::Applied { filled: 1 });
        let resolved = state.rate_table.get(month, "USD").unwrap();
        assert_eq!(resolved.rate, dec!(81.79));
        assert_eq!(resolved.source, RateSource::Backup);
    }

    #[tokio::test]
    async fn test_backup_skipped_when_api_answered() {
        let month = ymd(2022, 11, 1);
        let mut state = ResolutionState::new("INR", vec![observation(month, "XYZ")]);
        let mut rates = UsdRates::new(month);
        rates.insert("INR", dec!(81.79));

        apply_api_rates(&mut state, &FixedProvider(Ok(rates.clone()))).await;
        let outcome = apply_backup_rates(&mut state, &FixedProvider(Ok(rates))).await;

        assert_eq!(outcome, StageOutcome::Skipped);
        assert_eq!(state.rate_table.unresolved().len(), 1);
    }
}
