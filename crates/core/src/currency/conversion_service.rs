use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::currency_errors::CurrencyError;
use super::currency_model::{
    ConversionRequest, ConversionSettings, ConversionSource, ConversionStatus, ConversionType,
    CostRewrite, CustomConversionFactor, DefaultConversionFactor, HistoricalUpdateTrigger,
    SourceCurrencyObservation,
};
use super::currency_traits::{
    BillingRepositoryTrait, ConversionFactorRepositoryTrait, CurrencyConversionServiceTrait,
    CurrencyPreferenceRepositoryTrait,
};
use super::rate_expression::RateExpression;
use super::resolver::{
    apply_api_rates, apply_backup_rates, apply_custom_factors, apply_embedded_rates,
    apply_user_overrides, ResolutionState, Stage, StageOutcome,
};
use crate::constants::{is_supported_currency, BASE_CURRENCY};
use crate::errors::Result;
use crate::utils::time_utils::{current_billing_month, first_of_month, last_of_month};
use ccm_fx_rates::UsdRateProvider;

/// Runs the conversion pipeline for one account at a time.
#[derive(Clone)]
pub struct CurrencyConversionService {
    preferences: Arc<dyn CurrencyPreferenceRepositoryTrait>,
    billing: Arc<dyn BillingRepositoryTrait>,
    default_factors: Arc<dyn ConversionFactorRepositoryTrait>,
    api_provider: Arc<dyn UsdRateProvider>,
    backup_provider: Arc<dyn UsdRateProvider>,
    settings: ConversionSettings,
}

impl CurrencyConversionService {
    pub fn new(
        preferences: Arc<dyn CurrencyPreferenceRepositoryTrait>,
        billing: Arc<dyn BillingRepositoryTrait>,
        default_factors: Arc<dyn ConversionFactorRepositoryTrait>,
        api_provider: Arc<dyn UsdRateProvider>,
        backup_provider: Arc<dyn UsdRateProvider>,
    ) -> Self {
        Self {
            preferences,
            billing,
            default_factors,
            api_provider,
            backup_provider,
            settings: ConversionSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ConversionSettings) -> Self {
        self.settings = settings;
        self
    }

    fn preferred_currency(&self, account_id: &str) -> Option<String> {
        match self.preferences.get_preferred_currency(account_id) {
            Ok(Some(currency)) if !currency.trim().is_empty() => {
                Some(currency.trim().to_uppercase())
            }
            Ok(_) => None,
            Err(e) => {
                log::warn!(
                    "Failed to read preferred currency for account {}: {}",
                    account_id,
                    e
                );
                None
            }
        }
    }

    fn discover_source_currencies(
        &self,
        request: &ConversionRequest,
    ) -> Vec<SourceCurrencyObservation> {
        let observations = match self.billing.get_source_currencies(
            &request.account_id,
            request.cloud_service_provider,
            &request.months,
        ) {
            Ok(observations) => observations,
            Err(e) => {
                log::error!(
                    "Failed to discover source currencies for account {}: {}",
                    request.account_id,
                    e
                );
                return Vec::new();
            }
        };

        observations
            .into_iter()
            .filter(|observation| request.months.contains(&first_of_month(observation.month)))
            .filter(|observation| !observation.source_currency.trim().is_empty())
            .map(|mut observation| {
                observation.month = first_of_month(observation.month);
                observation.source_currency = observation.source_currency.trim().to_uppercase();
                observation
            })
            .collect()
    }

    async fn resolve_rates(&self, request: &ConversionRequest, state: &mut ResolutionState) {
        let outcome = apply_embedded_rates(state);
        state.record(Stage::BillingExport, outcome);

        let outcome = apply_user_overrides(state, &request.user_input_fx_rates);
        state.record(Stage::UserOverride, outcome);

        let outcome = match request.months.last() {
            Some(last_month) => match self.preferences.get_custom_conversion_factors(
                &request.account_id,
                request.cloud_service_provider,
                &state.preferred_currency,
                last_of_month(*last_month),
            ) {
                Ok(factors) => apply_custom_factors(state, &factors),
                Err(e) => StageOutcome::FetchFailed {
                    reason: e.to_string(),
                },
            },
            None => StageOutcome::Skipped,
        };
        state.record(Stage::CustomFactor, outcome);

        let outcome = apply_api_rates(state, self.api_provider.as_ref()).await;
        state.record(Stage::Api, outcome);

        let outcome = apply_backup_rates(state, self.backup_provider.as_ref()).await;
        state.record(Stage::Backup, outcome);
    }

    async fn write_back_default_factors(
        &self,
        request: &ConversionRequest,
        state: &ResolutionState,
    ) {
        let rows = default_factor_rows(request, state, current_billing_month());
        if rows.is_empty() {
            return;
        }
        match self.default_factors.replace_default_factors(rows).await {
            Ok(written) => log::info!("Stored {} default conversion factor(s)", written),
            Err(e) => log::warn!("Failed to store default conversion factors: {}", e),
        }
    }

    async fn run(&self, request: ConversionRequest) -> Result<ConversionStatus> {
        let request = request.normalized()?;
        let run_id = Uuid::new_v4();
        log::info!(
            "[{}] Converting historical cost for account {} ({}) months {:?}",
            run_id,
            request.account_id,
            request.cloud_service_provider,
            request.months
        );

        let Some(preferred_currency) = self.preferred_currency(&request.account_id) else {
            log::info!(
                "[{}] No preferred currency for account {}",
                run_id,
                request.account_id
            );
            return Ok(ConversionStatus::NoPreferredCurrency);
        };

        let observations = self.discover_source_currencies(&request);
        if observations.is_empty() {
            log::info!("[{}] No billing rows in the requested months", run_id);
            return Ok(ConversionStatus::NoBillingData);
        }

        let mut state = ResolutionState::new(&preferred_currency, observations);
        self.resolve_rates(&request, &mut state).await;
        log::debug!("[{}] Stage outcomes: {:?}", run_id, state.outcomes);

        if self.settings.write_back_default_factors {
            self.write_back_default_factors(&request, &state).await;
        }

        let verified = match state.rate_table.verify() {
            Ok(verified) => verified,
            Err(CurrencyError::MissingConversionFactors(missing)) => {
                log::error!(
                    "[{}] Required conversion factors missing for account {}: {}",
                    run_id,
                    request.account_id,
                    missing
                        .iter()
                        .map(|m| m.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                return Ok(ConversionStatus::Incomplete(missing));
            }
            Err(e) => return Err(e.into()),
        };
        log::info!("[{}] Resolved rates: {:?}", run_id, verified.by_month());

        let rewrite = CostRewrite {
            account_id: request.account_id.clone(),
            provider: request.cloud_service_provider,
            months: request.months.clone(),
            preferred_currency: state.preferred_currency.clone(),
            expression: RateExpression::build(&state.observations, &verified)?,
        };

        let mut tables_updated = 0;
        let mut rows_updated = 0;
        let mut failed_tables = Vec::new();
        for table in self.billing.list_cost_tables(request.cloud_service_provider) {
            if let Err(e) = self.billing.ensure_currency_columns(&table).await {
                log::error!("[{}] Failed to prepare table {}: {}", run_id, table.name, e);
                failed_tables.push(table.name.clone());
                continue;
            }
            match self
                .billing
                .apply_conversion(&table, &rewrite, self.settings.rewrite_options)
                .await
            {
                Ok(rows) => {
                    log::info!("[{}] Converted {} row(s) in {}", run_id, rows, table.name);
                    tables_updated += 1;
                    rows_updated += rows;
                }
                Err(e) => {
                    log::error!("[{}] Failed to convert table {}: {}", run_id, table.name, e);
                    failed_tables.push(table.name.clone());
                }
            }
        }

        if !failed_tables.is_empty() {
            return Ok(ConversionStatus::PartiallyApplied { failed_tables });
        }

        if let Err(e) = self
            .preferences
            .clear_historical_update_flag(
                &request.account_id,
                request.cloud_service_provider,
                &request.months,
            )
            .await
        {
            log::warn!("[{}] Failed to clear historical update flags: {}", run_id, e);
        }

        Ok(ConversionStatus::Converted {
            tables_updated,
            rows_updated,
        })
    }
}

#[async_trait]
impl CurrencyConversionServiceTrait for CurrencyConversionService {
    async fn convert_historical_costs(&self, request: ConversionRequest) -> ConversionStatus {
        match self.run(request).await {
            Ok(status) => status,
            Err(e) => {
                log::error!("Failed to convert historical cost: {}", e);
                ConversionStatus::Failed(e.to_string())
            }
        }
    }

    async fn plan_historical_update(
        &self,
        trigger: &HistoricalUpdateTrigger,
    ) -> Result<Option<ConversionRequest>> {
        let excluded: Vec<NaiveDate> = if trigger.disable_historical_update_for_months.is_empty() {
            vec![current_billing_month()]
        } else {
            trigger
                .disable_historical_update_for_months
                .iter()
                .copied()
                .map(first_of_month)
                .collect()
        };

        let flagged = match self.preferences.get_historical_update_factors(
            &trigger.account_id,
            trigger.cloud_service_provider,
            &excluded,
        ) {
            Ok(flagged) => flagged,
            Err(e) => {
                log::warn!(
                    "Failed to fetch historical-update months for account {}: {}",
                    trigger.account_id,
                    e
                );
                Vec::new()
            }
        };

        // Disabled months keep receiving regular ingestion; drop their flags.
        if let Err(e) = self
            .preferences
            .clear_historical_update_flag(
                &trigger.account_id,
                trigger.cloud_service_provider,
                &excluded,
            )
            .await
        {
            log::warn!("Failed to clear historical update flags: {}", e);
            return Ok(None);
        }

        let months: BTreeSet<NaiveDate> = flagged.iter().map(|f| first_of_month(f.month)).collect();
        if months.is_empty() {
            return Ok(None);
        }

        let request = ConversionRequest {
            account_id: trigger.account_id.clone(),
            cloud_service_provider: trigger.cloud_service_provider,
            months: months.into_iter().collect(),
            user_input_fx_rates: overrides_from_factors(&flagged),
        };
        Ok(Some(request))
    }

    async fn trigger_historical_update(
        &self,
        trigger: HistoricalUpdateTrigger,
    ) -> ConversionStatus {
        match self.plan_historical_update(&trigger).await {
            Ok(Some(request)) => self.convert_historical_costs(request).await,
            Ok(None) => ConversionStatus::NoHistoricalUpdate,
            Err(e) => {
                log::error!("Failed to plan historical update: {}", e);
                ConversionStatus::Failed(e.to_string())
            }
        }
    }
}

/// CUSTOM factors of the flagged rows, latest per source currency.
fn overrides_from_factors(factors: &[CustomConversionFactor]) -> HashMap<String, Decimal> {
    let mut latest: HashMap<String, &CustomConversionFactor> = HashMap::new();
    for factor in factors
        .iter()
        .filter(|f| f.conversion_type == ConversionType::Custom)
    {
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
        .map(|(currency, factor)| (currency, factor.conversion_factor))
        .collect()
}

/// Rows for the shared default-factor table.
///
/// API rates are only stored for `current_month`, in both directions against
/// USD. Rates embedded in the billing export are stored per account, and so
/// is a 1.0 row for every source currency billed in `current_month`.
pub(crate) fn default_factor_rows(
    request: &ConversionRequest,
    state: &ResolutionState,
    current_month: NaiveDate,
) -> Vec<DefaultConversionFactor> {
    let mut rows = Vec::new();

    if let Some(rates) = state.api_rates.get(&current_month) {
        for (currency, rate) in rates.iter() {
            if currency == BASE_CURRENCY || !is_supported_currency(currency) {
                continue;
            }
            let Some(inverse) = Decimal::ONE.checked_div(rate) else {
                continue;
            };
            rows.push(DefaultConversionFactor {
                account_id: None,
                cloud_service_provider: None,
                source_currency: BASE_CURRENCY.to_string(),
                destination_currency: currency.to_string(),
                conversion_factor: rate,
                month: current_month,
                conversion_source: ConversionSource::Api,
            });
            rows.push(DefaultConversionFactor {
                account_id: None,
                cloud_service_provider: None,
                source_currency: currency.to_string(),
                destination_currency: BASE_CURRENCY.to_string(),
                conversion_factor: inverse,
                month: current_month,
                conversion_source: ConversionSource::Api,
            });
        }
    }

    let mut seen = BTreeSet::new();
    for observation in &state.observations {
        let Some(hint) = &observation.embedded_rate else {
            continue;
        };
        let key = (
            observation.month,
            observation.source_currency.clone(),
            hint.destination_currency.clone(),
        );
        if !seen.insert(key) {
            continue;
        }
        rows.push(DefaultConversionFactor {
            account_id: Some(request.account_id.clone()),
            cloud_service_provider: Some(request.cloud_service_provider),
            source_currency: observation.source_currency.clone(),
            destination_currency: hint.destination_currency.clone(),
            conversion_factor: hint.rate,
            month: observation.month,
            conversion_source: ConversionSource::BillingExport,
        });
    }

    let billed_now: BTreeSet<&str> = state
        .observations
        .iter()
        .filter(|observation| observation.month == current_month)
        .map(|observation| observation.source_currency.as_str())
        .collect();
    for currency in billed_now {
        rows.push(DefaultConversionFactor {
            account_id: Some(request.account_id.clone()),
            cloud_service_provider: Some(request.cloud_service_provider),
            source_currency: currency.to_string(),
            destination_currency: currency.to_string(),
            conversion_factor: Decimal::ONE,
            month: current_month,
            conversion_source: ConversionSource::BillingExportSrcCcy,
        });
    }

    rows
}
