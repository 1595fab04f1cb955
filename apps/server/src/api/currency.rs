use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    main_lib::AppState,
};
use ccm_core::currency::{
    CloudProvider, ConversionRequest, ConversionStatus, ConversionType, CurrencyError,
    CurrencyPreferenceRepositoryTrait, CustomConversionFactor, HistoricalUpdateTrigger,
};
use ccm_core::utils::time_utils::first_of_month;

/// Unreadable bodies get the same status line as any other failed run.
fn rejected(rejection: JsonRejection) -> String {
    let reason = rejection.body_text();
    tracing::warn!("Rejected conversion request: {}", reason);
    ConversionStatus::Failed(reason).message().to_string()
}

async fn convert_historical_costs(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ConversionRequest>, JsonRejection>,
) -> String {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => return rejected(rejection),
    };
    let account_id = request.account_id.clone();
    let status = state
        .conversion_service
        .convert_historical_costs(request)
        .await;
    tracing::info!(account_id = %account_id, success = status.is_success(), "Historical update finished");
    status.message().to_string()
}

async fn trigger_historical_update(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<HistoricalUpdateTrigger>, JsonRejection>,
) -> String {
    let Json(trigger) = match payload {
        Ok(trigger) => trigger,
        Err(rejection) => return rejected(rejection),
    };
    let account_id = trigger.account_id.clone();
    let status = state
        .conversion_service
        .trigger_historical_update(trigger)
        .await;
    tracing::info!(account_id = %account_id, success = status.is_success(), "Triggered update finished");
    status.message().to_string()
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreferredCurrency {
    destination_currency: Option<String>,
}

fn validate_currency_code(code: &str) -> ApiResult<String> {
    let code = code.trim().to_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ApiError::BadRequest(format!(
            "'{}' is not an ISO currency code",
            code
        )));
    }
    Ok(code)
}

async fn get_preferred_currency(
    Path(account_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<PreferredCurrency>> {
    let destination_currency = state
        .preference_repository
        .get_preferred_currency(&account_id)?;
    Ok(Json(PreferredCurrency {
        destination_currency,
    }))
}

async fn set_preferred_currency(
    Path(account_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<PreferredCurrency>,
) -> ApiResult<StatusCode> {
    let currency = body
        .destination_currency
        .as_deref()
        .map(validate_currency_code)
        .transpose()?;
    state
        .preference_repository
        .set_preferred_currency(&account_id, currency.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewConversionFactor {
    account_id: String,
    cloud_service_provider: CloudProvider,
    source_currency: String,
    destination_currency: String,
    conversion_factor: Decimal,
    month: NaiveDate,
    #[serde(default = "default_conversion_type")]
    conversion_type: ConversionType,
    #[serde(default)]
    is_historical_update_required: bool,
}

fn default_conversion_type() -> ConversionType {
    ConversionType::Custom
}

async fn add_conversion_factor(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewConversionFactor>,
) -> ApiResult<StatusCode> {
    if body.conversion_factor <= Decimal::ZERO {
        return Err(ApiError::Core(
            CurrencyError::InvalidRate {
                currency: body.source_currency,
                rate: body.conversion_factor.to_string(),
            }
            .into(),
        ));
    }

    let factor = CustomConversionFactor {
        account_id: body.account_id,
        cloud_service_provider: body.cloud_service_provider,
        source_currency: validate_currency_code(&body.source_currency)?,
        destination_currency: validate_currency_code(&body.destination_currency)?,
        conversion_factor: body.conversion_factor,
        month: first_of_month(body.month),
        conversion_type: body.conversion_type,
        is_historical_update_required: body.is_historical_update_required,
        updated_at: Utc::now().naive_utc(),
    };
    state.preference_repository.save_custom_factor(&factor).await?;
    Ok(StatusCode::CREATED)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/currency/historical-update",
            post(convert_historical_costs),
        )
        .route("/currency/trigger", post(trigger_historical_update))
        .route(
            "/currency/preferences/{account_id}",
            get(get_preferred_currency).put(set_preferred_currency),
        )
        .route("/currency/factors", post(add_conversion_factor))
}
