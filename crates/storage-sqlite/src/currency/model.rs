//! Database models for currency configuration and billing discovery.

use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use diesel::sql_types::{Double, Nullable, Text};
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

use ccm_core::currency::{
    CloudProvider, ConversionType, CustomConversionFactor, DefaultConversionFactor, EmbeddedRate,
    SourceCurrencyObservation,
};
use ccm_core::constants::BASE_CURRENCY;
use ccm_core::errors::{Error, Result, ValidationError};

pub(crate) const MONTH_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::currency_preferences)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CurrencyPreferenceDB {
    pub account_id: String,
    pub destination_currency: Option<String>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::currency_conversion_factor_user_input)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CustomConversionFactorDB {
    pub id: String,
    pub account_id: String,
    pub cloud_service_provider: String,
    pub source_currency: String,
    pub destination_currency: String,
    pub conversion_factor: String,
    pub month: String,
    pub conversion_type: String,
    pub is_historical_update_required: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TryFrom<CustomConversionFactorDB> for CustomConversionFactor {
    type Error = Error;

    fn try_from(db: CustomConversionFactorDB) -> Result<Self> {
        Ok(Self {
            account_id: db.account_id,
            cloud_service_provider: CloudProvider::from_str(&db.cloud_service_provider)?,
            source_currency: db.source_currency.to_uppercase(),
            destination_currency: db.destination_currency.to_uppercase(),
            conversion_factor: Decimal::from_str(&db.conversion_factor)?,
            month: NaiveDate::parse_from_str(&db.month, MONTH_FORMAT)?,
            conversion_type: ConversionType::from_db(&db.conversion_type),
            is_historical_update_required: db.is_historical_update_required,
            updated_at: db.updated_at,
        })
    }
}

impl CustomConversionFactorDB {
    pub fn from_domain(factor: &CustomConversionFactor) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: factor.account_id.clone(),
            cloud_service_provider: factor.cloud_service_provider.as_str().to_string(),
            source_currency: factor.source_currency.to_uppercase(),
            destination_currency: factor.destination_currency.to_uppercase(),
            conversion_factor: factor.conversion_factor.to_string(),
            month: factor.month.format(MONTH_FORMAT).to_string(),
            conversion_type: factor.conversion_type.as_str().to_string(),
            is_historical_update_required: factor.is_historical_update_required,
            created_at: factor.updated_at,
            updated_at: factor.updated_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::currency_conversion_factor_default)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DefaultConversionFactorDB {
    pub id: String,
    pub account_id: Option<String>,
    pub cloud_service_provider: Option<String>,
    pub source_currency: String,
    pub destination_currency: String,
    pub conversion_factor: String,
    pub month: String,
    pub conversion_source: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl DefaultConversionFactorDB {
    pub fn from_domain(factor: &DefaultConversionFactor, now: NaiveDateTime) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: factor.account_id.clone(),
            cloud_service_provider: factor
                .cloud_service_provider
                .map(|provider| provider.as_str().to_string()),
            source_currency: factor.source_currency.to_uppercase(),
            destination_currency: factor.destination_currency.to_uppercase(),
            conversion_factor: factor.conversion_factor.to_string(),
            month: factor.month.format(MONTH_FORMAT).to_string(),
            conversion_source: factor.conversion_source.as_str().to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One row of the source-currency discovery query.
#[derive(Debug, Clone, QueryableByName)]
pub struct SourceCurrencyRow {
    #[diesel(sql_type = Text)]
    pub billing_key: String,
    #[diesel(sql_type = Text)]
    pub billing_month: String,
    #[diesel(sql_type = Text)]
    pub currency: String,
    #[diesel(sql_type = Nullable<Double>)]
    pub reported_rate: Option<f64>,
    #[diesel(sql_type = Nullable<Text>)]
    pub pricing_currency: Option<String>,
}

impl TryFrom<SourceCurrencyRow> for SourceCurrencyObservation {
    type Error = Error;

    fn try_from(row: SourceCurrencyRow) -> Result<Self> {
        let month = NaiveDate::parse_from_str(&row.billing_month, MONTH_FORMAT)?;
        let embedded_rate = row
            .reported_rate
            .and_then(Decimal::from_f64)
            .and_then(|rate| {
                let pricing = row.pricing_currency.as_deref().unwrap_or(BASE_CURRENCY);
                EmbeddedRate::from_reported(pricing, rate)
            });

        if row.currency.trim().is_empty() {
            return Err(Error::Validation(ValidationError::MissingField(
                "currency".to_string(),
            )));
        }

        Ok(Self {
            billing_key: row.billing_key,
            month,
            source_currency: row.currency.trim().to_uppercase(),
            embedded_rate,
        })
    }
}

#[derive(Debug, QueryableByName)]
pub struct ColumnName {
    #[diesel(sql_type = Text)]
    pub name: String,
}
