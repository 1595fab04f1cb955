use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use log::warn;
use std::sync::Arc;

use super::model::{CurrencyPreferenceDB, CustomConversionFactorDB, MONTH_FORMAT};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{currency_conversion_factor_user_input, currency_preferences};
use ccm_core::currency::{CloudProvider, CurrencyPreferenceRepositoryTrait, CustomConversionFactor};
use ccm_core::errors::Result;

pub struct CurrencyPreferenceRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl CurrencyPreferenceRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        CurrencyPreferenceRepository { pool, writer }
    }

    /// Sets or clears the account's destination currency.
    pub async fn set_preferred_currency(
        &self,
        account_id: &str,
        currency: Option<&str>,
    ) -> Result<()> {
        let row = CurrencyPreferenceDB {
            account_id: account_id.to_string(),
            destination_currency: currency.map(|c| c.trim().to_uppercase()),
            updated_at: Utc::now().naive_utc(),
        };

        self.writer
            .exec(move |conn| {
                diesel::replace_into(currency_preferences::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    pub async fn save_custom_factor(&self, factor: &CustomConversionFactor) -> Result<()> {
        let row = CustomConversionFactorDB::from_domain(factor);
        self.writer
            .exec(move |conn| {
                diesel::insert_into(currency_conversion_factor_user_input::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    fn into_domain(rows: Vec<CustomConversionFactorDB>) -> Vec<CustomConversionFactor> {
        rows.into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                match CustomConversionFactor::try_from(row) {
                    Ok(factor) => Some(factor),
                    Err(e) => {
                        warn!("Skipping unreadable conversion factor {}: {}", id, e);
                        None
                    }
                }
            })
            .collect()
    }
}

fn month_strings(months: &[NaiveDate]) -> Vec<String> {
    months
        .iter()
        .map(|month| month.format(MONTH_FORMAT).to_string())
        .collect()
}

#[async_trait]
impl CurrencyPreferenceRepositoryTrait for CurrencyPreferenceRepository {
    fn get_preferred_currency(&self, account_id: &str) -> Result<Option<String>> {
        use crate::schema::currency_preferences::dsl;

        let mut conn = get_connection(&self.pool)?;
        let currency = dsl::currency_preferences
            .find(account_id)
            .select(dsl::destination_currency)
            .first::<Option<String>>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;

        Ok(currency
            .flatten()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty()))
    }

    fn get_custom_conversion_factors(
        &self,
        account_id: &str,
        provider: CloudProvider,
        destination_currency: &str,
        up_to: NaiveDate,
    ) -> Result<Vec<CustomConversionFactor>> {
        use crate::schema::currency_conversion_factor_user_input::dsl;

        let mut conn = get_connection(&self.pool)?;
        let rows = dsl::currency_conversion_factor_user_input
            .filter(dsl::account_id.eq(account_id))
            .filter(dsl::cloud_service_provider.eq(provider.as_str()))
            .filter(dsl::destination_currency.eq(destination_currency.to_uppercase()))
            .filter(dsl::month.le(up_to.format(MONTH_FORMAT).to_string()))
            .order((dsl::month.asc(), dsl::updated_at.asc()))
            .select(CustomConversionFactorDB::as_select())
            .load::<CustomConversionFactorDB>(&mut conn)
            .map_err(StorageError::from)?;

        Ok(Self::into_domain(rows))
    }

    fn get_historical_update_factors(
        &self,
        account_id: &str,
        provider: CloudProvider,
        excluded_months: &[NaiveDate],
    ) -> Result<Vec<CustomConversionFactor>> {
        use crate::schema::currency_conversion_factor_user_input::dsl;

        let mut conn = get_connection(&self.pool)?;
        let rows = dsl::currency_conversion_factor_user_input
            .filter(dsl::account_id.eq(account_id))
            .filter(dsl::cloud_service_provider.eq(provider.as_str()))
            .filter(dsl::is_historical_update_required.eq(true))
            .filter(dsl::month.ne_all(month_strings(excluded_months)))
            .order(dsl::month.asc())
            .select(CustomConversionFactorDB::as_select())
            .load::<CustomConversionFactorDB>(&mut conn)
            .map_err(StorageError::from)?;

        Ok(Self::into_domain(rows))
    }

    async fn clear_historical_update_flag(
        &self,
        account_id: &str,
        provider: CloudProvider,
        months: &[NaiveDate],
    ) -> Result<usize> {
        use crate::schema::currency_conversion_factor_user_input::dsl;

        if months.is_empty() {
            return Ok(0);
        }

        let account = account_id.to_string();
        let months = month_strings(months);
        let now = Utc::now().naive_utc();

        self.writer
            .exec(move |conn| {
                let updated = diesel::update(
                    dsl::currency_conversion_factor_user_input
                        .filter(dsl::account_id.eq(account))
                        .filter(dsl::cloud_service_provider.eq(provider.as_str()))
                        .filter(dsl::is_historical_update_required.eq(true))
                        .filter(dsl::month.eq_any(months)),
                )
                .set((
                    dsl::is_historical_update_required.eq(false),
                    dsl::updated_at.eq(now),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;
                Ok(updated)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, init, run_migrations, spawn_writer};
    use ccm_core::currency::ConversionType;
    use chrono::NaiveDateTime;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tempfile::{tempdir, TempDir};

    fn month(m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, m, 1).unwrap()
    }

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 12, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn factor(
        source: &str,
        rate: Decimal,
        m: u32,
        kind: ConversionType,
        flagged: bool,
        updated: NaiveDateTime,
    ) -> CustomConversionFactor {
        CustomConversionFactor {
            account_id: "acc".to_string(),
            cloud_service_provider: CloudProvider::Gcp,
            source_currency: source.to_string(),
            destination_currency: "INR".to_string(),
            conversion_factor: rate,
            month: month(m),
            conversion_type: kind,
            is_historical_update_required: flagged,
            updated_at: updated,
        }
    }

    fn setup() -> (TempDir, CurrencyPreferenceRepository) {
        let dir = tempdir().unwrap();
        let db_path = init(dir.path().join("prefs.db").to_str().unwrap()).unwrap();
        let pool = create_pool(&db_path).unwrap();
        run_migrations(&pool).unwrap();
        let writer = spawn_writer(pool.clone());
        (dir, CurrencyPreferenceRepository::new(pool, writer))
    }

    #[tokio::test]
    async fn test_preferred_currency_round_trip() {
        let (_dir, repo) = setup();
        assert_eq!(repo.get_preferred_currency("acc").unwrap(), None);

        repo.set_preferred_currency("acc", Some("inr")).await.unwrap();
        assert_eq!(
            repo.get_preferred_currency("acc").unwrap(),
            Some("INR".to_string())
        );

        repo.set_preferred_currency("acc", None).await.unwrap();
        assert_eq!(repo.get_preferred_currency("acc").unwrap(), None);
    }

    #[tokio::test]
    async fn test_custom_factors_stop_at_requested_month() {
        let (_dir, repo) = setup();
        for f in [
            factor("USD", dec!(80), 10, ConversionType::Custom, false, at(1)),
            factor("USD", dec!(81), 11, ConversionType::Default, false, at(2)),
            factor("USD", dec!(83), 12, ConversionType::Custom, false, at(3)),
        ] {
            repo.save_custom_factor(&f).await.unwrap();
        }

        let factors = repo
            .get_custom_conversion_factors("acc", CloudProvider::Gcp, "inr", month(11))
            .unwrap();

        assert_eq!(factors.len(), 2);
        assert_eq!(factors[1].conversion_factor, dec!(81));
        assert_eq!(factors[1].conversion_type, ConversionType::Default);
        assert!(repo
            .get_custom_conversion_factors("acc", CloudProvider::Aws, "INR", month(12))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_historical_flags_are_listed_and_cleared() {
        let (_dir, repo) = setup();
        for f in [
            factor("USD", dec!(80), 10, ConversionType::Custom, true, at(1)),
            factor("USD", dec!(81), 11, ConversionType::Custom, true, at(2)),
            factor("EUR", dec!(90), 12, ConversionType::Custom, true, at(3)),
        ] {
            repo.save_custom_factor(&f).await.unwrap();
        }

        let flagged = repo
            .get_historical_update_factors("acc", CloudProvider::Gcp, &[month(12)])
            .unwrap();
        assert_eq!(flagged.len(), 2);
        assert!(flagged.iter().all(|f| f.month != month(12)));

        let cleared = repo
            .clear_historical_update_flag("acc", CloudProvider::Gcp, &[month(12)])
            .await
            .unwrap();
        assert_eq!(cleared, 1);

        let remaining = repo
            .get_historical_update_factors("acc", CloudProvider::Gcp, &[])
            .unwrap();
        assert_eq!(remaining.len(), 2);
    }
}
