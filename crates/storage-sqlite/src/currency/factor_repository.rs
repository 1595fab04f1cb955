use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::{Nullable, Text};

use super::model::DefaultConversionFactorDB;
use crate::db::WriteHandle;
use crate::errors::StorageError;
use crate::schema::currency_conversion_factor_default;
use ccm_core::currency::{ConversionFactorRepositoryTrait, DefaultConversionFactor};
use ccm_core::errors::Result;

// `IS` matches NULL account and provider for the shared API rows.
const DELETE_SAME_KEY: &str = "DELETE FROM currency_conversion_factor_default \
     WHERE account_id IS ? AND cloud_service_provider IS ? \
     AND source_currency = ? AND destination_currency = ? \
     AND month = ? AND conversion_source = ?";

/// Writes the shared default-factor table. Only the writer touches it.
pub struct ConversionFactorRepository {
    writer: WriteHandle,
}

impl ConversionFactorRepository {
    pub fn new(writer: WriteHandle) -> Self {
        ConversionFactorRepository { writer }
    }
}

#[async_trait]
impl ConversionFactorRepositoryTrait for ConversionFactorRepository {
    async fn replace_default_factors(&self, factors: Vec<DefaultConversionFactor>) -> Result<usize> {
        if factors.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().naive_utc();
        let rows: Vec<DefaultConversionFactorDB> = factors
            .iter()
            .map(|factor| DefaultConversionFactorDB::from_domain(factor, now))
            .collect();

        self.writer
            .exec(move |conn| {
                for row in &rows {
                    diesel::sql_query(DELETE_SAME_KEY)
                        .bind::<Nullable<Text>, _>(row.account_id.clone())
                        .bind::<Nullable<Text>, _>(row.cloud_service_provider.clone())
                        .bind::<Text, _>(&row.source_currency)
                        .bind::<Text, _>(&row.destination_currency)
                        .bind::<Text, _>(&row.month)
                        .bind::<Text, _>(&row.conversion_source)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }

                let inserted = diesel::insert_into(currency_conversion_factor_default::table)
                    .values(&rows)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(inserted)
            })
            .await
    }
}
