use async_trait::async_trait;
use chrono::NaiveDate;
use diesel::prelude::*;
use diesel::sql_types::Text;
use diesel::sqlite::Sqlite;
use log::{debug, info, warn};
use std::sync::Arc;

use super::model::{ColumnName, SourceCurrencyRow, MONTH_FORMAT};
use super::rewrite_sql::{
    month_of, quote_identifier, rewrite_statements, FX_RATE_COLUMN, PREFERRED_CURRENCY_COLUMN,
};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::{IntoCore, StorageError};
use ccm_core::currency::{
    BillingRepositoryTrait, CloudProvider, CostRewrite, CostTable, QueryOptions,
    SourceCurrencyObservation,
};
use ccm_core::errors::Result;

const BILLING_EXPORT_TABLE: &str = "billing_export";

fn cost_table(name: &str, start: &str, monetary: &[&str]) -> CostTable {
    CostTable {
        name: name.to_string(),
        start_time_column: start.to_string(),
        billing_key_column: "billing_key".to_string(),
        monetary_columns: monetary.iter().map(|c| c.to_string()).collect(),
        provider_column: Some("cloud_provider".to_string()),
    }
}

/// Raw export first, then the tables derived from it.
pub fn default_cost_tables() -> Vec<CostTable> {
    vec![
        cost_table(
            BILLING_EXPORT_TABLE,
            "usage_start_time",
            &["cost", "credits", "resource_rate"],
        ),
        cost_table("unified_table", "start_time", &["cost", "discount"]),
        cost_table("pre_aggregated", "start_time", &["cost", "discount"]),
    ]
}

pub struct BillingRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
    tables: Vec<CostTable>,
}

impl BillingRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        BillingRepository {
            pool,
            writer,
            tables: default_cost_tables(),
        }
    }

    fn existing_columns(&self, table: &str) -> Result<Vec<String>> {
        let mut conn = get_connection(&self.pool)?;
        let columns = diesel::sql_query("SELECT name FROM pragma_table_info(?)")
            .bind::<Text, _>(table)
            .load::<ColumnName>(&mut conn)
            .into_core()?;
        Ok(columns.into_iter().map(|c| c.name).collect())
    }
}

#[async_trait]
impl BillingRepositoryTrait for BillingRepository {
    fn get_source_currencies(
        &self,
        account_id: &str,
        provider: CloudProvider,
        months: &[NaiveDate],
    ) -> Result<Vec<SourceCurrencyObservation>> {
        if months.is_empty() {
            return Ok(Vec::new());
        }

        // Until the first rewrite adds the marker column nothing is converted.
        let unconverted = if self
            .existing_columns(BILLING_EXPORT_TABLE)?
            .iter()
            .any(|c| c.eq_ignore_ascii_case(PREFERRED_CURRENCY_COLUMN))
        {
            format!("AND {} IS NULL", quote_identifier(PREFERRED_CURRENCY_COLUMN)?)
        } else {
            String::new()
        };

        let placeholders = vec!["?"; months.len()].join(", ");
        let sql = format!(
            "SELECT billing_key, {month} AS billing_month, UPPER(TRIM(currency)) AS currency, \
             MAX(currency_conversion_rate) AS reported_rate, \
             MAX(pricing_currency) AS pricing_currency \
             FROM {table} \
             WHERE account_id = ? AND cloud_provider = ? \
             AND {month} IN ({placeholders}) \
             AND currency IS NOT NULL AND TRIM(currency) <> '' {unconverted} \
             GROUP BY billing_key, billing_month, UPPER(TRIM(currency)) \
             ORDER BY billing_month, billing_key",
            month = month_of("usage_start_time"),
            table = BILLING_EXPORT_TABLE,
            placeholders = placeholders,
            unconverted = unconverted,
        );

        let mut query = diesel::sql_query(sql)
            .into_boxed::<Sqlite>()
            .bind::<Text, _>(account_id.to_string())
            .bind::<Text, _>(provider.as_str().to_string());
        for month in months {
            query = query.bind::<Text, _>(month.format(MONTH_FORMAT).to_string());
        }

        let mut conn = get_connection(&self.pool)?;
        let rows = query
            .load::<SourceCurrencyRow>(&mut conn)
            .map_err(StorageError::from)?;

        rows.into_iter()
            .map(SourceCurrencyObservation::try_from)
            .collect()
    }

    fn list_cost_tables(&self, _provider: CloudProvider) -> Vec<CostTable> {
        self.tables.clone()
    }

    async fn ensure_currency_columns(&self, table: &CostTable) -> Result<()> {
        let table_name = quote_identifier(&table.name)?;
        let existing = self.existing_columns(&table.name)?;
        if existing.is_empty() {
            return Err(StorageError::InvalidIdentifier(table.name.clone()).into());
        }

        let mut statements = Vec::new();
        for (column, sql_type) in [(FX_RATE_COLUMN, "DOUBLE"), (PREFERRED_CURRENCY_COLUMN, "TEXT")] {
            if !existing.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                statements.push(format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    table_name,
                    quote_identifier(column)?,
                    sql_type
                ));
            }
        }

        if statements.is_empty() {
            return Ok(());
        }

        info!("Adding currency columns to {}", table.name);
        self.writer
            .exec(move |conn| {
                for statement in &statements {
                    diesel::sql_query(statement.as_str())
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(())
            })
            .await
    }

    async fn apply_conversion(
        &self,
        table: &CostTable,
        rewrite: &CostRewrite,
        options: QueryOptions,
    ) -> Result<usize> {
        if rewrite.months.is_empty() {
            warn!("Rewrite of {} requested without months", table.name);
            return Ok(0);
        }

        let (stamp, convert) = rewrite_statements(table, rewrite)?;
        debug!(
            "Rewriting {} for account {} ({} arms, timeout {:?})",
            table.name,
            rewrite.account_id,
            rewrite.expression.len(),
            options.timeout
        );

        let table_name = table.name.clone();
        let rows = self
            .writer
            .exec_with_timeout(options.timeout, move |conn| {
                stamp
                    .into_query()
                    .execute(conn)
                    .map_err(StorageError::from)?;
                let converted = convert
                    .into_query()
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(converted)
            })
            .await?;

        debug!("Converted {} rows in {}", rows, table_name);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, init, run_migrations, spawn_writer};
    use ccm_core::currency::{RateExpression, RateSource, RateTable};
    use rust_decimal_macros::dec;
    use tempfile::{tempdir, TempDir};

    fn december() -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 12, 1).unwrap()
    }

    fn november() -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 11, 1).unwrap()
    }

    async fn setup() -> (TempDir, BillingRepository) {
        let dir = tempdir().unwrap();
        let db_path = init(dir.path().join("billing.db").to_str().unwrap()).unwrap();
        let pool = create_pool(&db_path).unwrap();
        run_migrations(&pool).unwrap();
        let writer = spawn_writer(pool.clone());
        (dir, BillingRepository::new(pool, writer))
    }

    async fn seed(repo: &BillingRepository, sql: &'static str) {
        repo.writer
            .exec(move |conn| {
                diesel::sql_query(sql)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
            .unwrap();
    }

    fn usd_to_inr_rewrite(months: Vec<NaiveDate>) -> CostRewrite {
        let mut rates = RateTable::new();
        rates.seed(december(), "USD");
        rates.set(december(), "USD", dec!(82.5), RateSource::UserOverride);
        let observations = vec![SourceCurrencyObservation {
            billing_key: "ba-1".to_string(),
            month: december(),
            source_currency: "USD".to_string(),
            embedded_rate: None,
        }];

        CostRewrite {
            account_id: "acc".to_string(),
            provider: CloudProvider::Gcp,
            months,
            preferred_currency: "INR".to_string(),
            expression: RateExpression::build(&observations, &rates.verify().unwrap()).unwrap(),
        }
    }

    fn unified(repo: &BillingRepository) -> CostTable {
        repo.list_cost_tables(CloudProvider::Gcp)
            .into_iter()
            .find(|t| t.name == "unified_table")
            .unwrap()
    }

    #[derive(QueryableByName)]
    struct CostRow {
        #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Double>)]
        cost: Option<f64>,
        #[diesel(sql_type = diesel::sql_types::Nullable<Text>)]
        ccm_preferred_currency: Option<String>,
    }

    fn costs(repo: &BillingRepository) -> Vec<CostRow> {
        let mut conn = get_connection(&repo.pool).unwrap();
        diesel::sql_query("SELECT cost, ccm_preferred_currency FROM unified_table ORDER BY id")
            .load::<CostRow>(&mut conn)
            .unwrap()
    }

    #[tokio::test]
    async fn test_discovery_groups_by_key_and_month() {
        let (_dir, repo) = setup().await;
        seed(
            &repo,
            "INSERT INTO billing_export \
             (account_id, cloud_provider, billing_key, usage_start_time, currency, currency_conversion_rate, cost) VALUES \
             ('acc', 'GCP', 'ba-1', '2022-12-03 00:00:00', 'inr', 80.0, 800.0), \
             ('acc', 'GCP', 'ba-1', '2022-12-20 00:00:00', 'INR', 80.0, 400.0), \
             ('acc', 'GCP', 'ba-2', '2022-12-05 00:00:00', 'USD', 1.0, 5.0), \
             ('acc', 'GCP', 'ba-1', '2022-11-05 00:00:00', 'INR', 79.0, 1.0), \
             ('other', 'GCP', 'ba-9', '2022-12-05 00:00:00', 'EUR', 0.9, 1.0)",
        )
        .await;

        let observations = repo
            .get_source_currencies("acc", CloudProvider::Gcp, &[december()])
            .unwrap();

        assert_eq!(observations.len(), 2);
        let inr = observations
            .iter()
            .find(|o| o.billing_key == "ba-1")
            .unwrap();
        assert_eq!(inr.source_currency, "INR");
        assert_eq!(inr.month, december());
        let hint = inr.embedded_rate.as_ref().unwrap();
        assert_eq!(hint.destination_currency, "USD");
        assert_eq!(hint.rate, dec!(0.0125));
    }

    #[tokio::test]
    async fn test_discovery_skips_converted_rows() {
        let (_dir, repo) = setup().await;
        seed(
            &repo,
            "INSERT INTO billing_export \
             (account_id, cloud_provider, billing_key, usage_start_time, currency, currency_conversion_rate, cost, credits, resource_rate) VALUES \
             ('acc', 'GCP', 'ba-1', '2022-12-03 00:00:00', 'USD', 1.0, 2.0, 0.0, 1.0)",
        )
        .await;
        let export = repo
            .list_cost_tables(CloudProvider::Gcp)
            .into_iter()
            .find(|t| t.name == BILLING_EXPORT_TABLE)
            .unwrap();

        assert_eq!(
            repo.get_source_currencies("acc", CloudProvider::Gcp, &[december()])
                .unwrap()
                .len(),
            1
        );

        repo.ensure_currency_columns(&export).await.unwrap();
        let converted = repo
            .apply_conversion(
                &export,
                &usd_to_inr_rewrite(vec![december()]),
                QueryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(converted, 1);

        assert!(repo
            .get_source_currencies("acc", CloudProvider::Gcp, &[december()])
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_ensure_currency_columns_adds_missing_columns_once() {
        let (_dir, repo) = setup().await;
        let export = repo
            .list_cost_tables(CloudProvider::Gcp)
            .into_iter()
            .find(|t| t.name == BILLING_EXPORT_TABLE)
            .unwrap();

        repo.ensure_currency_columns(&export).await.unwrap();
        repo.ensure_currency_columns(&export).await.unwrap();

        let columns = repo.existing_columns(BILLING_EXPORT_TABLE).unwrap();
        assert!(columns.iter().any(|c| c == FX_RATE_COLUMN));
        assert!(columns.iter().any(|c| c == PREFERRED_CURRENCY_COLUMN));
    }

    #[tokio::test]
    async fn test_ensure_currency_columns_rejects_unknown_table() {
        let (_dir, repo) = setup().await;
        let missing = cost_table("no_such_table", "start_time", &["cost"]);
        assert!(repo.ensure_currency_columns(&missing).await.is_err());
    }

    #[tokio::test]
    async fn test_apply_conversion_is_idempotent() {
        let (_dir, repo) = setup().await;
        seed(
            &repo,
            "INSERT INTO unified_table (account_id, cloud_provider, billing_key, start_time, cost, discount) VALUES \
             ('acc', 'GCP', 'ba-1', '2022-12-03 00:00:00', 2.0, 0.0), \
             ('acc', 'GCP', 'ba-1', '2022-11-03 00:00:00', 2.0, 0.0), \
             ('acc', 'AWS', 'ba-1', '2022-12-03 00:00:00', 2.0, 0.0)",
        )
        .await;
        let table = unified(&repo);
        let rewrite = usd_to_inr_rewrite(vec![december()]);

        let first = repo
            .apply_conversion(&table, &rewrite, QueryOptions::default())
            .await
            .unwrap();
        let second = repo
            .apply_conversion(&table, &rewrite, QueryOptions::default())
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);

        let rows = costs(&repo);
        assert_eq!(rows[0].cost, Some(165.0));
        assert_eq!(rows[0].ccm_preferred_currency.as_deref(), Some("INR"));
        // Other month and other cloud are untouched.
        assert_eq!(rows[1].cost, Some(2.0));
        assert!(rows[1].ccm_preferred_currency.is_none());
        assert_eq!(rows[2].cost, Some(2.0));
    }

    #[tokio::test]
    async fn test_unmatched_rows_in_scope_get_unit_rate() {
        let (_dir, repo) = setup().await;
        seed(
            &repo,
            "INSERT INTO unified_table (account_id, cloud_provider, billing_key, start_time, cost, discount) VALUES \
             ('acc', 'GCP', 'ba-unknown', '2022-12-03 00:00:00', 3.0, 1.0)",
        )
        .await;
        let table = unified(&repo);

        let rows = repo
            .apply_conversion(
                &table,
                &usd_to_inr_rewrite(vec![december(), november()]),
                QueryOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(rows, 1);
        let stored = costs(&repo);
        assert_eq!(stored[0].cost, Some(3.0));
        assert_eq!(stored[0].ccm_preferred_currency.as_deref(), Some("INR"));
    }

    #[tokio::test]
    async fn test_apply_conversion_rejects_bad_identifier() {
        let (_dir, repo) = setup().await;
        let mut table = unified(&repo);
        table.monetary_columns.push("cost = 0; --".to_string());

        let result = repo
            .apply_conversion(
                &table,
                &usd_to_inr_rewrite(vec![december()]),
                QueryOptions::default(),
            )
            .await;
        assert!(result.is_err());
    }
}
