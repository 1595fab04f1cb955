//! SQL text for the cost rewrite.
//!
//! Identifiers come from the cost table registry and are validated before they
//! are spliced into the statement. Every value is a bound parameter.

use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types::{Double, Text};
use diesel::sqlite::Sqlite;
use num_traits::ToPrimitive;

use ccm_core::currency::{CostRewrite, CostTable, RateExpression};

use crate::errors::StorageError;

pub(crate) const ACCOUNT_COLUMN: &str = "account_id";
pub(crate) const FX_RATE_COLUMN: &str = "fx_rate_src_to_dest";
pub(crate) const PREFERRED_CURRENCY_COLUMN: &str = "ccm_preferred_currency";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlParam {
    Text(String),
    Double(f64),
}

/// A statement and its parameters in bind order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BoundSql {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl BoundSql {
    pub fn into_query(self) -> BoxedSqlQuery<'static, Sqlite, SqlQuery> {
        let mut query = diesel::sql_query(self.sql).into_boxed::<Sqlite>();
        for param in self.params {
            query = match param {
                SqlParam::Text(value) => query.bind::<Text, _>(value),
                SqlParam::Double(value) => query.bind::<Double, _>(value),
            };
        }
        query
    }
}

pub(crate) fn quote_identifier(name: &str) -> Result<String, StorageError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StorageError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name))
}

pub(crate) fn month_of(column: &str) -> String {
    format!("strftime('%Y-%m-01', {})", column)
}

/// `CASE WHEN key = ? AND month = ? THEN ? ... ELSE 1.0 END`
pub(crate) fn rate_case(
    expression: &RateExpression,
    key_column: &str,
    month_column: &str,
) -> Result<BoundSql, StorageError> {
    let default_rate = expression
        .default_rate()
        .to_f64()
        .ok_or_else(|| StorageError::CoreError("default rate out of range".to_string()))?;

    if expression.is_empty() {
        return Ok(BoundSql {
            sql: "?".to_string(),
            params: vec![SqlParam::Double(default_rate)],
        });
    }

    let mut sql = String::from("CASE");
    let mut params = Vec::with_capacity(expression.len() * 3 + 1);
    for arm in expression.arms() {
        let rate = arm.rate.to_f64().ok_or_else(|| {
            StorageError::CoreError(format!("rate {} out of range", arm.rate))
        })?;
        sql.push_str(&format!(
            " WHEN {} = ? AND {} = ? THEN ?",
            key_column,
            month_of(month_column)
        ));
        params.push(SqlParam::Text(arm.billing_key.clone()));
        params.push(SqlParam::Text(arm.month.format("%Y-%m-%d").to_string()));
        params.push(SqlParam::Double(rate));
    }
    sql.push_str(" ELSE ? END");
    params.push(SqlParam::Double(default_rate));

    Ok(BoundSql { sql, params })
}

/// Rows of the account, provider and months that were not converted yet.
fn scope(table: &CostTable, rewrite: &CostRewrite) -> Result<BoundSql, StorageError> {
    let start = quote_identifier(&table.start_time_column)?;
    let mut sql = format!("{} = ?", quote_identifier(ACCOUNT_COLUMN)?);
    let mut params = vec![SqlParam::Text(rewrite.account_id.clone())];

    if let Some(provider_column) = &table.provider_column {
        sql.push_str(&format!(" AND {} = ?", quote_identifier(provider_column)?));
        params.push(SqlParam::Text(rewrite.provider.as_str().to_string()));
    }

    let placeholders = vec!["?"; rewrite.months.len()].join(", ");
    sql.push_str(&format!(" AND {} IN ({})", month_of(&start), placeholders));
    params.extend(
        rewrite
            .months
            .iter()
            .map(|month| SqlParam::Text(month.format("%Y-%m-%d").to_string())),
    );

    sql.push_str(&format!(
        " AND {} IS NULL",
        quote_identifier(PREFERRED_CURRENCY_COLUMN)?
    ));
    Ok(BoundSql { sql, params })
}

/// Two statements run in one transaction: stamp the rate, then multiply the
/// monetary columns by it and record the preferred currency.
pub(crate) fn rewrite_statements(
    table: &CostTable,
    rewrite: &CostRewrite,
) -> Result<(BoundSql, BoundSql), StorageError> {
    let table_name = quote_identifier(&table.name)?;
    let fx_column = quote_identifier(FX_RATE_COLUMN)?;
    let where_clause = scope(table, rewrite)?;
    let case = rate_case(
        &rewrite.expression,
        &quote_identifier(&table.billing_key_column)?,
        &quote_identifier(&table.start_time_column)?,
    )?;

    let mut stamp_params = case.params;
    stamp_params.extend(where_clause.params.iter().cloned());
    let stamp = BoundSql {
        sql: format!(
            "UPDATE {} SET {} = {} WHERE {}",
            table_name, fx_column, case.sql, where_clause.sql
        ),
        params: stamp_params,
    };

    let mut assignments = Vec::with_capacity(table.monetary_columns.len() + 1);
    for column in &table.monetary_columns {
        let column = quote_identifier(column)?;
        assignments.push(format!("{} = {} * {}", column, column, fx_column));
    }
    assignments.push(format!("{} = ?", quote_identifier(PREFERRED_CURRENCY_COLUMN)?));

    let mut convert_params = vec![SqlParam::Text(rewrite.preferred_currency.clone())];
    convert_params.extend(where_clause.params);
    let convert = BoundSql {
        sql: format!(
            "UPDATE {} SET {} WHERE {}",
            table_name,
            assignments.join(", "),
            where_clause.sql
        ),
        params: convert_params,
    };

    Ok((stamp, convert))
}
