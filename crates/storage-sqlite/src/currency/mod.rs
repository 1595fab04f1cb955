mod billing_repository;
mod factor_repository;
mod model;
mod preference_repository;
mod rewrite_sql;

pub use billing_repository::{default_cost_tables, BillingRepository};
pub use factor_repository::ConversionFactorRepository;
pub use model::{
    ColumnName, CurrencyPreferenceDB, CustomConversionFactorDB, DefaultConversionFactorDB,
    SourceCurrencyRow,
};
pub use preference_repository::CurrencyPreferenceRepository;
