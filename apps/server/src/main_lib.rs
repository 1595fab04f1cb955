use std::sync::Arc;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use ccm_core::currency::{
    ConversionSettings, CurrencyConversionService, CurrencyConversionServiceTrait, QueryOptions,
};
use ccm_fx_rates::{BackupRateTable, CurrencyApiProvider};
use ccm_storage_sqlite::{
    currency::{BillingRepository, ConversionFactorRepository, CurrencyPreferenceRepository},
    db::{self, DbPool},
};

pub struct AppState {
    pub conversion_service: Arc<dyn CurrencyConversionServiceTrait>,
    pub preference_repository: Arc<CurrencyPreferenceRepository>,
    pub pool: Arc<DbPool>,
    pub db_path: String,
}

pub fn init_tracing() {
    let log_format = std::env::var("CCM_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

pub async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let db_path = db::init(&config.db_path)?;
    tracing::info!("Database path in use: {}", db_path);

    let pool = db::create_pool(&db_path)?;
    db::run_migrations(&pool)?;
    let writer = db::spawn_writer(pool.clone());

    let preference_repository = Arc::new(CurrencyPreferenceRepository::new(
        pool.clone(),
        writer.clone(),
    ));
    let billing_repository = Arc::new(BillingRepository::new(pool.clone(), writer.clone()));
    let factor_repository = Arc::new(ConversionFactorRepository::new(writer));

    let api_provider = Arc::new(CurrencyApiProvider::new(
        &config.fx_api_base_url,
        config.fx_api_timeout,
    ));
    let backup_provider = Arc::new(BackupRateTable::pinned()?);

    let settings = ConversionSettings {
        rewrite_options: QueryOptions {
            timeout: config.query_timeout,
        },
        write_back_default_factors: true,
    };
    let conversion_service = Arc::new(
        CurrencyConversionService::new(
            preference_repository.clone(),
            billing_repository,
            factor_repository,
            api_provider,
            backup_provider,
        )
        .with_settings(settings),
    );

    Ok(Arc::new(AppState {
        conversion_service,
        preference_repository,
        pool,
        db_path,
    }))
}
