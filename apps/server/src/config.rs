use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use ccm_fx_rates::DEFAULT_CURRENCY_API_BASE_URL;

pub struct Config {
    pub listen_addr: SocketAddr,
    pub db_path: String,
    pub fx_api_base_url: String,
    pub fx_api_timeout: Duration,
    /// Upper bound for one cost table rewrite.
    pub query_timeout: Duration,
    pub request_timeout: Duration,
}

fn secs_from_env(key: &str, default: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let listen_addr: SocketAddr = std::env::var("CCM_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8088".to_string())
            .parse()
            .context("Invalid CCM_LISTEN_ADDR")?;
        let db_path = std::env::var("CCM_DB_PATH").unwrap_or_else(|_| "./db/ccm.db".into());
        let fx_api_base_url = std::env::var("CCM_FX_API_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_CURRENCY_API_BASE_URL.into());

        Ok(Self {
            listen_addr,
            db_path,
            fx_api_base_url,
            fx_api_timeout: secs_from_env("CCM_FX_API_TIMEOUT_SECS", 30),
            query_timeout: secs_from_env("CCM_QUERY_TIMEOUT_SECS", 1800),
            request_timeout: secs_from_env("CCM_REQUEST_TIMEOUT_SECS", 3600),
        })
    }
}
