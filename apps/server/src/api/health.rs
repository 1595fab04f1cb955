use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::{error::ApiResult, main_lib::AppState};
use ccm_storage_sqlite::get_connection;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthStatus {
    status: &'static str,
    version: &'static str,
    db_path: String,
}

/// Reports ok once a pooled connection can be checked out.
async fn get_health(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthStatus>> {
    get_connection(&state.pool)?;
    Ok(Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        db_path: state.db_path.clone(),
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}
