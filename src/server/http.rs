use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use super::AppState;
use crate::error::ApiError;
use crate::types::{AccountsQuery, CallbackParams};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // OAuth flow
        .route("/login", get(login_handler))
        .route("/callback", get(callback_handler))
        // QuickBooks proxy
        .route("/accounts", get(accounts_handler))
        // Operations
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn record<T>(endpoint: &str, result: &Result<T, ApiError>) {
    let status = match result {
        Ok(_) => StatusCode::OK,
        Err(e) => e.status(),
    };
    crate::metrics::METRICS
        .requests_total
        .with_label_values(&[endpoint, status.as_str()])
        .inc();
}

/// GET /login - redirect to the QuickBooks consent screen
pub async fn login_handler(State(state): State<AppState>) -> Response {
    let nonce = state.login_states.issue();
    let url = state.auth.authorization_url(&nonce);

    crate::metrics::METRICS
        .requests_total
        .with_label_values(&["login", StatusCode::FOUND.as_str()])
        .inc();

    (StatusCode::FOUND, [(header::LOCATION, url)]).into_response()
}

/// GET /callback?code&state&realmId
pub async fn callback_handler(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<Value>, ApiError> {
    let expected = params
        .state
        .as_deref()
        .and_then(|presented| state.login_states.consume(presented));

    let result = state.auth.handle_callback(params, expected.as_deref()).await;
    record("callback", &result);
    result.map(Json)
}

/// GET /accounts?name_prefix=
pub async fn accounts_handler(
    State(state): State<AppState>,
    Query(query): Query<AccountsQuery>,
) -> Result<Json<Value>, ApiError> {
    let result = state.accounts.list_accounts(query.name_prefix.as_deref()).await;
    record("accounts", &result);
    result.map(Json)
}

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let authenticated = match state.auth.store().current().await {
        Ok(current) => current.is_some(),
        Err(e) => {
            error!("Health check could not read credential store: {}", e);
            false
        }
    };

    Json(json!({
        "status": "healthy",
        "version": crate::VERSION,
        "authenticated": authenticated,
    }))
}

/// GET /metrics (Prometheus format)
pub async fn metrics_handler() -> Result<String, ApiError> {
    crate::metrics::METRICS
        .render()
        .map_err(|e| ApiError::Internal(e.to_string()))
}
