use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde_json::Value;
use tracing::info;

use crate::api::{
    auth::ensure_authorized,
    state::AppState,
    types::{ApiError, ExecuteResponse},
};
use crate::domain::ExecuteRequest;
use crate::error::ExecutorError;

/// Six random bytes, hex encoded
pub fn new_rid() -> String {
    hex::encode(rand::random::<[u8; 6]>())
}

/// Copy of the body safe to log
fn scrub_for_log(body: &Value) -> Value {
    let mut scrubbed = body.clone();
    if let Some(secret) = scrubbed.get_mut("secret") {
        *secret = Value::String("***".to_string());
    }
    scrubbed
}

/// POST /execute
pub async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Json<ExecuteResponse>, ApiError> {
    let rid = new_rid();
    let result = run_execute(&state, &rid, &headers, &body).await;

    match &result {
        Ok(Json(resp)) => info!(
            rid = %rid,
            status = 200,
            ok = resp.ok,
            side = %resp.side,
            executed = resp.opened.is_some() || resp.realized.is_some(),
            exchange_status = ?resp.exchange_status,
            endpoint = ?resp.endpoint,
            "execute_out"
        ),
        Err(err) => info!(
            rid = %rid,
            status = err.status().as_u16(),
            ok = false,
            kind = err.error.kind(),
            error = %err.error,
            "execute_out"
        ),
    }
    result
}

async fn run_execute(
    state: &AppState,
    rid: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> std::result::Result<Json<ExecuteResponse>, ApiError> {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();
    let body_secret = parsed
        .as_ref()
        .and_then(|v| v.get("secret"))
        .and_then(Value::as_str);

    ensure_authorized(headers, body_secret, &state.config.auth.secret)
        .map_err(|e| ApiError::new(rid, e))?;

    let Some(raw) = parsed else {
        return Err(ApiError::new(
            rid,
            ExecutorError::Validation("invalid json body".to_string()),
        ));
    };

    let request: ExecuteRequest = serde_json::from_value(raw.clone()).map_err(|e| {
        ApiError::new(
            rid,
            ExecutorError::Validation(format!("invalid request body: {}", e)),
        )
    })?;

    info!(
        rid,
        strategy = request.strategy.as_deref().unwrap_or(""),
        body = %scrub_for_log(&raw),
        "execute_in"
    );

    let validated = request.validate(&state.config).map_err(|e| {
        let err = ApiError::new(rid, e);
        if matches!(err.error, ExecutorError::SymbolNotAllowed { .. }) {
            err.with_allowlist(state.config.strategy.symbol_allowlist.clone())
        } else {
            err
        }
    })?;

    let report = state
        .executor
        .execute(rid, &validated)
        .await
        .map_err(|e| ApiError::new(rid, e))?;

    Ok(Json(ExecuteResponse::from(report)))
}
