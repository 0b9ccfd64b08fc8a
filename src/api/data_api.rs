//! Data API Endpoints
//! Mission: Tenant-scoped result submission, listing and analysis

use crate::api::{error::ApiError, AppState};
use crate::auth::models::Claims;
use crate::ws::StreamEvent;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    // Defaults to Null so a missing field surfaces as `invalid`, not as a
    // body-rejection status.
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CountQuery {
    pub count: Option<usize>,
}

/// Coerce a JSON value into a finite integer. Strings that parse as
/// integers are accepted; anything fractional or non-numeric is rejected.
pub fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else {
                // Accept e.g. 12.0; reject 12.5, NaN and out-of-range.
                n.as_f64().filter(|f| f.is_finite() && f.fract() == 0.0
                    && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                    .map(|f| f as i64)
            }
        }
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// POST /api/result — append one result to the caller's tenant, invalidate
/// the analysis cache and broadcast to the tenant's stream subscribers.
pub async fn submit_result(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let value = coerce_integer(&payload.value)
        .ok_or_else(|| ApiError::Invalid("value must be a finite integer".to_string()))?;

    let entry = state.data.append(&claims.sub, value)?;
    state.analytics.invalidate(&claims.sub);

    let delivered = state
        .broker
        .publish(&claims.sub, &StreamEvent::ResultUpdate(entry.clone()));
    debug!(username = %claims.sub, value, delivered, "Result submitted");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "result": entry,
        })),
    ))
}

/// GET /api/results?limit=N
pub async fn list_results(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, ApiError> {
    let results = state.data.list_results(&claims.sub, query.limit)?;
    Ok(Json(json!({
        "success": true,
        "results": results,
    })))
}

/// GET /api/history?limit=N
pub async fn list_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, ApiError> {
    let history = state.data.list_history(&claims.sub, query.limit)?;
    Ok(Json(json!({
        "success": true,
        "history": history,
    })))
}

/// GET /api/statistics
pub async fn statistics(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, ApiError> {
    let statistics = state.data.statistics(&claims.sub)?;
    Ok(Json(json!({
        "success": true,
        "statistics": statistics,
    })))
}

/// GET /api/analysis?count=N
pub async fn analysis(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<CountQuery>,
) -> Result<Json<Value>, ApiError> {
    let input = state
        .data
        .analysis_window(&claims.sub, query.count, state.config.batch_size)?;
    let record = state.analytics.analyze(&claims.sub, &input);
    Ok(Json(json!({
        "success": true,
        "analysis": &*record,
    })))
}

/// GET /api/export — deep tenant snapshot; 404 when no data exists.
pub async fn export(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, ApiError> {
    let export = state.data.export(&claims.sub)?;
    Ok(Json(json!({
        "success": true,
        "export": export,
    })))
}

/// POST /api/clear — drop results (history retained) and notify the
/// tenant's stream subscribers.
pub async fn clear(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, ApiError> {
    state.data.clear(&claims.sub)?;
    state.analytics.invalidate(&claims.sub);

    state.broker.publish(
        &claims.sub,
        &StreamEvent::ResultsCleared {
            timestamp: chrono::Local::now().timestamp_millis(),
        },
    );

    Ok(Json(json!({ "success": true })))
}
