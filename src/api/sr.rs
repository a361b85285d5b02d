//! Support/resistance routes.

use crate::api::{error_response, internal_error, parse_limit, ApiContext, DEFAULT_QUERY_LIMIT};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryQuery {
    limit: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SrLatestResponse {
    support: f64,
    resistance: f64,
    midpoint: f64,
    avg_price: Option<f64>,
    method: String,
    lookback_days: i32,
    timestamp: DateTime<Utc>,
}

pub(crate) async fn latest(State(ctx): State<Arc<ApiContext>>) -> Response {
    match ctx.sr_repo.get_latest().await {
        Ok(Some(sr)) => Json(SrLatestResponse {
            support: sr.support,
            resistance: sr.resistance,
            midpoint: sr.midpoint,
            avg_price: sr.avg_price,
            method: sr.method,
            lookback_days: sr.lookback_days,
            timestamp: sr.timestamp,
        })
        .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "no S/R data available"),
        Err(e) => internal_error("failed to fetch S/R data", e),
    }
}

pub(crate) async fn history(
    State(ctx): State<Arc<ApiContext>>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = parse_limit(query.limit.as_deref(), DEFAULT_QUERY_LIMIT);
    match ctx.sr_repo.get_history(limit).await {
        Ok(history) => Json(history).into_response(),
        Err(e) => internal_error("failed to fetch S/R history", e),
    }
}
