//! Grid-state route.

use crate::api::{internal_error, ApiContext};
use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GridCurrentResponse {
    base_price: Option<f64>,
    grid: serde_json::Value,
    trades_executed: i32,
    total_profit: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_update: Option<String>,
}

pub(crate) async fn current(State(ctx): State<Arc<ApiContext>>) -> Response {
    match ctx.grid_repo.get_active().await {
        Ok(Some(state)) => Json(GridCurrentResponse {
            base_price: state.base_price,
            grid: state.grid_levels.unwrap_or_else(|| serde_json::json!([])),
            trades_executed: state.trades_executed,
            total_profit: state.total_profit,
            last_update: Some(state.updated_at.to_rfc3339()),
        })
        .into_response(),
        Ok(None) => Json(GridCurrentResponse {
            base_price: None,
            grid: serde_json::json!([]),
            trades_executed: 0,
            total_profit: 0.0,
            last_update: None,
        })
        .into_response(),
        Err(e) => internal_error("failed to fetch grid state", e),
    }
}
