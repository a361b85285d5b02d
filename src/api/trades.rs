//! Trade history routes.

use crate::api::{
    error_response, internal_error, parse_limit, parse_trade_mode, validate_date, ApiContext,
    DEFAULT_QUERY_LIMIT,
};
use crate::storage::trading_day_now;
use crate::types::Trade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub(crate) struct TradeQuery {
    mode: Option<String>,
    limit: Option<String>,
}

/// Compact trade shape for chart overlays.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TradeJson {
    t: i64,
    side: String,
    price: f64,
    qty: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    grid_level: Option<i32>,
    usd_value: f64,
    is_paper_trade: bool,
}

impl From<&Trade> for TradeJson {
    fn from(t: &Trade) -> Self {
        Self {
            t: t.timestamp.timestamp_millis(),
            side: t.side.to_string(),
            price: t.price,
            qty: t.quantity,
            grid_level: t.grid_level,
            usd_value: t.usd_value,
            is_paper_trade: t.is_paper_trade,
        }
    }
}

pub(crate) async fn today(
    State(ctx): State<Arc<ApiContext>>,
    Query(query): Query<TradeQuery>,
) -> Response {
    let mode = match parse_trade_mode(query.mode.as_deref()) {
        Ok(mode) => mode,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match ctx.trade_repo.get_by_day(&trading_day_now(), mode).await {
        Ok(trades) => Json(trades.iter().map(TradeJson::from).collect::<Vec<_>>()).into_response(),
        Err(e) => internal_error("failed to fetch trades", e),
    }
}

pub(crate) async fn by_day(
    State(ctx): State<Arc<ApiContext>>,
    Path(date): Path<String>,
    Query(query): Query<TradeQuery>,
) -> Response {
    if !validate_date(&date) {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid date format, expected YYYY-MM-DD",
        );
    }

    let mode = match parse_trade_mode(query.mode.as_deref()) {
        Ok(mode) => mode,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match ctx.trade_repo.get_by_day(&date, mode).await {
        Ok(trades) => Json(trades.iter().map(TradeJson::from).collect::<Vec<_>>()).into_response(),
        Err(e) => internal_error("failed to fetch trades", e),
    }
}

pub(crate) async fn all(
    State(ctx): State<Arc<ApiContext>>,
    Query(query): Query<TradeQuery>,
) -> Response {
    let limit = parse_limit(query.limit.as_deref(), DEFAULT_QUERY_LIMIT);
    let mode = match parse_trade_mode(query.mode.as_deref()) {
        Ok(mode) => mode,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match ctx.trade_repo.get_all(limit, mode).await {
        Ok(trades) => Json(trades).into_response(),
        Err(e) => internal_error("failed to fetch trades", e),
    }
}

pub(crate) async fn stats(
    State(ctx): State<Arc<ApiContext>>,
    Query(query): Query<TradeQuery>,
) -> Response {
    let mode = match parse_trade_mode(query.mode.as_deref()) {
        Ok(mode) => mode,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match ctx.trade_repo.get_stats(mode).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => internal_error("failed to fetch trade stats", e),
    }
}
