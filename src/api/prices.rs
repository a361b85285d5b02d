//! Price history routes.

use crate::api::{error_response, internal_error, validate_date, ApiContext};
use crate::storage::trading_day_now;
use crate::types::PricePoint;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use std::sync::Arc;

/// Compact chart point: timestamp in unix milliseconds plus price.
#[derive(Debug, Serialize)]
struct PriceJson {
    t: i64,
    p: f64,
}

impl From<&PricePoint> for PriceJson {
    fn from(p: &PricePoint) -> Self {
        Self {
            t: p.timestamp.timestamp_millis(),
            p: p.price,
        }
    }
}

pub(crate) async fn today(State(ctx): State<Arc<ApiContext>>) -> Response {
    match ctx.price_repo.get_by_day(&trading_day_now()).await {
        Ok(prices) => Json(prices.iter().map(PriceJson::from).collect::<Vec<_>>()).into_response(),
        Err(e) => internal_error("failed to fetch prices", e),
    }
}

pub(crate) async fn by_day(
    State(ctx): State<Arc<ApiContext>>,
    Path(date): Path<String>,
) -> Response {
    if !validate_date(&date) {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid date format, expected YYYY-MM-DD",
        );
    }

    match ctx.price_repo.get_by_day(&date).await {
        Ok(prices) => Json(prices.iter().map(PriceJson::from).collect::<Vec<_>>()).into_response(),
        Err(e) => internal_error("failed to fetch prices", e),
    }
}

pub(crate) async fn available_days(State(ctx): State<Arc<ApiContext>>) -> Response {
    match ctx.price_repo.get_available_days().await {
        Ok(days) => Json(days).into_response(),
        Err(e) => internal_error("failed to fetch available days", e),
    }
}

pub(crate) async fn latest(State(ctx): State<Arc<ApiContext>>) -> Response {
    match ctx.price_repo.get_latest().await {
        Ok(Some(price)) => Json(PriceJson::from(&price)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "no price data available"),
        Err(e) => internal_error("failed to fetch latest price", e),
    }
}
