//! Read-only HTTP query surface over the historical data.
//!
//! Bearer-token auth (when an API key is configured, `/health` exempt) wraps
//! a CORS layer that answers preflight requests itself. All handlers are
//! read-only against the repositories.

mod grid;
mod prices;
mod sr;
mod trades;

use crate::error::Result;
use crate::storage::{GridStateRepo, PriceRepo, SrRepo, TradeRepo};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

const DEFAULT_QUERY_LIMIT: i64 = 100;
const MAX_QUERY_LIMIT: i64 = 1000;

/// Shared handler state.
pub struct ApiContext {
    pub pool: PgPool,
    pub price_repo: PriceRepo,
    pub trade_repo: TradeRepo,
    pub sr_repo: SrRepo,
    pub grid_repo: GridStateRepo,
}

impl ApiContext {
    pub fn new(pool: PgPool) -> Self {
        Self {
            price_repo: PriceRepo::new(pool.clone()),
            trade_repo: TradeRepo::new(pool.clone()),
            sr_repo: SrRepo::new(pool.clone()),
            grid_repo: GridStateRepo::new(pool.clone()),
            pool,
        }
    }
}

/// Assemble the router with auth outside CORS, matching the middleware
/// order of the serving stack: auth runs first, CORS second.
pub fn build_router(ctx: Arc<ApiContext>, api_key: &str, cors_origin: &str) -> Router {
    let routes = Router::new()
        .route("/v1/prices/today", get(prices::today))
        .route("/v1/prices/day/:date", get(prices::by_day))
        .route("/v1/prices/days", get(prices::available_days))
        .route("/v1/prices/latest", get(prices::latest))
        .route("/v1/trades/today", get(trades::today))
        .route("/v1/trades/day/:date", get(trades::by_day))
        .route("/v1/trades/all", get(trades::all))
        .route("/v1/trades/stats", get(trades::stats))
        .route("/v1/grid/current", get(grid::current))
        .route("/v1/support-resistance/latest", get(sr::latest))
        .route("/v1/support-resistance/history", get(sr::history))
        .route("/health", get(health))
        .with_state(ctx);

    apply_middleware(routes, api_key, cors_origin)
}

/// Wrap any router in the CORS and auth layers. Split out so middleware can
/// be tested against a stub router.
pub fn apply_middleware(router: Router, api_key: &str, cors_origin: &str) -> Router {
    let cors_origin = if cors_origin.is_empty() {
        "*".to_string()
    } else {
        cors_origin.to_string()
    };

    router
        .layer(middleware::from_fn_with_state(
            Arc::new(cors_origin),
            cors_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::new(api_key.to_string()),
            auth_middleware,
        ))
}

/// Serve the API until the token is cancelled.
pub async fn serve(
    ctx: Arc<ApiContext>,
    port: u16,
    api_key: &str,
    cors_origin: &str,
    cancel: CancellationToken,
) -> Result<()> {
    let app = build_router(ctx, api_key, cors_origin);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;

    info!(port, auth = !api_key.is_empty(), "REST API server started");
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}

async fn auth_middleware(
    State(api_key): State<Arc<String>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if api_key.is_empty() || req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let Some(auth) = req.headers().get(header::AUTHORIZATION).cloned() else {
        return error_response(StatusCode::UNAUTHORIZED, "missing Authorization header");
    };

    let authorized = auth
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == api_key.as_str());
    if authorized {
        next.run(req).await
    } else {
        error_response(StatusCode::UNAUTHORIZED, "invalid API key")
    }
}

async fn cors_middleware(
    State(origin): State<Arc<String>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let preflight = req.method() == Method::OPTIONS;
    let mut response = if preflight {
        StatusCode::OK.into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );

    response
}

async fn health(State(ctx): State<Arc<ApiContext>>) -> Response {
    let database = match sqlx::query("SELECT 1").execute(&ctx.pool).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "services": { "database": database },
    }))
    .into_response()
}

pub(crate) fn error_response(status: StatusCode, msg: &str) -> Response {
    (status, Json(serde_json::json!({ "error": msg }))).into_response()
}

pub(crate) fn internal_error(context: &str, err: impl std::fmt::Display) -> Response {
    tracing::error!(error = %err, "{context}");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, context)
}

/// Validate a `YYYY-MM-DD` path segment: strict shape, real calendar date.
pub(crate) fn validate_date(date: &str) -> bool {
    let bytes = date.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return false;
    }
    if !date
        .chars()
        .enumerate()
        .all(|(i, c)| matches!(i, 4 | 7) || c.is_ascii_digit())
    {
        return false;
    }
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
}

/// Parse a `limit` query value: invalid or non-positive falls back to the
/// default, anything above the cap clamps to it.
pub(crate) fn parse_limit(raw: Option<&str>, default: i64) -> i64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse::<i64>() {
        Ok(n) if n > 0 => n.min(MAX_QUERY_LIMIT),
        _ => default,
    }
}

/// Parse the `mode` query value: `paper`/`live` filter, absent or `all`
/// means no filter.
pub(crate) fn parse_trade_mode(raw: Option<&str>) -> std::result::Result<Option<bool>, String> {
    match raw.unwrap_or("") {
        "" | "all" => Ok(None),
        "paper" => Ok(Some(true)),
        "live" => Ok(Some(false)),
        other => Err(format!("invalid mode {other:?}, expected paper|live|all")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    fn stub_router(api_key: &str) -> Router {
        let inner = Router::new()
            .route("/v1/trades/stats", get(|| async { "ok" }))
            .route("/v1/prices/latest", get(|| async { "ok" }))
            .route("/health", get(|| async { "ok" }));
        apply_middleware(inner, api_key, "*")
    }

    async fn status_of(router: Router, req: HttpRequest<Body>) -> StatusCode {
        router.oneshot(req).await.unwrap().status()
    }

    fn get_req(path: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    fn get_req_with_auth(path: &str, auth: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .uri(path)
            .header("Authorization", auth)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn no_api_key_disables_auth() {
        let status = status_of(stub_router(""), get_req("/v1/trades/stats")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn health_bypasses_auth() {
        let status = status_of(stub_router("secret123"), get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let status = status_of(stub_router("secret123"), get_req("/v1/prices/latest")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_key_is_unauthorized() {
        let status = status_of(
            stub_router("secret123"),
            get_req_with_auth("/v1/prices/latest", "Bearer wrong_key"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn correct_key_is_accepted() {
        let status = status_of(
            stub_router("secret123"),
            get_req_with_auth("/v1/prices/latest", "Bearer secret123"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn non_bearer_scheme_is_unauthorized() {
        let status = status_of(
            stub_router("secret123"),
            get_req_with_auth("/v1/prices/latest", "Basic secret123"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn preflight_short_circuits_with_cors_headers() {
        let router = stub_router("");
        let req = HttpRequest::builder()
            .method(Method::OPTIONS)
            .uri("/v1/prices/latest")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_METHODS)
                .unwrap(),
            "GET, OPTIONS"
        );
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
                .unwrap(),
            "Content-Type, Authorization"
        );
    }

    #[tokio::test]
    async fn cors_headers_apply_to_normal_responses() {
        let inner = Router::new().route("/v1/prices/latest", get(|| async { "ok" }));
        let router = apply_middleware(inner, "", "https://myapp.example.com");

        let response = router.oneshot(get_req("/v1/prices/latest")).await.unwrap();
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "https://myapp.example.com"
        );
    }

    #[test]
    fn date_validation_is_strict() {
        for valid in ["2024-01-15", "2025-12-31", "2020-02-29"] {
            assert!(validate_date(valid), "{valid} should be valid");
        }
        for invalid in [
            "",
            "2024",
            "01-15-2024",
            "2024/01/15",
            "abcd-ef-gh",
            "2024-13-01",
            "2024-01-32",
            "2024-1-5",
            "20240115",
        ] {
            assert!(!validate_date(invalid), "{invalid} should be invalid");
        }
    }

    #[test]
    fn limit_parsing_defaults_and_caps() {
        assert_eq!(parse_limit(None, 100), 100);
        assert_eq!(parse_limit(Some("50"), 100), 50);
        assert_eq!(parse_limit(Some("0"), 100), 100);
        assert_eq!(parse_limit(Some("-5"), 100), 100);
        assert_eq!(parse_limit(Some("abc"), 100), 100);
        assert_eq!(parse_limit(Some("2000"), 100), MAX_QUERY_LIMIT);
        assert_eq!(parse_limit(Some("1000"), 100), 1000);
        assert_eq!(parse_limit(Some("1"), 50), 1);
    }

    #[test]
    fn trade_mode_parsing() {
        assert_eq!(parse_trade_mode(None), Ok(None));
        assert_eq!(parse_trade_mode(Some("all")), Ok(None));
        assert_eq!(parse_trade_mode(Some("paper")), Ok(Some(true)));
        assert_eq!(parse_trade_mode(Some("live")), Ok(Some(false)));
        assert!(parse_trade_mode(Some("fake")).is_err());
    }
}
