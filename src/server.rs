//! HTTP surface of the gateway.
//!
//! | Route | Response |
//! |---|---|
//! | `GET /` | Landing page |
//! | `GET /favicon.ico` | `204` |
//! | `GET /status` | Cached keys and process facts as JSON |
//! | `GET /{mode}/{url}` | Rendered HTML, or `400 text/plain` on failure |

use std::time::Instant;

use axum::{
    extract::State,
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, HOST},
        HeaderMap, HeaderValue, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error};

use crate::coordinator::RequestCoordinator;
use crate::target::{parse_gateway_path, OutputMode, TargetParseError};
use crate::GatewayError;

const LANDING_PAGE: &str = include_str!("../assets/index.html");
const LONG_LIVED: &str = "public,max-age=31536000";
const HTML: &str = "text/html; charset=UTF-8";
const TEXT: &str = "text/plain; charset=UTF-8";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: RequestCoordinator,
    pub started: Instant,
}

impl AppState {
    pub fn new(coordinator: RequestCoordinator) -> Self {
        Self {
            coordinator,
            started: Instant::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(landing))
        .route("/favicon.ico", get(favicon))
        .route("/status", get(status))
        .route("/{*target}", get(render))
        .with_state(state)
}

async fn landing() -> Response {
    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, HeaderValue::from_static(HTML)),
            (CACHE_CONTROL, HeaderValue::from_static(LONG_LIVED)),
        ],
        LANDING_PAGE,
    )
        .into_response()
}

async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
struct StatusBody {
    pages: Vec<String>,
    process: ProcessInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessInfo {
    name: &'static str,
    version: &'static str,
    pid: u32,
    uptime_secs: u64,
    browser_running: bool,
    in_flight: usize,
}

async fn status(State(state): State<AppState>) -> Response {
    let body = StatusBody {
        pages: state.coordinator.cache().keys().await,
        process: ProcessInfo {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            pid: std::process::id(),
            uptime_secs: state.started.elapsed().as_secs(),
            browser_running: state.coordinator.browser().is_running(),
            in_flight: state.coordinator.in_flight(),
        },
    };
    match serde_json::to_string_pretty(&body) {
        Ok(json) => (
            StatusCode::OK,
            [(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            json,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to serialize status");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn render(State(state): State<AppState>, uri: Uri, headers: HeaderMap) -> Response {
    let request = match parse_gateway_path(uri.path(), uri.query()) {
        Ok(request) => request,
        Err(TargetParseError::MissingUrl) => {
            return plain(StatusCode::BAD_REQUEST, "Something is wrong. Missing URL.")
        }
        Err(err) => return failure(&GatewayError::from(err)),
    };
    if request.mode != OutputMode::Render {
        debug!(mode = request.mode.as_str(), "serving html for rasterized mode");
    }

    let host = headers.get(HOST).and_then(|value| value.to_str().ok());
    match state.coordinator.handle(&request.target, host).await {
        Ok(served) => html(served.content),
        Err(err) => failure(&err),
    }
}

fn html(content: Bytes) -> Response {
    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, HeaderValue::from_static(HTML)),
            (CACHE_CONTROL, HeaderValue::from_static(LONG_LIVED)),
        ],
        content,
    )
        .into_response()
}

fn plain(status: StatusCode, body: impl Into<String>) -> Response {
    (
        status,
        [(CONTENT_TYPE, HeaderValue::from_static(TEXT))],
        body.into(),
    )
        .into_response()
}

fn failure(err: &GatewayError) -> Response {
    let payload = err.to_payload();
    debug!(
        category = %payload.category,
        remediation = payload.remediation.as_deref().unwrap_or_default(),
        error = %err,
        "request failed"
    );
    plain(
        StatusCode::BAD_REQUEST,
        format!("Oops. Something is wrong.\n\n{err}"),
    )
}
