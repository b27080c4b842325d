//! HTTP surface of the gateway.
//!
//! | Method & Path | Handled by |
//! |---|---|
//! | `GET /health` | local session status |
//! | `GET /tools` | child `tools/list` |
//! | `GET /resources` | child `resources/list` |
//! | `GET /resource/{uri}` | child `resources/read` |
//! | `POST /query` | [`sql_guard`](crate::sql_guard), then child `tools/call` (`query`) |
//! | `POST /calculate` | [`calc`](crate::calc), never the child |
//!
//! Every response carries permissive CORS headers and any `OPTIONS` request
//! is answered with `204` before routing.

use std::any::Any;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::calc::{self, Calculation};
use crate::error::GatewayError;
use crate::session::{SessionHandle, SessionState};
use crate::sql_guard::{validate_select, QueryRejection};

/// Tool name the data-access server exposes for SQL.
const QUERY_TOOL: &str = "query";

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
}

/// `GET /health` body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub mcp_running: bool,
    pub ready: bool,
    pub state: SessionState,
    pub restarts: u64,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    sql: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalculateRequest {
    expression: Option<String>,
}

/// Build the gateway router.
pub fn router(session: SessionHandle) -> Router {
    let routes = Router::new()
        .route("/health", get(health))
        .route("/tools", get(list_tools))
        .route("/resources", get(list_resources))
        .route("/resource/{*uri}", get(read_resource))
        .route("/query", post(query))
        .route("/calculate", post(calculate))
        .fallback(not_found)
        .with_state(AppState { session });

    with_middleware(routes)
}

/// Panic boundary, CORS and request tracing, outermost last.
fn with_middleware(routes: Router) -> Router {
    routes
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn(cors))
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    session: SessionHandle,
    shutdown: F,
) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Gateway listening on http://{}", addr);
    }
    axum::serve(listener, router(session))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.session.status();
    let running = status.state == SessionState::Ready;
    Json(HealthResponse {
        status: "ok",
        mcp_running: running,
        ready: running,
        state: status.state,
        restarts: status.restarts,
        since: status.since,
    })
}

async fn list_tools(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    Ok(Json(state.session.call("tools/list", json!({})).await?))
}

async fn list_resources(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    Ok(Json(state.session.call("resources/list", json!({})).await?))
}

async fn read_resource(
    State(state): State<AppState>,
    Path(uri): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    Ok(Json(
        state
            .session
            .call("resources/read", json!({ "uri": uri }))
            .await?,
    ))
}

async fn query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<Value>, GatewayError> {
    let Json(body) = body.map_err(|e| GatewayError::BadRequest(e.body_text()))?;
    let sql = body.sql.ok_or(QueryRejection::Missing)?;

    let sql = validate_select(&sql).map_err(|rejection| {
        warn!(reason = %rejection, "Rejected query");
        rejection
    })?;

    let params = json!({
        "name": QUERY_TOOL,
        "arguments": { "sql": sql },
    });
    Ok(Json(state.session.call("tools/call", params).await?))
}

async fn calculate(
    body: Result<Json<CalculateRequest>, JsonRejection>,
) -> Result<Json<Calculation>, GatewayError> {
    let Json(body) = body.map_err(|e| GatewayError::BadRequest(e.body_text()))?;
    let expression = body
        .expression
        .ok_or_else(|| GatewayError::BadRequest("expression is required".to_string()))?;

    let calculation = calc::calculate(&expression).map_err(|e| {
        warn!(reason = %e, "Rejected expression");
        e
    })?;
    Ok(Json(calculation))
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response()
}

async fn cors(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors(response.headers_mut());
    response
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(detail, "Request handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error" })),
    )
        .into_response()
}
