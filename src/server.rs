use crate::{
    config::Config,
    errors::{into_response, AppError},
    mcp::{
        registry::{CallRequest, CallResponse, ToolRegistry},
        types::{Capabilities, ErrorObj, ToolInfo},
    },
    security,
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::{sync::Arc, time::Instant};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub registry: Arc<ToolRegistry>,
    pub rls: security::RateLimiters,
}

pub type StreamBody = axum::body::Body;

impl AppState {
    pub fn new(cfg: Config, registry: ToolRegistry) -> Self {
        let rate = &cfg.limits.rate;
        let rls = security::RateLimiters::new(rate.global_per_s, rate.global_burst, rate.per_tool_per_s, rate.per_tool_burst);
        Self { cfg: Arc::new(cfg), registry: Arc::new(registry), rls }
    }
}

pub async fn serve(cfg: Config, registry: ToolRegistry) -> anyhow::Result<()> {
    let shared = AppState::new(cfg, registry);
    let addr: std::net::SocketAddr = format!("{}:{}", shared.cfg.server.bind_addr, shared.cfg.server.port).parse()?;
    let app = build_router(shared);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(shared: AppState) -> Router {
    let base = shared.cfg.server.base_path.clone();
    let limit_bytes = shared.cfg.limits.max_request_kb * 1024;
    Router::new()
        .route("/healthz", get(health))
        .route(&format!("{base}/capabilities"), get(capabilities))
        .route(&format!("{base}/call"), post(call).layer(RequestBodyLimitLayer::new(limit_bytes)))
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status":"ok"})))
}

async fn capabilities(State(state): State<AppState>) -> Response {
    let tools: Vec<ToolInfo> = state
        .registry
        .list_names()
        .into_iter()
        .filter_map(|n| {
            let caps = state.registry.get(&n)?.capabilities();
            Some(ToolInfo { name: n, input_schema: caps["input"].clone(), output_schema: caps["output"].clone() })
        })
        .collect();
    let caps = Capabilities { mcp_version: "1.0", tools, streaming: true };
    (StatusCode::OK, Json(caps)).into_response()
}

async fn call(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<CallRequest>) -> Response {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let elapsed = || started.elapsed().as_millis() as u64;

    if let Err(e) = security::content_length_ok(&headers, state.cfg.limits.max_request_kb)
        .and_then(|()| state.rls.check(&req.tool))
    {
        audit_end(&request_id, &req.tool, "deny", e.code(), elapsed(), 0, None);
        return into_response(e).into_response();
    }

    let Some(tool) = state.registry.get(&req.tool) else {
        let e = AppError::NotFound;
        audit_end(&request_id, &req.tool, "deny", e.code(), elapsed(), 0, None);
        return into_response(e).into_response();
    };

    if req.stream {
        return match tool.call_stream(req.params).await {
            Ok(body) => {
                audit_end(&request_id, &req.tool, "allow", "OK", elapsed(), 0, Some(true));
                (StatusCode::OK, [(axum::http::header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
            }
            Err(e) => {
                audit_end(&request_id, &req.tool, "error", e.code(), elapsed(), 0, Some(true));
                into_response(e).into_response()
            }
        };
    }

    let (status, payload, decision, code) = match tool.call(req.params).await {
        Ok(result) => (StatusCode::OK, CallResponse { id: req.id, result: Some(result), error: None }, "allow", "OK"),
        Err(e) => (
            e.status(),
            CallResponse { id: req.id, result: None, error: Some(ErrorObj::from(&e)) },
            "error",
            e.code(),
        ),
    };
    let bytes_out = serde_json::to_vec(&payload).map(|v| v.len()).unwrap_or(0) as u64;
    audit_end(&request_id, &req.tool, decision, code, elapsed(), bytes_out, Some(false));
    (status, Json(payload)).into_response()
}

fn audit_end(
    request_id: &str,
    tool: &str,
    decision: &str,
    code: &str,
    duration_ms: u64,
    bytes_out: u64,
    streaming: Option<bool>,
) {
    tracing::info!(
        request_id = request_id,
        tool = tool,
        decision = decision,
        code = code,
        duration_ms = duration_ms,
        bytes_out = bytes_out,
        streaming = ?streaming,
        "audit"
    );
}
