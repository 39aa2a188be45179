//! HTTP 接口（feature = "web"）
//!
//! - POST /api/chat：跑完整个会话，返回 JSON 回复
//! - POST /api/chat/stream：NDJSON 流，每行一个会话事件（message_chunk / tool_call / tool_result / done / error）
//! - GET /api/tools?groups=a,b：列出工具组合并后的工具
//! - GET /health
//!
//! 流式响应体被丢弃（客户端断开）时取消会话，会话任务随后释放工具池。

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::stream;
use serde_json::json;
use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::core::{HiveError, ShutdownManager};
use crate::dispatch::{ChatReply, ChatRequest, Dispatcher};
use crate::stream::NdjsonSink;
use crate::tools::ToolSpec;

/// 流式通道容量（行）
const STREAM_BUFFER: usize = 64;

#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
    shutdown: ShutdownManager,
}

/// 错误响应：{"error": {"kind", "message"}}，状态码取自错误分类
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl From<HiveError> for ApiError {
    fn from(e: HiveError) -> Self {
        Self {
            status: StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "input",
            message: e.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": { "kind": self.kind, "message": self.message } }));
        (self.status, body).into_response()
    }
}

pub fn router(dispatcher: Arc<Dispatcher>, shutdown: ShutdownManager) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tools", get(api_tools))
        .route("/api/chat", post(api_chat))
        .route("/api/chat/stream", post(api_chat_stream))
        .with_state(AppState { dispatcher, shutdown })
}

/// 启动 HTTP 服务，直到收到 Ctrl+C / SIGTERM
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let bind = config.server.bind.clone();
    let dispatcher = Arc::new(Dispatcher::from_config(config)?);
    let shutdown = ShutdownManager::new();
    shutdown.install_signal_handlers();

    let app = router(dispatcher, shutdown.clone());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("hive listening on http://{}", bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn api_tools(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<ToolSpec>>, ApiError> {
    let groups: Vec<String> = match params.get("groups") {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(String::from)
            .collect(),
        None => state.dispatcher.config().session.default_groups.clone(),
    };
    Ok(Json(state.dispatcher.list_tools(&groups).await?))
}

async fn api_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(req) = payload?;
    // 非流式请求在服务端跑完，客户端断开时 handler future 被丢弃，Session 的 Drop 负责释放
    let reply = state.dispatcher.chat(req, state.shutdown.session_token()).await?;
    Ok(Json(reply))
}

async fn api_chat_stream(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let cancel = state.shutdown.session_token();
    // 会话创建前的错误（输入、工具组启动）以普通错误响应返回
    let session = state.dispatcher.open(req, cancel.clone()).await?;
    let session_id = session.id().to_string();

    let (tx, rx) = mpsc::channel::<String>(STREAM_BUFFER);
    let dispatcher = Arc::clone(&state.dispatcher);
    tokio::spawn(async move {
        let mut sink = NdjsonSink::new(tx);
        let report = dispatcher.run(session, &mut sink).await;
        if let Err(e) = &report.outcome {
            tracing::debug!(session_id = %report.session_id, error = %e, "stream session ended with error");
        }
    });

    let guard = cancel.drop_guard();
    let body = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv()
            .await
            .map(|line| (Ok::<Bytes, Infallible>(Bytes::from(line)), (rx, guard)))
    });

    let mut res = Response::new(Body::from_stream(body));
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson; charset=utf-8"),
    );
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        res.headers_mut().insert("x-session-id", value);
    }
    Ok(res)
}
