//! HTTP / WebSocket 服务器
//!
//! 路由：
//! - `GET /` 首页模板
//! - `/static/*` 静态资源
//! - `GET /initial_game_state` 启动时加载的初始游戏状态
//! - `GET /health` 健康检查
//! - `POST /generate_image` 图像生成
//! - `GET /ws` 游戏会话
use crate::config::{Config, GameAssets};
use crate::error::{safe_truncate, UpstreamError};
use crate::models::{ErrorDetail, ImageGenerationRequest, ImageGenerationResponse};
use crate::providers::{ChatUpstream, VeniceProvider};
use crate::session::BackoffController;
use crate::websocket::{SessionRelay, WsChannel};
use axum::{
    extract::{ws::WebSocket, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{prelude::BASE64_STANDARD, Engine};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub instructions: Arc<str>,
    pub initial_game_state: Arc<str>,
    pub venice: Arc<VeniceProvider>,
}

impl AppState {
    /// 构建共享状态，所有连接共用同一个退避控制器
    pub fn new(config: Config, assets: GameAssets) -> Result<Self, UpstreamError> {
        let backoff = Arc::new(BackoffController::new(
            config.rate_limit.base_delay(),
            config.rate_limit.spacing(),
        ));
        let venice = VeniceProvider::new(config.venice.clone(), &config.rate_limit, backoff)?;

        Ok(Self {
            config: Arc::new(config),
            instructions: Arc::from(assets.instructions),
            initial_game_state: Arc::from(assets.initial_game_state),
            venice: Arc::new(venice),
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let game = &state.config.game;
    let index = ServeFile::new(&game.index_path);
    let static_files = ServeDir::new(&game.static_dir);

    Router::new()
        .route_service("/", index)
        .nest_service("/static", static_files)
        .route("/health", get(health))
        .route("/initial_game_state", get(initial_game_state))
        .route("/generate_image", post(generate_image))
        .route("/ws", get(ws_upgrade_handler))
        .with_state(state)
}

pub async fn run_server(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let host = state.config.server.host.clone();
    let port = state.config.server.port;
    let app = build_router(state);

    let addr: std::net::SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("[SERVER] Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("[SERVER] Stopped");
    Ok(())
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    version: String,
}

async fn health() -> impl IntoResponse {
    Json(HealthStatus {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn initial_game_state(State(state): State<AppState>) -> impl IntoResponse {
    state.initial_game_state.to_string()
}

async fn generate_image(
    State(state): State<AppState>,
    Json(request): Json<ImageGenerationRequest>,
) -> Response {
    tracing::info!("[IMAGE] Using model: {}", request.model);

    match state.venice.generate_image(&request).await {
        Ok(bytes) => {
            let image_data = BASE64_STANDARD.encode(&bytes);
            tracing::info!(
                "[IMAGE] Base64 Image Data (first 50 chars): {}...",
                safe_truncate(&image_data, 50)
            );
            Json(ImageGenerationResponse { image_data }).into_response()
        }
        Err(e) => {
            tracing::error!("[IMAGE] Generation failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorDetail {
                    detail: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn ws_upgrade_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let client_info = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    ws.on_upgrade(move |socket| handle_websocket(socket, state, client_info))
}

/// 每个连接一个任务，对话记录随任务结束释放
async fn handle_websocket(socket: WebSocket, state: AppState, client_info: Option<String>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let short_id = conn_id[..8].to_string();

    tracing::info!(
        "[WS] New connection: {} (client: {:?})",
        short_id,
        client_info
    );

    let upstream: Arc<dyn ChatUpstream> = state.venice.clone();
    let relay = SessionRelay::new(
        short_id.clone(),
        WsChannel::new(socket, short_id.clone()),
        upstream,
        state.instructions.clone(),
        state.config.game.max_history_turns,
    );
    let transcript = relay.run().await;

    tracing::info!(
        "[WS] Connection closed: {} ({} turns dropped)",
        short_id,
        transcript.len()
    );
}
