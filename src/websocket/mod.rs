//! WebSocket 会话模块
//!
//! - `frames`: 客户端与服务端的帧格式
//! - `relay`: 单连接的会话中继状态机

pub mod frames;
pub mod relay;

pub use frames::{ClientFrame, ServerFrame};
pub use relay::{ClientChannel, ClientGone, SessionRelay};

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};

/// axum WebSocket 适配为文本通道
pub struct WsChannel {
    socket: WebSocket,
    conn_id: String,
}

impl WsChannel {
    pub fn new(socket: WebSocket, conn_id: impl Into<String>) -> Self {
        Self {
            socket,
            conn_id: conn_id.into(),
        }
    }
}

#[async_trait]
impl ClientChannel for WsChannel {
    async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.socket.recv().await? {
                Ok(WsMessage::Text(text)) => return Some(text),
                Ok(WsMessage::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => return Some(text),
                    Err(_) => {
                        tracing::warn!(
                            "[WS] Connection {} sent non UTF-8 binary frame, ignored",
                            self.conn_id
                        );
                    }
                },
                Ok(WsMessage::Ping(data)) => {
                    if self.socket.send(WsMessage::Pong(data)).await.is_err() {
                        return None;
                    }
                }
                Ok(WsMessage::Pong(_)) => {
                    // 收到 pong，连接正常
                }
                Ok(WsMessage::Close(_)) => return None,
                Err(e) => {
                    tracing::error!("[WS] Connection {} error: {}", self.conn_id, e);
                    return None;
                }
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), ClientGone> {
        self.socket
            .send(WsMessage::Text(text))
            .await
            .map_err(|_| ClientGone)
    }
}
