//! Questcast：游戏会话中继
//!
//! 将浏览器的 WebSocket 会话中继到 Venice 流式文本接口，
//! 并以限流与退避方式转发图像生成请求。

pub mod config;
pub mod error;
pub mod models;
pub mod providers;
pub mod server;
pub mod session;
pub mod streaming;
pub mod websocket;
