//! 会话通道帧格式
//!
//! 服务端帧为带固定前缀的文本；客户端帧默认按位置解释（先游戏状态、后用户消息），
//! 也可以发送带 `type` 标签的 JSON 帧显式声明含义。

use serde::Deserialize;

pub const PAYLOAD_PREFIX: &str = "JSON_PAYLOAD: ";
pub const DELTA_PREFIX: &str = "AI: ";
pub const ERROR_PREFIX: &str = "Error: ";
pub const COMPLETE_MARKER: &str = "MESSAGE_COMPLETE";

/// 服务端发往客户端的帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// 诊断帧：发往上游的完整请求体
    Payload(String),
    /// 增量内容
    Delta(String),
    /// 本轮结束
    Complete,
    /// 本轮失败
    Error(String),
}

impl std::fmt::Display for ServerFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Payload(json) => write!(f, "{PAYLOAD_PREFIX}{json}"),
            Self::Delta(content) => write!(f, "{DELTA_PREFIX}{content}"),
            Self::Complete => write!(f, "{DELTA_PREFIX}{COMPLETE_MARKER}"),
            Self::Error(message) => write!(f, "{ERROR_PREFIX}{message}"),
        }
    }
}

/// 带标签的客户端帧
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TaggedFrame {
    GameState {
        #[serde(deserialize_with = "text_or_json")]
        content: String,
    },
    Message {
        content: String,
    },
    Turn {
        #[serde(deserialize_with = "text_or_json")]
        game_state: String,
        message: String,
    },
}

/// 游戏状态可以是字符串，也可以直接内嵌 JSON 对象
fn text_or_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

/// 客户端帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// 未标注的文本，含义由当前状态决定
    Text(String),
    GameState(String),
    Message(String),
    Turn { game_state: String, message: String },
}

impl ClientFrame {
    pub fn parse(text: String) -> Self {
        if !text.trim_start().starts_with('{') {
            return Self::Text(text);
        }
        match serde_json::from_str::<TaggedFrame>(&text) {
            Ok(TaggedFrame::GameState { content }) => Self::GameState(content),
            Ok(TaggedFrame::Message { content }) => Self::Message(content),
            Ok(TaggedFrame::Turn {
                game_state,
                message,
            }) => Self::Turn {
                game_state,
                message,
            },
            Err(_) => Self::Text(text),
        }
    }
}
