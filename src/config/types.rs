//! 配置类型定义

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub venice: VeniceConfig,
    pub rate_limit: RateLimitSettings,
    pub game: GameConfig,
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Venice 上游配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VeniceConfig {
    /// API 密钥（环境变量 VENICE_API_KEY 优先）
    pub api_key: String,
    pub text_endpoint: String,
    pub image_endpoint: String,
    pub text_model: String,
    pub temperature: f32,
    /// 单次上游调用的超时上限（秒）
    pub request_timeout_secs: u64,
}

impl Default for VeniceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            text_endpoint: "https://api.venice.ai/api/v1/chat/completions".to_string(),
            image_endpoint: "https://api.venice.ai/api/v1/image/generate".to_string(),
            text_model: "deepseek-r1-671b".to_string(),
            temperature: 0.6,
            request_timeout_secs: 180,
        }
    }
}

impl VeniceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// 图像接口限流与重试配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitSettings {
    /// 成功后重置到的基础派发间隔（毫秒）
    pub base_delay_ms: u64,
    /// 每次 429 叠加的间隔（毫秒）
    pub spacing_ms: u64,
    /// 两次重试之间的固定等待（毫秒）
    pub retry_delay_ms: u64,
    /// 单次调用的最大尝试次数
    pub max_attempts: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 10_000,
            spacing_ms: 5_000,
            retry_delay_ms: 5_000,
            max_attempts: 3,
        }
    }
}

impl RateLimitSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn spacing(&self) -> Duration {
        Duration::from_millis(self.spacing_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// 游戏资源配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GameConfig {
    pub instructions_path: PathBuf,
    pub initial_game_state_path: PathBuf,
    pub static_dir: PathBuf,
    pub index_path: PathBuf,
    /// 每个会话最多保留的对话轮次，未设置时不限制
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_history_turns: Option<usize>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            instructions_path: PathBuf::from("gameInstructions.txt"),
            initial_game_state_path: PathBuf::from("static/initialGameState.txt"),
            static_dir: PathBuf::from("static"),
            index_path: PathBuf::from("templates/index.html"),
            max_history_turns: None,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// 默认日志级别（RUST_LOG 优先）
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// 启动时加载一次的游戏文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameAssets {
    pub instructions: String,
    pub initial_game_state: String,
}
