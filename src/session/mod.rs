//! 会话状态模块
//!
//! 提供以下功能：
//! - 每连接独占的只追加对话记录
//! - 模型输出中隐藏片段的清理
//! - 上游共享的自适应退避控制（Retry-After 解析、限流延迟调整）

mod rate_limit;
mod sanitize;
mod transcript;

pub use rate_limit::{
    extract_retry_after, parse_duration_string, BackoffController, Clock, TokioClock,
    DEFAULT_BASE_DELAY, DEFAULT_SPACING, MAX_RETRY_AFTER,
};
pub use sanitize::strip_hidden_spans;
pub use transcript::{Role, Transcript, Turn, TURN_SEPARATOR};
