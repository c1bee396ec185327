//! 上游调用错误类型
//!
//! 文本流式调用和图像生成调用共用同一套错误分类：
//! - `Transport`: 连接失败、超时、读取响应体失败
//! - `Status`: 非 2xx 且非 429 的响应
//! - `Throttled`: 429 限流信号
//! - `Decode`: 响应体无法解码（如 gzip 损坏）

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("429 Too Many Requests (retry_after={retry_after:?})")]
    Throttled { retry_after: Option<Duration> },

    #[error("decode error: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// 执行器是否应该重试此错误
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}

/// 安全截断字符串到指定字符数，避免 UTF-8 边界问题
pub fn safe_truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
