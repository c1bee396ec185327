pub mod executor;
pub mod venice;

use crate::error::{safe_truncate, UpstreamError};
use crate::models::ChatCompletionRequest;
use crate::streaming::DeltaStream;
use async_trait::async_trait;

#[allow(unused_imports)]
pub use executor::{RateLimitedExecutor, RetryPolicy};
#[allow(unused_imports)]
pub use venice::{build_chat_request, VeniceProvider};

/// 流式文本上游
///
/// 会话中继只依赖此接口，测试中可替换为脚本化实现。
#[async_trait]
pub trait ChatUpstream: Send + Sync {
    /// 用完整提示词构建上游请求
    fn build_request(&self, prompt: String) -> ChatCompletionRequest;

    /// 发起流式调用，返回按顺序的增量内容流
    async fn stream_chat(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<DeltaStream, UpstreamError>;
}

/// 日志用：截断后的响应头
pub(crate) fn format_headers(headers: &reqwest::header::HeaderMap) -> String {
    let formatted = format!("{:?}", headers);
    safe_truncate(&formatted, 300).to_string()
}
