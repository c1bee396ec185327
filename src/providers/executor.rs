//! 限流执行器
//!
//! 单次上游请求的完整生命周期：等待时间槽 → 派发 → 分类响应 → 有界重试 → 解码响应体。
//! 多个连接并发调用时共享同一个 `BackoffController`。

use super::format_headers;
use crate::config::RateLimitSettings;
use crate::error::{safe_truncate, UpstreamError};
use crate::session::{extract_retry_after, BackoffController};
use bytes::Bytes;
use reqwest::header::CONTENT_ENCODING;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 两次尝试之间的固定等待，独立于自适应延迟
    pub retry_delay: Duration,
    /// 单次派发的超时上限
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(180),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RateLimitSettings, timeout: Duration) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            retry_delay: settings.retry_delay(),
            timeout,
        }
    }
}

pub struct RateLimitedExecutor {
    client: Client,
    api_key: String,
    backoff: Arc<BackoffController>,
    policy: RetryPolicy,
}

impl RateLimitedExecutor {
    /// 创建执行器
    ///
    /// 关闭 reqwest 的自动解压，响应体按 Content-Encoding 手动处理。
    pub fn new(
        api_key: impl Into<String>,
        backoff: Arc<BackoffController>,
        policy: RetryPolicy,
    ) -> Result<Self, UpstreamError> {
        let client = Client::builder().no_gzip().build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            backoff,
            policy,
        })
    }

    pub fn backoff(&self) -> &Arc<BackoffController> {
        &self.backoff
    }

    /// 执行请求，返回解码后的响应体
    ///
    /// 达到最大尝试次数后返回最后一次失败的错误；最后一次限流调整对后续调用保持生效。
    pub async fn execute<T>(&self, url: &str, body: &T) -> Result<Bytes, UpstreamError>
    where
        T: Serialize + ?Sized,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut retries_used: u32 = 0;

        loop {
            self.backoff.wait_for_slot().await;

            let err = match self.attempt(url, body).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            retries_used += 1;
            tracing::warn!(
                "[IMAGE] Error (Retry {}/{}): {}",
                retries_used,
                max_attempts,
                err
            );
            if retries_used >= max_attempts {
                tracing::error!("[IMAGE] Max retries reached.");
                return Err(err);
            }

            tracing::info!(
                "[IMAGE] Retrying in {:.2} seconds...",
                self.policy.retry_delay.as_secs_f64()
            );
            self.backoff.sleep(self.policy.retry_delay).await;
        }
    }

    async fn attempt<T>(&self, url: &str, body: &T) -> Result<Bytes, UpstreamError>
    where
        T: Serialize + ?Sized,
    {
        let resp = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept-Encoding", "gzip")
            .timeout(self.policy.timeout)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        tracing::info!("[IMAGE] API Status Code: {}", status);
        tracing::debug!("[IMAGE] API Headers: {}", format_headers(resp.headers()));

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = extract_retry_after(resp.headers());
            self.backoff.record_throttled(retry_after);
            return Err(UpstreamError::Throttled { retry_after });
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: safe_truncate(&body, 200).to_string(),
            });
        }

        self.backoff.record_success();

        let gzipped = resp
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"));
        let bytes = resp.bytes().await?;

        if gzipped {
            gunzip(&bytes)
        } else {
            Ok(bytes)
        }
    }
}

fn gunzip(data: &[u8]) -> Result<Bytes, UpstreamError> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| UpstreamError::Decode(format!("gzip: {e}")))?;
    Ok(Bytes::from(out))
}
