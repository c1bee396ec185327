//! Venice Provider
//!
//! 文本接口：OpenAI 兼容的流式 Chat Completions，直接派发，不经过限流器。
//! 图像接口：固定参数的图像生成，经由 `RateLimitedExecutor` 派发。

use super::executor::{RateLimitedExecutor, RetryPolicy};
use super::{format_headers, ChatUpstream};
use crate::config::{RateLimitSettings, VeniceConfig};
use crate::error::{safe_truncate, UpstreamError};
use crate::models::{
    ChatCompletionRequest, ChatMessage, ImageGenerationRequest, VeniceImageRequest,
    VeniceParameters,
};
use crate::session::{BackoffController, TURN_SEPARATOR};
use crate::streaming::{decode_deltas, DeltaStream};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::sync::Arc;

pub struct VeniceProvider {
    config: VeniceConfig,
    client: Client,
    image_executor: RateLimitedExecutor,
}

impl VeniceProvider {
    pub fn new(
        config: VeniceConfig,
        rate_limit: &RateLimitSettings,
        backoff: Arc<BackoffController>,
    ) -> Result<Self, UpstreamError> {
        let policy = RetryPolicy::from_settings(rate_limit, config.request_timeout());
        let image_executor = RateLimitedExecutor::new(config.api_key.clone(), backoff, policy)?;
        let client = Client::builder().build()?;

        if config.api_key.is_empty() {
            tracing::warn!("[CONFIG] API 密钥未配置，上游调用将被拒绝");
        }

        Ok(Self {
            config,
            client,
            image_executor,
        })
    }

    pub fn backoff(&self) -> &Arc<BackoffController> {
        self.image_executor.backoff()
    }

    /// 生成图像，返回原始图像字节
    pub async fn generate_image(
        &self,
        request: &ImageGenerationRequest,
    ) -> Result<Bytes, UpstreamError> {
        let payload = VeniceImageRequest::from(request);
        if let Ok(json) = serde_json::to_string(&payload) {
            tracing::debug!("[IMAGE] Request Data: {}", json);
        }
        self.image_executor
            .execute(&self.config.image_endpoint, &payload)
            .await
    }
}

/// 构建流式文本请求：单条用户消息承载完整提示词，分隔符作为 stop 序列
pub fn build_chat_request(model: &str, temperature: f32, prompt: String) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::user(prompt)],
        temperature: Some(temperature),
        stop: vec![TURN_SEPARATOR.to_string()],
        stream: true,
        venice_parameters: Some(VeniceParameters {
            include_venice_system_prompt: false,
        }),
    }
}

#[async_trait]
impl ChatUpstream for VeniceProvider {
    fn build_request(&self, prompt: String) -> ChatCompletionRequest {
        build_chat_request(&self.config.text_model, self.config.temperature, prompt)
    }

    async fn stream_chat(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<DeltaStream, UpstreamError> {
        tracing::info!("[TEXT] Sending request...");
        let resp = self
            .client
            .post(&self.config.text_endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .timeout(self.config.request_timeout())
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        tracing::info!("[TEXT] API Status Code: {}", status);
        tracing::debug!("[TEXT] API Headers: {}", format_headers(resp.headers()));

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(
                "[TEXT] API Error: {}, {}...",
                status,
                safe_truncate(&body, 200)
            );
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: safe_truncate(&body, 200).to_string(),
            });
        }

        Ok(decode_deltas(resp.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::State;
    use axum::response::Response;
    use axum::routing::post;
    use axum::{Json, Router};
    use futures::StreamExt;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Captured {
        text_requests: Mutex<Vec<serde_json::Value>>,
        image_requests: Mutex<Vec<serde_json::Value>>,
    }

    async fn chat(
        State(captured): State<Arc<Captured>>,
        Json(body): Json<serde_json::Value>,
    ) -> Response {
        let prompt = body["messages"][0]["content"].as_str().unwrap_or("").to_string();
        captured.text_requests.lock().push(body);
        if prompt == "fail" {
            return Response::builder()
                .status(503)
                .body(Body::from("overloaded"))
                .unwrap();
        }

        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}")),
            Ok(Bytes::from_static(b"\n\ndata: {\"choices\":[{\"delta\":{\"con")),
            Ok(Bytes::from_static(b"tent\":\" there\"}}]}\n\ndata: [DONE]\n\n")),
        ];
        Response::builder()
            .status(200)
            .header("content-type", "text/event-stream")
            .body(Body::from_stream(futures::stream::iter(chunks)))
            .unwrap()
    }

    async fn image(
        State(captured): State<Arc<Captured>>,
        Json(body): Json<serde_json::Value>,
    ) -> Response {
        captured.image_requests.lock().push(body);
        Response::builder()
            .status(200)
            .body(Body::from(&b"PNGDATA"[..]))
            .unwrap()
    }

    async fn spawn_venice() -> (VeniceProvider, Arc<Captured>) {
        let captured = Arc::new(Captured::default());
        let app = Router::new()
            .route("/chat/completions", post(chat))
            .route("/image/generate", post(image))
            .with_state(captured.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = VeniceConfig {
            api_key: "k".to_string(),
            text_endpoint: format!("http://{addr}/chat/completions"),
            image_endpoint: format!("http://{addr}/image/generate"),
            ..VeniceConfig::default()
        };
        let settings = RateLimitSettings {
            base_delay_ms: 10,
            spacing_ms: 5,
            retry_delay_ms: 5,
            max_attempts: 3,
        };
        let backoff = Arc::new(BackoffController::new(
            Duration::from_millis(10),
            Duration::from_millis(5),
        ));
        let provider = VeniceProvider::new(config, &settings, backoff).unwrap();
        (provider, captured)
    }

    #[test]
    fn test_build_chat_request() {
        let request = build_chat_request("deepseek-r1-671b", 0.6, "prompt".to_string());
        assert_eq!(request.model, "deepseek-r1-671b");
        assert_eq!(request.messages, vec![ChatMessage::user("prompt")]);
        assert_eq!(request.temperature, Some(0.6));
        assert_eq!(request.stop, vec![TURN_SEPARATOR.to_string()]);
        assert!(request.stream);
        assert_eq!(
            request.venice_parameters,
            Some(VeniceParameters {
                include_venice_system_prompt: false
            })
        );
    }

    #[tokio::test]
    async fn test_stream_chat_reassembles_split_events() {
        let (provider, captured) = spawn_venice().await;
        let request = provider.build_request("hello".to_string());

        let stream = provider.stream_chat(&request).await.unwrap();
        let contents: Vec<String> = stream
            .map(|r| r.unwrap().content)
            .collect::<Vec<_>>()
            .await;

        assert_eq!(contents, vec!["Hi".to_string(), " there".to_string()]);
        let sent = captured.text_requests.lock()[0].clone();
        assert_eq!(sent["stream"], true);
        assert_eq!(sent["stop"][0], TURN_SEPARATOR);
    }

    #[tokio::test]
    async fn test_stream_chat_status_error() {
        let (provider, _captured) = spawn_venice().await;
        let request = provider.build_request("fail".to_string());

        let err = match provider.stream_chat(&request).await {
            Ok(_) => panic!("expected status error"),
            Err(e) => e,
        };
        assert!(matches!(err, UpstreamError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_generate_image_sends_fixed_payload() {
        let (provider, captured) = spawn_venice().await;
        let bytes = provider
            .generate_image(&ImageGenerationRequest {
                prompt: "a tower".to_string(),
                model: "flux-dev".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(&bytes[..], b"PNGDATA");
        let sent = captured.image_requests.lock()[0].clone();
        assert_eq!(sent["model"], "flux-dev");
        assert_eq!(sent["steps"], 30);
        assert_eq!(sent["return_binary"], true);
        assert!(provider.backoff().last_dispatch().is_some());
    }
}
