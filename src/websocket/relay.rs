//! 会话中继
//!
//! 每个客户端连接对应一个 `SessionRelay`，在单个任务内依次完成：
//! 接收游戏状态与用户消息、构建提示词、派发流式调用、逐条转发增量、
//! 清洗回复并写入对话记录。连接断开时对话记录随之释放。

use super::frames::{ClientFrame, ServerFrame};
use crate::error::safe_truncate;
use crate::providers::ChatUpstream;
use crate::session::{strip_hidden_spans, Transcript};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;

/// 客户端已断开
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("client disconnected")]
pub struct ClientGone;

/// 客户端文本通道
#[async_trait]
pub trait ClientChannel: Send {
    /// 下一个文本帧；None 表示连接已关闭
    async fn recv_text(&mut self) -> Option<String>;

    async fn send_text(&mut self, text: String) -> Result<(), ClientGone>;
}

/// 中继状态
#[derive(Debug)]
enum RelayState {
    AwaitGameState,
    AwaitMessage { game_state: String },
    Dispatch { game_state: String, message: String },
    Closed,
}

pub struct SessionRelay<C> {
    conn_id: String,
    channel: C,
    upstream: Arc<dyn ChatUpstream>,
    instructions: Arc<str>,
    transcript: Transcript,
}

impl<C: ClientChannel> SessionRelay<C> {
    pub fn new(
        conn_id: impl Into<String>,
        channel: C,
        upstream: Arc<dyn ChatUpstream>,
        instructions: Arc<str>,
        max_history_turns: Option<usize>,
    ) -> Self {
        Self {
            conn_id: conn_id.into(),
            channel,
            upstream,
            instructions,
            transcript: Transcript::with_max_turns(max_history_turns),
        }
    }

    /// 运行直到客户端断开，返回最终的对话记录
    pub async fn run(mut self) -> Transcript {
        let mut state = RelayState::AwaitGameState;
        loop {
            state = match state {
                RelayState::AwaitGameState => self.await_game_state().await,
                RelayState::AwaitMessage { game_state } => self.await_message(game_state).await,
                RelayState::Dispatch {
                    game_state,
                    message,
                } => match self.run_round(&game_state, &message).await {
                    Ok(()) => RelayState::AwaitGameState,
                    Err(ClientGone) => RelayState::Closed,
                },
                RelayState::Closed => break,
            };
        }

        tracing::info!(
            "[RELAY] Session {} ended after {} turns",
            self.conn_id,
            self.transcript.len()
        );
        self.transcript
    }

    async fn await_game_state(&mut self) -> RelayState {
        let Some(text) = self.channel.recv_text().await else {
            return RelayState::Closed;
        };
        match ClientFrame::parse(text) {
            ClientFrame::Text(game_state) | ClientFrame::GameState(game_state) => {
                tracing::debug!(
                    "[RELAY] Received game state ({} chars)",
                    game_state.chars().count()
                );
                RelayState::AwaitMessage { game_state }
            }
            ClientFrame::Turn {
                game_state,
                message,
            } => RelayState::Dispatch {
                game_state,
                message,
            },
            ClientFrame::Message(_) => {
                tracing::warn!("[RELAY] Message frame received before game state");
                match self
                    .send(ServerFrame::Error("expected game state frame".to_string()))
                    .await
                {
                    Ok(()) => RelayState::AwaitGameState,
                    Err(ClientGone) => RelayState::Closed,
                }
            }
        }
    }

    async fn await_message(&mut self, game_state: String) -> RelayState {
        let Some(text) = self.channel.recv_text().await else {
            return RelayState::Closed;
        };
        match ClientFrame::parse(text) {
            ClientFrame::Text(message) | ClientFrame::Message(message) => RelayState::Dispatch {
                game_state,
                message,
            },
            ClientFrame::GameState(replacement) => RelayState::AwaitMessage {
                game_state: replacement,
            },
            ClientFrame::Turn {
                game_state,
                message,
            } => RelayState::Dispatch {
                game_state,
                message,
            },
        }
    }

    /// 单轮对话：失败只影响本轮，断开则终止中继
    async fn run_round(&mut self, game_state: &str, message: &str) -> Result<(), ClientGone> {
        self.transcript.push_user(message);
        let prompt = self.build_prompt(game_state);
        tracing::info!(
            "[RELAY] Full Prompt (first 200 chars): {}...",
            safe_truncate(&prompt, 200)
        );

        let request = self.upstream.build_request(prompt);
        let payload = serde_json::to_string(&request).unwrap_or_default();
        self.send(ServerFrame::Payload(payload)).await?;

        let mut stream = match self.upstream.stream_chat(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("[RELAY] Streaming call failed: {}", e);
                return self.send(ServerFrame::Error(e.to_string())).await;
            }
        };

        let mut full_response = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(delta) => {
                    full_response.push_str(&delta.content);
                    self.send(ServerFrame::Delta(delta.content)).await?;
                }
                Err(e) => {
                    tracing::error!("[RELAY] Stream interrupted: {}", e);
                    return self.send(ServerFrame::Error(e.to_string())).await;
                }
            }
        }

        self.send(ServerFrame::Complete).await?;
        let cleaned = strip_hidden_spans(&full_response);
        tracing::debug!(
            "[RELAY] Assistant turn: {} chars raw, {} chars kept",
            full_response.chars().count(),
            cleaned.chars().count()
        );
        self.transcript.push_assistant(cleaned);
        Ok(())
    }

    fn build_prompt(&self, game_state: &str) -> String {
        format!(
            "<SYSTEM_PROMPT>\n{}\n<gameState>{}</gameState>\n</SYSTEM_PROMPT>\n\n{}Assistant: ",
            self.instructions,
            game_state,
            self.transcript.render()
        )
    }

    async fn send(&mut self, frame: ServerFrame) -> Result<(), ClientGone> {
        let result = self.channel.send_text(frame.to_string()).await;
        if result.is_err() {
            tracing::info!("[RELAY] Client {} gone while sending", self.conn_id);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use crate::models::ChatCompletionRequest;
    use crate::providers::build_chat_request;
    use crate::streaming::{decode_deltas, DeltaStream, StreamDelta};
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    const SEP: &str = crate::session::TURN_SEPARATOR;

    /// 脚本化客户端：按顺序吐出帧，耗尽即视为断开
    struct ScriptedChannel {
        incoming: VecDeque<String>,
        sent: Arc<Mutex<Vec<String>>>,
        /// 成功发送这么多帧后开始失败
        fail_after: Option<usize>,
    }

    impl ScriptedChannel {
        fn new(frames: &[&str]) -> (Self, Arc<Mutex<Vec<String>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let channel = Self {
                incoming: frames.iter().map(|f| f.to_string()).collect(),
                sent: sent.clone(),
                fail_after: None,
            };
            (channel, sent)
        }
    }

    #[async_trait]
    impl ClientChannel for ScriptedChannel {
        async fn recv_text(&mut self) -> Option<String> {
            self.incoming.pop_front()
        }

        async fn send_text(&mut self, text: String) -> Result<(), ClientGone> {
            let mut sent = self.sent.lock();
            if self.fail_after.is_some_and(|n| sent.len() >= n) {
                return Err(ClientGone);
            }
            sent.push(text);
            Ok(())
        }
    }

    enum Round {
        /// 原始 SSE 分片，经真实的重组器解码
        Chunks(Vec<&'static str>),
        /// 派发即失败
        Reject(u16),
        /// 先给出若干增量，随后中断
        Interrupt(Vec<&'static str>),
    }

    struct ScriptedUpstream {
        rounds: Mutex<VecDeque<Round>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedUpstream {
        fn new(rounds: Vec<Round>) -> Arc<Self> {
            Arc::new(Self {
                rounds: Mutex::new(rounds.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().len()
        }
    }

    #[async_trait]
    impl ChatUpstream for ScriptedUpstream {
        fn build_request(&self, prompt: String) -> ChatCompletionRequest {
            build_chat_request("deepseek-r1-671b", 0.6, prompt)
        }

        async fn stream_chat(
            &self,
            request: &ChatCompletionRequest,
        ) -> Result<DeltaStream, UpstreamError> {
            self.prompts.lock().push(request.messages[0].content.clone());
            let round = self.rounds.lock().pop_front().expect("unexpected upstream call");
            match round {
                Round::Chunks(chunks) => {
                    let bytes: Vec<Result<Bytes, reqwest::Error>> = chunks
                        .into_iter()
                        .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                        .collect();
                    Ok(decode_deltas(futures::stream::iter(bytes)))
                }
                Round::Reject(status) => Err(UpstreamError::Status {
                    status,
                    body: "upstream unavailable".to_string(),
                }),
                Round::Interrupt(contents) => {
                    let mut items: Vec<Result<StreamDelta, UpstreamError>> = contents
                        .into_iter()
                        .map(|c| {
                            Ok(StreamDelta {
                                content: c.to_string(),
                            })
                        })
                        .collect();
                    items.push(Err(UpstreamError::Decode("connection reset".to_string())));
                    Ok(Box::pin(futures::stream::iter(items)))
                }
            }
        }
    }

    fn relay(
        channel: ScriptedChannel,
        upstream: Arc<ScriptedUpstream>,
    ) -> SessionRelay<ScriptedChannel> {
        SessionRelay::new("test-conn", channel, upstream, Arc::from("Narrate."), None)
    }

    fn hi_there() -> Round {
        Round::Chunks(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n",
            "\ndata: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n",
            "data: [DONE]\n\n",
        ])
    }

    #[tokio::test]
    async fn test_single_round_end_to_end() {
        let (channel, sent) = ScriptedChannel::new(&["{}", "Hello"]);
        let upstream = ScriptedUpstream::new(vec![hi_there()]);

        let transcript = relay(channel, upstream.clone()).run().await;

        let sent = sent.lock().clone();
        assert_eq!(sent.len(), 4);
        assert!(sent[0].starts_with("JSON_PAYLOAD: "));
        assert_eq!(&sent[1..], ["AI: Hi", "AI:  there", "AI: MESSAGE_COMPLETE"]);
        assert_eq!(
            transcript.render(),
            format!("User: Hello{SEP}Assistant: Hi there{SEP}")
        );

        let prompts = upstream.prompts.lock().clone();
        assert_eq!(
            prompts[0],
            format!(
                "<SYSTEM_PROMPT>\nNarrate.\n<gameState>{{}}</gameState>\n</SYSTEM_PROMPT>\n\nUser: Hello{SEP}Assistant: "
            )
        );
    }

    #[tokio::test]
    async fn test_payload_frame_carries_request() {
        let (channel, sent) = ScriptedChannel::new(&["{}", "Hello"]);
        let upstream = ScriptedUpstream::new(vec![hi_there()]);
        relay(channel, upstream).run().await;

        let sent = sent.lock().clone();
        let json = sent[0].strip_prefix("JSON_PAYLOAD: ").unwrap();
        let payload: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(payload["model"], "deepseek-r1-671b");
        assert_eq!(payload["stream"], true);
        assert_eq!(payload["stop"][0], SEP);
        assert_eq!(
            payload["venice_parameters"]["include_venice_system_prompt"],
            false
        );
    }

    #[tokio::test]
    async fn test_hidden_spans_forwarded_but_not_remembered() {
        let (channel, sent) = ScriptedChannel::new(&["{}", "Look", "{}", "Again"]);
        let upstream = ScriptedUpstream::new(vec![
            Round::Chunks(vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"<think>plan</think>\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"A door.\"}}]}\n\n",
            ]),
            hi_there(),
        ]);

        let transcript = relay(channel, upstream.clone()).run().await;

        assert!(sent
            .lock()
            .iter()
            .any(|f| f == "AI: <think>plan</think>"));
        assert_eq!(
            transcript.render(),
            format!("User: Look{SEP}Assistant: A door.{SEP}User: Again{SEP}Assistant: Hi there{SEP}")
        );
        let prompts = upstream.prompts.lock().clone();
        assert!(prompts[1].ends_with(&format!(
            "User: Look{SEP}Assistant: A door.{SEP}User: Again{SEP}Assistant: "
        )));
    }

    #[tokio::test]
    async fn test_dispatch_failure_keeps_user_turn() {
        let (channel, sent) = ScriptedChannel::new(&["{}", "Hello", "{}", "Retry"]);
        let upstream = ScriptedUpstream::new(vec![Round::Reject(503), hi_there()]);

        let transcript = relay(channel, upstream.clone()).run().await;

        let sent = sent.lock().clone();
        assert!(sent[0].starts_with("JSON_PAYLOAD: "));
        assert!(sent[1].starts_with("Error: "));
        assert!(sent[1].contains("503"));
        assert!(sent[2].starts_with("JSON_PAYLOAD: "));
        assert_eq!(sent.last().unwrap(), "AI: MESSAGE_COMPLETE");
        assert_eq!(upstream.calls(), 2);
        assert_eq!(
            transcript.render(),
            format!("User: Hello{SEP}User: Retry{SEP}Assistant: Hi there{SEP}")
        );
    }

    #[tokio::test]
    async fn test_mid_stream_failure() {
        let (channel, sent) = ScriptedChannel::new(&["{}", "Hello"]);
        let upstream = ScriptedUpstream::new(vec![Round::Interrupt(vec!["Par", "tial"])]);

        let transcript = relay(channel, upstream).run().await;

        let sent = sent.lock().clone();
        assert_eq!(sent.len(), 4);
        assert_eq!(&sent[1..3], ["AI: Par", "AI: tial"]);
        assert!(sent[3].starts_with("Error: "));
        assert!(!sent.iter().any(|f| f == "AI: MESSAGE_COMPLETE"));
        assert_eq!(transcript.render(), format!("User: Hello{SEP}"));
    }

    #[tokio::test]
    async fn test_disconnect_after_game_state() {
        let (channel, sent) = ScriptedChannel::new(&["{}"]);
        let upstream = ScriptedUpstream::new(vec![]);

        let transcript = relay(channel, upstream.clone()).run().await;

        assert!(sent.lock().is_empty());
        assert_eq!(upstream.calls(), 0);
        assert!(transcript.is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_stops_relay() {
        let (mut channel, sent) = ScriptedChannel::new(&["{}", "Hello", "{}", "Again"]);
        channel.fail_after = Some(2);
        let upstream = ScriptedUpstream::new(vec![hi_there(), hi_there()]);

        let transcript = relay(channel, upstream.clone()).run().await;

        assert_eq!(sent.lock().len(), 2);
        assert_eq!(upstream.calls(), 1);
        assert_eq!(transcript.render(), format!("User: Hello{SEP}"));
    }

    #[tokio::test]
    async fn test_message_before_game_state_is_rejected() {
        let (channel, sent) = ScriptedChannel::new(&[
            r#"{"type":"message","content":"too early"}"#,
            r#"{"type":"game_state","content":"{\"room\":1}"}"#,
            r#"{"type":"game_state","content":"{\"room\":2}"}"#,
            r#"{"type":"message","content":"Hello"}"#,
        ]);
        let upstream = ScriptedUpstream::new(vec![hi_there()]);

        let transcript = relay(channel, upstream.clone()).run().await;

        let sent = sent.lock().clone();
        assert_eq!(sent[0], "Error: expected game state frame");
        assert_eq!(upstream.calls(), 1);
        let prompt = upstream.prompts.lock()[0].clone();
        assert!(prompt.contains("<gameState>{\"room\":2}</gameState>"));
        assert_eq!(
            transcript.render(),
            format!("User: Hello{SEP}Assistant: Hi there{SEP}")
        );
    }

    #[tokio::test]
    async fn test_turn_frame_dispatches_immediately() {
        let (channel, sent) = ScriptedChannel::new(&[
            r#"{"type":"turn","game_state":{"hp":3},"message":"Attack"}"#,
        ]);
        let upstream = ScriptedUpstream::new(vec![hi_there()]);

        relay(channel, upstream.clone()).run().await;

        assert_eq!(sent.lock().last().unwrap(), "AI: MESSAGE_COMPLETE");
        let prompt = upstream.prompts.lock()[0].clone();
        assert!(prompt.contains("<gameState>{\"hp\":3}</gameState>"));
        assert!(prompt.ends_with(&format!("User: Attack{SEP}Assistant: ")));
    }

    #[tokio::test]
    async fn test_history_bound_evicts_oldest_turns() {
        let (channel, _sent) = ScriptedChannel::new(&["{}", "One", "{}", "Two"]);
        let upstream = ScriptedUpstream::new(vec![hi_there(), hi_there()]);

        let transcript =
            SessionRelay::new("bounded", channel, upstream, Arc::from("Narrate."), Some(2))
                .run()
                .await;

        assert_eq!(
            transcript.render(),
            format!("User: Two{SEP}Assistant: Hi there{SEP}")
        );
    }
}
