//! SSE 事件流重组
//!
//! 网络分块与事件边界无关：一个分块可能包含多个事件，也可能在分隔符或 JSON 中间截断。
//! 未完整的尾部数据保留在缓冲区，等待下一个分块。

use crate::error::UpstreamError;
use crate::models::ChatCompletionChunk;
use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// 一次解码出的增量内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDelta {
    pub content: String,
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta, UpstreamError>> + Send>>;

/// 单个事件的解码结果
#[derive(Debug, PartialEq)]
enum EventOutcome {
    Delta(String),
    Skip,
    Malformed(String),
}

/// 增量式 SSE 重组器
#[derive(Debug, Default)]
pub struct SseReassembler {
    buffer: BytesMut,
    decode_errors: usize,
}

impl SseReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个网络分块，返回其中所有完整事件解码出的增量（保持顺序）
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamDelta> {
        self.buffer.extend_from_slice(chunk);

        let mut deltas = Vec::new();
        while let Some((event_len, delimiter_len)) = find_event_boundary(&self.buffer) {
            let event = self.buffer.split_to(event_len);
            self.buffer.advance(delimiter_len);

            match decode_event(&event) {
                EventOutcome::Delta(content) => deltas.push(StreamDelta { content }),
                EventOutcome::Skip => {}
                EventOutcome::Malformed(err) => {
                    self.decode_errors += 1;
                    tracing::warn!(
                        "[SSE] JSONDecodeError: {} (data: {})",
                        err,
                        String::from_utf8_lossy(&event[..event.len().min(100)])
                    );
                }
            }
        }
        deltas
    }

    /// 解码失败并被跳过的事件数
    pub fn decode_errors(&self) -> usize {
        self.decode_errors
    }

    /// 缓冲区中尚未组成完整事件的字节数
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// 流结束：丢弃残留数据，返回丢弃的字节数
    pub fn finish(&mut self) -> usize {
        let residual = self.buffer.len();
        self.buffer.clear();
        residual
    }
}

/// 查找第一个空行分隔符，返回 (事件长度, 分隔符长度)
fn find_event_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = find_subsequence(buf, b"\n\n").map(|i| (i, 2));
    let crlf = find_subsequence(buf, b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// 在字节数组中查找子序列
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn decode_event(raw: &[u8]) -> EventOutcome {
    let text = String::from_utf8_lossy(raw);

    let data_lines: Vec<&str> = text
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix("data:"))
        .map(str::trim)
        .collect();
    if data_lines.is_empty() {
        return EventOutcome::Skip;
    }

    let data = data_lines.join("\n");
    if data.is_empty() || data == "[DONE]" {
        return EventOutcome::Skip;
    }

    match serde_json::from_str::<ChatCompletionChunk>(&data) {
        Ok(chunk) => match chunk.first_content() {
            Some(content) => EventOutcome::Delta(content.to_string()),
            None => EventOutcome::Skip,
        },
        Err(e) => EventOutcome::Malformed(e.to_string()),
    }
}

/// 将上游字节流转换为增量内容流
///
/// 传输层错误产出一次 `Err` 后结束；正常结束时丢弃残留的不完整事件。
pub fn decode_deltas<S>(bytes: S) -> DeltaStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        let mut reassembler = SseReassembler::new();

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    tracing::trace!(
                        "[SSE] Raw chunk: {}...",
                        String::from_utf8_lossy(&chunk[..chunk.len().min(100)])
                    );
                    for delta in reassembler.push(&chunk) {
                        yield Ok(delta);
                    }
                }
                Err(e) => {
                    yield Err(UpstreamError::Transport(e));
                    return;
                }
            }
        }

        let residual = reassembler.finish();
        if residual > 0 {
            tracing::debug!("[SSE] Discarding {} trailing bytes", residual);
        }
        if reassembler.decode_errors() > 0 {
            tracing::info!("[SSE] Stream finished with {} decode errors", reassembler.decode_errors());
        }
    })
}
