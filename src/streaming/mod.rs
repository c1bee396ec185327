//! 上游流式响应处理
//!
//! 将 Chat Completions 的 SSE 字节流重组为按顺序的增量内容。

mod sse;

pub use sse::{decode_deltas, DeltaStream, SseReassembler, StreamDelta};
