//! 自适应限流控制模块
//!
//! 提供以下功能：
//! - 单一上游资源的全局退避状态（基础延迟 + 上次成功派发时间）
//! - 429 限流信号驱动的延迟调整
//! - Retry-After 头解析（秒数或 "1.5s"、"1h16m0.667s" 形式的 Duration 字符串）
//! - 可注入时钟，便于确定性测试

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// 默认基础延迟（成功后重置到此值）
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(10);

/// 每次限流叠加的固定间隔
pub const DEFAULT_SPACING: Duration = Duration::from_secs(5);

/// Retry-After 的上限，超出按此值处理
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// 时钟抽象
///
/// 生产环境使用 tokio 时钟；测试中可替换为手动推进的时钟。
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// 基于 tokio 的时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 退避状态
#[derive(Debug, Clone, Copy)]
struct BackoffState {
    /// 当前生效的最小派发间隔
    baseline_delay: Duration,
    /// 上次成功派发的时间
    last_dispatch: Option<Instant>,
}

/// 退避控制器
///
/// 一个实例对应一个受限流约束的上游资源，在所有连接间共享。
/// 所有读写都在同一把锁内完成，锁不会跨越 `.await` 持有。
pub struct BackoffController {
    state: Mutex<BackoffState>,
    base_delay: Duration,
    spacing: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for BackoffController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffController")
            .field("state", &*self.state.lock())
            .field("base_delay", &self.base_delay)
            .field("spacing", &self.spacing)
            .finish()
    }
}

impl Default for BackoffController {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_SPACING)
    }
}

impl BackoffController {
    /// 使用 tokio 时钟创建控制器
    pub fn new(base_delay: Duration, spacing: Duration) -> Self {
        Self::with_clock(base_delay, spacing, Arc::new(TokioClock))
    }

    pub fn with_clock(base_delay: Duration, spacing: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(BackoffState {
                baseline_delay: base_delay,
                last_dispatch: None,
            }),
            base_delay,
            spacing,
            clock,
        }
    }

    /// 当前基础延迟
    pub fn baseline_delay(&self) -> Duration {
        self.state.lock().baseline_delay
    }

    pub fn last_dispatch(&self) -> Option<Instant> {
        self.state.lock().last_dispatch
    }

    /// 距离下一个可用时间槽还需等待的时间
    pub fn remaining_wait(&self) -> Duration {
        let state = *self.state.lock();
        match state.last_dispatch {
            Some(last) => {
                let elapsed = self.clock.now().saturating_duration_since(last);
                state.baseline_delay.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        }
    }

    /// 等待可用时间槽
    ///
    /// 每次睡醒后重新检查：等待期间其他调用者触发的限流会延长本次等待。
    pub async fn wait_for_slot(&self) {
        loop {
            let wait = self.remaining_wait();
            if wait.is_zero() {
                return;
            }
            tracing::info!("[BACKOFF] Waiting {:.2} seconds...", wait.as_secs_f64());
            self.clock.sleep(wait).await;
        }
    }

    /// 成功派发：记录时间并重置基础延迟
    pub fn record_success(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.last_dispatch = Some(now);
        state.baseline_delay = self.base_delay;
    }

    /// 收到限流信号：调整基础延迟，不影响 last_dispatch
    pub fn record_throttled(&self, retry_after: Option<Duration>) -> Duration {
        let mut state = self.state.lock();
        state.baseline_delay = match retry_after {
            Some(retry) => retry.saturating_add(self.spacing),
            None => state.baseline_delay.saturating_add(self.spacing),
        };
        tracing::warn!(
            retry_after = ?retry_after,
            baseline_delay = ?state.baseline_delay,
            "[BACKOFF] 上游限流，调整派发间隔"
        );
        state.baseline_delay
    }

    /// 通过控制器的时钟睡眠（重试间隔同样走可注入时钟）
    pub async fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration).await;
    }
}

/// 解析 Duration 字符串
///
/// 支持格式：
/// - "1.5s" -> 1.5 秒
/// - "1h16m0.667s" -> 1 小时 16 分钟 0.667 秒
/// - "30m" -> 30 分钟
/// - "500ms" -> 500 毫秒
/// - "12" -> 12 秒（无单位默认为秒）
pub fn parse_duration_string(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_millis: u64 = 0;
    let mut current_num = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            current_num.push(c);
            continue;
        }
        if current_num.is_empty() {
            return None;
        }

        let num: f64 = current_num.parse().ok()?;
        current_num.clear();

        match c {
            'h' => total_millis = total_millis.saturating_add((num * 3_600_000.0) as u64),
            'm' => {
                // 检查是否是 "ms"
                if chars.peek() == Some(&'s') {
                    chars.next();
                    total_millis = total_millis.saturating_add(num as u64);
                } else {
                    total_millis = total_millis.saturating_add((num * 60_000.0) as u64);
                }
            }
            's' => total_millis = total_millis.saturating_add((num * 1000.0) as u64),
            _ => return None,
        }
    }

    if !current_num.is_empty() {
        let num: f64 = current_num.parse().ok()?;
        total_millis = total_millis.saturating_add((num * 1000.0) as u64);
    }

    if total_millis > 0 {
        Some(Duration::from_millis(total_millis))
    } else {
        None
    }
}

/// 从 429 响应头中提取重试延迟
///
/// 先按整数秒解析，再按 Duration 字符串解析；HTTP 日期格式视为缺失。
/// 结果不超过 `MAX_RETRY_AFTER`。
pub fn extract_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())?
        .trim();

    let parsed = match raw.parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => parse_duration_string(raw),
    };
    match parsed {
        Some(delay) if delay > MAX_RETRY_AFTER => {
            tracing::warn!(
                "[BACKOFF] Retry-After {} exceeds cap, using {:?}",
                raw,
                MAX_RETRY_AFTER
            );
            Some(MAX_RETRY_AFTER)
        }
        Some(delay) => Some(delay),
        None => {
            tracing::warn!("[BACKOFF] Could not parse Retry-After: {}", raw);
            None
        }
    }
}
