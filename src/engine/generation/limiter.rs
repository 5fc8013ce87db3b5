// ==========================================
// 生成调用限流 - 令牌桶
// ==========================================
// 令牌按 1000 倍放大存储, 避免浮点
// 被限流时推迟下一次补充时间, 后续调用等待而不是失败
// ==========================================

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const SCALE: u64 = 1_000;

#[derive(Debug)]
struct BucketState {
    tokens: u64,
    last_refill: Instant,
    blocked_until: Option<Instant>,
}

#[derive(Debug)]
pub struct TokenBucket {
    per_minute: u64,
    burst: u64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// # 参数
    /// - per_minute: 每分钟补充的令牌数
    /// - burst: 桶容量
    pub fn new(per_minute: u32, burst: u32) -> Self {
        let burst = u64::from(burst.max(1));
        Self {
            per_minute: u64::from(per_minute.max(1)),
            burst,
            state: Mutex::new(BucketState {
                tokens: burst * SCALE,
                last_refill: Instant::now(),
                blocked_until: None,
            }),
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(state.last_refill).as_millis() as u64;
        if elapsed_ms > 0 {
            // per_minute 个令牌 / 60_000ms, 放大 1000 倍后即 elapsed_ms * per_minute / 60
            let added = elapsed_ms * self.per_minute / 60;
            state.tokens = (state.tokens + added).min(self.burst * SCALE);
            state.last_refill = now;
        }
    }

    /// 尝试取一个令牌
    ///
    /// # 返回
    /// - Ok(()): 取到
    /// - Err(wait): 需要等待的时长
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(until) = state.blocked_until {
            if now < until {
                return Err(until - now);
            }
            state.blocked_until = None;
            state.last_refill = now;
        }

        self.refill(&mut state, now);
        if state.tokens >= SCALE {
            state.tokens -= SCALE;
            return Ok(());
        }

        let missing = SCALE - state.tokens;
        let wait_ms = (missing * 60).div_ceil(self.per_minute).max(1);
        Err(Duration::from_millis(wait_ms))
    }

    /// 等待直到取到令牌
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => {
                    tracing::debug!(wait_ms = wait.as_millis() as u64, "令牌不足, 等待补充");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// 收到限流信号: 清空令牌, delay 内不再发放
    pub fn penalize(&self, delay: Duration) {
        let now = Instant::now();
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.tokens = 0;
        let until = now + delay;
        state.blocked_until = Some(match state.blocked_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    /// 当前可用令牌数 (含补充)
    pub fn available(&self) -> u64 {
        let now = Instant::now();
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if matches!(state.blocked_until, Some(until) if now < until) {
            return 0;
        }
        self.refill(&mut state, now);
        state.tokens / SCALE
    }
}
