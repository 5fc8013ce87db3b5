// ==========================================
// 连载生产流水线 - 时钟与参考时区换算
// ==========================================
// 所有日界 / 时段计算都经由参考时区, 与进程所在时区无关
// ==========================================

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Mutex;

/// 时钟抽象 (测试中替换为固定时钟)
pub trait PipelineClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl PipelineClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 可手动推进的固定时钟
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, delta: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += delta;
        }
    }
}

impl PipelineClock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// 参考时区下的日历日期
pub fn local_date(tz: &Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(tz).date_naive()
}

/// 参考时区下的本地时刻
pub fn local_time(tz: &Tz, now: DateTime<Utc>) -> NaiveTime {
    now.with_timezone(tz).time()
}

/// 本地时间 -> UTC
///
/// - 夏令时重叠: 取较早的时刻
/// - 夏令时空洞: 向后取第一个有效的本地时刻
pub fn resolve_local(tz: &Tz, local: NaiveDateTime) -> DateTime<Utc> {
    let mut candidate = local;
    // 空洞最长不超过数小时, 按分钟向后探测
    for _ in 0..(24 * 60) {
        if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
            return dt.with_timezone(&Utc);
        }
        candidate += Duration::minutes(1);
    }
    // 不可达: 任何时区都不会出现整天的空洞
    Utc.from_utc_datetime(&local)
}

/// 参考时区某日 [00:00, 次日 00:00) 对应的 UTC 区间
pub fn local_day_bounds(tz: &Tz, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = resolve_local(tz, date.and_time(NaiveTime::MIN));
    let next = date.succ_opt().unwrap_or(date);
    let end = resolve_local(tz, next.and_time(NaiveTime::MIN));
    (start, end)
}
