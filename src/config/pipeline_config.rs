// ==========================================
// 连载生产流水线 - 流水线运行配置
// ==========================================
// 职责: 从 config_kv 装载强类型配置并在启动时校验
// 红线: 配置错误在启动时失败, 不在 tick 中静默降级
// ==========================================

use crate::config::config_manager::{config_keys, ConfigManager};
use crate::config::error::{ConfigError, ConfigResult};
use crate::domain::quality::QualityThresholds;
use crate::domain::types::PublishSlot;
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 默认参考时区
pub const DEFAULT_REFERENCE_TIMEZONE: &str = "Asia/Shanghai";

// ==========================================
// SlotWindow - 单个发布时段 (参考时区本地时间)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotWindow {
    pub slot: PublishSlot,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub capacity: u32,
}

impl SlotWindow {
    pub fn new(slot: PublishSlot, start: NaiveTime, end: NaiveTime, capacity: u32) -> Self {
        Self {
            slot,
            start,
            end,
            capacity,
        }
    }

    /// 窗口时长 (分钟)
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// 本地时间是否落在窗口内 [start, end)
    pub fn contains(&self, time: NaiveTime) -> bool {
        time >= self.start && time < self.end
    }
}

/// publish_slots 的 JSON 形态
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawSlotWindow {
    slot: PublishSlot,
    start: String,
    end: String,
    capacity: u32,
}

fn parse_clock(key: &str, raw: &str) -> ConfigResult<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            message: e.to_string(),
        })
}

fn default_slots() -> Vec<SlotWindow> {
    let at = |h: u32| NaiveTime::from_hms_opt(h, 0, 0).unwrap_or(NaiveTime::MIN);
    vec![
        SlotWindow::new(PublishSlot::Morning, at(8), at(10), 1),
        SlotWindow::new(PublishSlot::Afternoon, at(12), at(14), 1),
        SlotWindow::new(PublishSlot::Evening, at(19), at(22), 1),
    ]
}

// ==========================================
// PipelineConfig
// ==========================================
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // ===== 容量 =====
    pub max_active_productions: usize,
    pub default_chapters_per_day: i32,
    /// 不设上限的作品用于计算进度的名义总章数
    pub default_planned_length: i32,

    // ===== 发布 =====
    pub publish_slots: Vec<SlotWindow>,
    pub reference_timezone: Tz,
    pub max_publish_retries: i32,

    // ===== 质检 / 修复 =====
    pub quality_thresholds: QualityThresholds,
    pub extended_quality: bool,
    pub recent_chapter_window: usize,
    pub max_repair_attempts: u32,
    pub repair_target_score: f64,
    pub repair_min_improvement: f64,

    // ===== 错误处理 =====
    pub pause_after_errors: i32,
    pub error_retention_days: i64,
    pub stale_job_minutes: i64,
    pub max_job_attempts: i32,

    // ===== 执行 / 生成 =====
    pub worker_count: usize,
    pub generation_timeout_secs: u64,
    pub generation_max_retries: u32,
    pub rate_limit_per_minute: u32,
    pub rate_limit_burst: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_active_productions: 10,
            default_chapters_per_day: 3,
            default_planned_length: 300,
            publish_slots: default_slots(),
            reference_timezone: chrono_tz::Asia::Shanghai,
            max_publish_retries: 3,
            quality_thresholds: QualityThresholds::default(),
            extended_quality: false,
            recent_chapter_window: 10,
            max_repair_attempts: 3,
            repair_target_score: 75.0,
            repair_min_improvement: 5.0,
            pause_after_errors: 3,
            error_retention_days: 7,
            stale_job_minutes: 30,
            max_job_attempts: 3,
            worker_count: 4,
            generation_timeout_secs: 120,
            generation_max_retries: 3,
            rate_limit_per_minute: 30,
            rate_limit_burst: 5,
        }
    }
}

impl PipelineConfig {
    /// 从 config_kv 装载并校验
    pub fn load(cm: &ConfigManager) -> ConfigResult<Self> {
        let d = Self::default();

        let publish_slots = match cm.get_global_config_value(config_keys::PUBLISH_SLOTS)? {
            None => d.publish_slots.clone(),
            Some(raw) => {
                let parsed: Vec<RawSlotWindow> =
                    serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidValue {
                        key: config_keys::PUBLISH_SLOTS.to_string(),
                        value: raw.clone(),
                        message: e.to_string(),
                    })?;
                parsed
                    .into_iter()
                    .map(|w| {
                        Ok(SlotWindow::new(
                            w.slot,
                            parse_clock(config_keys::PUBLISH_SLOTS, &w.start)?,
                            parse_clock(config_keys::PUBLISH_SLOTS, &w.end)?,
                            w.capacity,
                        ))
                    })
                    .collect::<ConfigResult<Vec<_>>>()?
            }
        };

        let tz_name = cm
            .get_global_config_value(config_keys::REFERENCE_TIMEZONE)?
            .unwrap_or_else(|| DEFAULT_REFERENCE_TIMEZONE.to_string());
        let reference_timezone: Tz = tz_name
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidTimezone(tz_name.clone()))?;

        let mut config = Self {
            max_active_productions: cm
                .get_parsed_or(config_keys::MAX_ACTIVE_PRODUCTIONS, d.max_active_productions)?,
            default_chapters_per_day: cm
                .get_parsed_or(config_keys::DEFAULT_CHAPTERS_PER_DAY, d.default_chapters_per_day)?,
            default_planned_length: cm
                .get_parsed_or(config_keys::DEFAULT_PLANNED_LENGTH, d.default_planned_length)?,
            publish_slots,
            reference_timezone,
            max_publish_retries: cm
                .get_parsed_or(config_keys::MAX_PUBLISH_RETRIES, d.max_publish_retries)?,
            quality_thresholds: cm
                .get_json_or(config_keys::QUALITY_THRESHOLDS, d.quality_thresholds.clone())?,
            extended_quality: cm.get_bool_or(config_keys::EXTENDED_QUALITY, d.extended_quality)?,
            recent_chapter_window: cm
                .get_parsed_or(config_keys::RECENT_CHAPTER_WINDOW, d.recent_chapter_window)?,
            max_repair_attempts: cm
                .get_parsed_or(config_keys::MAX_REPAIR_ATTEMPTS, d.max_repair_attempts)?,
            repair_target_score: cm
                .get_parsed_or(config_keys::REPAIR_TARGET_SCORE, d.repair_target_score)?,
            repair_min_improvement: cm
                .get_parsed_or(config_keys::REPAIR_MIN_IMPROVEMENT, d.repair_min_improvement)?,
            pause_after_errors: cm
                .get_parsed_or(config_keys::PAUSE_AFTER_ERRORS, d.pause_after_errors)?,
            error_retention_days: cm
                .get_parsed_or(config_keys::ERROR_RETENTION_DAYS, d.error_retention_days)?,
            stale_job_minutes: cm
                .get_parsed_or(config_keys::STALE_JOB_MINUTES, d.stale_job_minutes)?,
            max_job_attempts: cm.get_parsed_or(config_keys::MAX_JOB_ATTEMPTS, d.max_job_attempts)?,
            worker_count: cm.get_parsed_or(config_keys::WORKER_COUNT, d.worker_count)?,
            generation_timeout_secs: cm
                .get_parsed_or(config_keys::GENERATION_TIMEOUT_SECS, d.generation_timeout_secs)?,
            generation_max_retries: cm
                .get_parsed_or(config_keys::GENERATION_MAX_RETRIES, d.generation_max_retries)?,
            rate_limit_per_minute: cm
                .get_parsed_or(config_keys::RATE_LIMIT_PER_MINUTE, d.rate_limit_per_minute)?,
            rate_limit_burst: cm.get_parsed_or(config_keys::RATE_LIMIT_BURST, d.rate_limit_burst)?,
        };
        config.publish_slots.sort_by_key(|w| w.start);

        config.validate()?;
        tracing::info!(
            timezone = %config.reference_timezone,
            slots = config.publish_slots.len(),
            max_active = config.max_active_productions,
            workers = config.worker_count,
            "流水线配置已加载"
        );
        Ok(config)
    }

    /// 配置自洽性校验
    pub fn validate(&self) -> ConfigResult<()> {
        if self.publish_slots.is_empty() {
            return Err(ConfigError::NoPublishSlots);
        }

        let mut seen = HashSet::new();
        for w in &self.publish_slots {
            if !seen.insert(w.slot) {
                return Err(ConfigError::InvalidSlot(format!("时段 {} 重复配置", w.slot)));
            }
            if w.start >= w.end {
                return Err(ConfigError::InvalidSlot(format!(
                    "时段 {} 起止时间无效: {} - {}",
                    w.slot, w.start, w.end
                )));
            }
            if w.capacity == 0 {
                return Err(ConfigError::InvalidSlot(format!("时段 {} 容量为 0", w.slot)));
            }
        }

        let mut ordered: Vec<&SlotWindow> = self.publish_slots.iter().collect();
        ordered.sort_by_key(|w| w.start);
        for pair in ordered.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(ConfigError::InvalidSlot(format!(
                    "时段 {} 与 {} 重叠",
                    pair[0].slot, pair[1].slot
                )));
            }
        }

        self.quality_thresholds
            .validate()
            .map_err(ConfigError::InvalidThresholds)?;

        if self.repair_target_score < self.quality_thresholds.pass_at {
            return Err(ConfigError::InvalidThresholds(format!(
                "repair_target_score ({}) 不能低于 pass_at ({})",
                self.repair_target_score, self.quality_thresholds.pass_at
            )));
        }
        if self.repair_min_improvement < 0.0 {
            return Err(ConfigError::InvalidThresholds(
                "repair_min_improvement 不能为负".to_string(),
            ));
        }

        let positive = [
            (config_keys::MAX_ACTIVE_PRODUCTIONS, self.max_active_productions as i64),
            (config_keys::DEFAULT_CHAPTERS_PER_DAY, self.default_chapters_per_day as i64),
            (config_keys::DEFAULT_PLANNED_LENGTH, self.default_planned_length as i64),
            (config_keys::PAUSE_AFTER_ERRORS, self.pause_after_errors as i64),
            (config_keys::WORKER_COUNT, self.worker_count as i64),
            (config_keys::GENERATION_TIMEOUT_SECS, self.generation_timeout_secs as i64),
            (config_keys::RATE_LIMIT_PER_MINUTE, self.rate_limit_per_minute as i64),
            (config_keys::RATE_LIMIT_BURST, self.rate_limit_burst as i64),
            (config_keys::STALE_JOB_MINUTES, self.stale_job_minutes),
            (config_keys::MAX_JOB_ATTEMPTS, self.max_job_attempts as i64),
            (config_keys::RECENT_CHAPTER_WINDOW, self.recent_chapter_window as i64),
        ];
        for (key, value) in positive {
            if value <= 0 {
                return Err(ConfigError::Inconsistent(format!("{} 必须 > 0, 实际 {}", key, value)));
            }
        }
        if self.max_publish_retries < 0 || self.error_retention_days < 0 {
            return Err(ConfigError::Inconsistent(
                "max_publish_retries / error_retention_days 不能为负".to_string(),
            ));
        }

        Ok(())
    }

    /// 每日全部时段容量之和
    pub fn total_slot_capacity(&self) -> u32 {
        self.publish_slots.iter().map(|w| w.capacity).sum()
    }

    pub fn slot_window(&self, slot: PublishSlot) -> Option<&SlotWindow> {
        self.publish_slots.iter().find(|w| w.slot == slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ensure_schema;
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::load(&manager()).unwrap();
        assert_eq!(config.publish_slots.len(), 3);
        assert_eq!(config.total_slot_capacity(), 3);
        assert_eq!(config.reference_timezone, chrono_tz::Asia::Shanghai);
    }

    #[test]
    fn test_slots_parsed_from_json_and_sorted() {
        let cm = manager();
        cm.set_global_config_value(
            config_keys::PUBLISH_SLOTS,
            r#"[{"slot":"evening","start":"20:00","end":"21:00","capacity":2},
                {"slot":"morning","start":"07:30","end":"09:00","capacity":1}]"#,
        )
        .unwrap();
        let config = PipelineConfig::load(&cm).unwrap();
        assert_eq!(config.publish_slots[0].slot, PublishSlot::Morning);
        assert_eq!(config.publish_slots[1].capacity, 2);
        assert_eq!(config.publish_slots[0].duration_minutes(), 90);
    }

    #[test]
    fn test_no_slots_fails_fast() {
        let cm = manager();
        cm.set_global_config_value(config_keys::PUBLISH_SLOTS, "[]").unwrap();
        assert!(matches!(PipelineConfig::load(&cm), Err(ConfigError::NoPublishSlots)));
    }

    #[test]
    fn test_invalid_timezone_fails_fast() {
        let cm = manager();
        cm.set_global_config_value(config_keys::REFERENCE_TIMEZONE, "Mars/Olympus").unwrap();
        assert!(matches!(PipelineConfig::load(&cm), Err(ConfigError::InvalidTimezone(_))));
    }

    #[test]
    fn test_inconsistent_thresholds_fail_fast() {
        let cm = manager();
        cm.set_global_config_value(
            config_keys::QUALITY_THRESHOLDS,
            r#"{"auto_rewrite_below": 80, "pass_at": 70}"#,
        )
        .unwrap();
        assert!(matches!(PipelineConfig::load(&cm), Err(ConfigError::InvalidThresholds(_))));

        let mut config = PipelineConfig::default();
        config.repair_target_score = 60.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overlapping_slots_rejected() {
        let mut config = PipelineConfig::default();
        config.publish_slots[1].start = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSlot(_))));
    }
}
