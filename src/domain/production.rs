// ==========================================
// 连载生产流水线 - 作品生产记录
// ==========================================
// 红线: 只能经由生产状态机修改
// 上下文/评分历史为显式类型, JSON 只在仓储边界出现
// ==========================================

use crate::domain::types::ProductionStatus;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// 评分历史默认窗口
pub const SCORE_HISTORY_LIMIT: usize = 10;

/// 滚动摘要最大字符数
pub const RUNNING_SUMMARY_MAX_CHARS: usize = 4_000;

// ==========================================
// WorkPlan - 已接受的作品计划 (admit 输入)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkPlan {
    pub title: String,
    #[serde(default)]
    pub priority: i32,
    pub total_chapters: Option<i32>,      // None = 连载不设上限
    pub chapters_per_day: Option<i32>,    // None = 使用配置默认值
    #[serde(default)]
    pub synopsis: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub dead_characters: Vec<String>,
    #[serde(default)]
    pub realm_ladder: Vec<String>,
    #[serde(default)]
    pub initial_power_level: Option<i32>,
    #[serde(default)]
    pub arc_max_power_delta: Option<i32>,
    #[serde(default)]
    pub arc_length: Option<i32>,
}

// ==========================================
// ProductionContext - 跨章节携带的写作上下文
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductionContext {
    #[serde(default)]
    pub synopsis: String,
    #[serde(default)]
    pub running_summary: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub dead_characters: Vec<String>,
    /// 境界阶梯(低 -> 高), 用于识别境界跳跃
    #[serde(default)]
    pub realm_ladder: Vec<String>,
    #[serde(default)]
    pub power_level: Option<i32>,
    /// 当前篇章允许的单章最大等级跨度
    #[serde(default)]
    pub arc_max_power_delta: Option<i32>,
    /// 强度波动周期(章)
    #[serde(default)]
    pub arc_length: Option<i32>,
}

impl ProductionContext {
    /// 追加章节摘要, 超长时从头部截断
    pub fn append_summary(&mut self, chapter_number: i32, summary: &str) {
        let line = format!("[{}] {}", chapter_number, summary.trim());
        if self.running_summary.is_empty() {
            self.running_summary = line;
        } else {
            self.running_summary.push('\n');
            self.running_summary.push_str(&line);
        }

        let char_count = self.running_summary.chars().count();
        if char_count > RUNNING_SUMMARY_MAX_CHARS {
            let skip = char_count - RUNNING_SUMMARY_MAX_CHARS;
            self.running_summary = self.running_summary.chars().skip(skip).collect();
        }
    }
}

// ==========================================
// ScoreHistory - 最近 K 章质量分 + 滚动均值
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreHistory {
    limit: usize,
    scores: VecDeque<f64>,
    average: Option<f64>,
}

impl ScoreHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            scores: VecDeque::new(),
            average: None,
        }
    }

    /// 追加一次评分, 超出窗口时丢弃最旧的
    pub fn push(&mut self, score: f64) {
        self.scores.push_back(score);
        while self.scores.len() > self.limit {
            self.scores.pop_front();
        }
        let sum: f64 = self.scores.iter().sum();
        self.average = Some(sum / self.scores.len() as f64);
    }

    pub fn scores(&self) -> impl Iterator<Item = &f64> {
        self.scores.iter()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn average(&self) -> Option<f64> {
        self.average
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// 反序列化后重新收紧窗口
    ///
    /// 存储中的 JSON 可能来自更大的 limit
    pub fn normalized(mut self) -> Self {
        self.limit = self.limit.max(1);
        while self.scores.len() > self.limit {
            self.scores.pop_front();
        }
        self.average = if self.scores.is_empty() {
            None
        } else {
            Some(self.scores.iter().sum::<f64>() / self.scores.len() as f64)
        };
        self
    }
}

impl Default for ScoreHistory {
    fn default() -> Self {
        Self::new(SCORE_HISTORY_LIMIT)
    }
}

// ==========================================
// ProductionRecord - 作品生产记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionRecord {
    pub production_id: String,
    pub title: String,
    pub priority: i32,
    pub status: ProductionStatus,

    // ===== 进度 =====
    pub current_chapter: i32,         // 单调不减
    pub total_chapters: Option<i32>,  // None = 不设上限
    pub chapters_per_day: i32,

    // ===== 每日配额 =====
    pub last_write_date: Option<NaiveDate>,
    pub chapters_written_today: i32,
    pub counters_reset_date: Option<NaiveDate>,

    // ===== 上下文与质量 =====
    pub context: ProductionContext,
    pub score_history: ScoreHistory,
    pub consecutive_error_count: i32,

    // ===== 时间线 =====
    pub enqueued_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pause_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProductionRecord {
    /// 由计划创建排队记录
    pub fn from_plan(
        production_id: String,
        plan: &WorkPlan,
        default_chapters_per_day: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            production_id,
            title: plan.title.clone(),
            priority: plan.priority,
            status: ProductionStatus::Queued,
            current_chapter: 0,
            total_chapters: plan.total_chapters,
            chapters_per_day: plan.chapters_per_day.unwrap_or(default_chapters_per_day).max(1),
            last_write_date: None,
            chapters_written_today: 0,
            counters_reset_date: None,
            context: ProductionContext {
                synopsis: plan.synopsis.clone(),
                running_summary: String::new(),
                objectives: plan.objectives.clone(),
                dead_characters: plan.dead_characters.clone(),
                realm_ladder: plan.realm_ladder.clone(),
                power_level: plan.initial_power_level,
                arc_max_power_delta: plan.arc_max_power_delta,
                arc_length: plan.arc_length,
            },
            score_history: ScoreHistory::default(),
            consecutive_error_count: 0,
            enqueued_at: now,
            activated_at: None,
            paused_at: None,
            finished_at: None,
            pause_reason: None,
            updated_at: now,
        }
    }

    /// 是否已写完计划章数
    pub fn is_complete(&self) -> bool {
        matches!(self.total_chapters, Some(total) if self.current_chapter >= total)
    }

    /// 今日剩余配额 (未计入已排队任务)
    pub fn chapters_needed_today(&self, today: NaiveDate) -> i32 {
        if self.last_write_date != Some(today) {
            self.chapters_per_day
        } else {
            self.chapters_per_day - self.chapters_written_today
        }
    }

    /// 剩余可写章数 (None = 不设上限)
    pub fn remaining_chapters(&self) -> Option<i32> {
        self.total_chapters
            .map(|total| (total - self.current_chapter).max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_history_is_bounded() {
        let mut history = ScoreHistory::new(3);
        for s in [50.0, 60.0, 70.0, 80.0] {
            history.push(s);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.scores().copied().collect::<Vec<_>>(), vec![60.0, 70.0, 80.0]);
        assert_eq!(history.average(), Some(70.0));
    }

    #[test]
    fn test_score_history_normalized_trims_oversized_json() {
        let raw = r#"{"limit":2,"scores":[1.0,2.0,3.0,4.0],"average":null}"#;
        let history: ScoreHistory = serde_json::from_str(raw).unwrap();
        let history = history.normalized();
        assert_eq!(history.len(), 2);
        assert_eq!(history.average(), Some(3.5));
    }

    #[test]
    fn test_running_summary_truncates_from_front() {
        let mut ctx = ProductionContext::default();
        let long = "x".repeat(RUNNING_SUMMARY_MAX_CHARS);
        ctx.append_summary(1, &long);
        ctx.append_summary(2, "最新摘要");
        assert!(ctx.running_summary.chars().count() <= RUNNING_SUMMARY_MAX_CHARS);
        assert!(ctx.running_summary.ends_with("[2] 最新摘要"));
    }

    #[test]
    fn test_chapters_needed_today() {
        let plan = WorkPlan {
            title: "测试".to_string(),
            priority: 0,
            total_chapters: Some(10),
            chapters_per_day: Some(3),
            synopsis: String::new(),
            objectives: vec![],
            dead_characters: vec![],
            realm_ladder: vec![],
            initial_power_level: None,
            arc_max_power_delta: None,
            arc_length: None,
        };
        let now = Utc::now();
        let today = now.date_naive();
        let mut record = ProductionRecord::from_plan("P1".to_string(), &plan, 2, now);
        assert_eq!(record.chapters_needed_today(today), 3);

        record.last_write_date = Some(today);
        record.chapters_written_today = 2;
        assert_eq!(record.chapters_needed_today(today), 1);
        assert_eq!(record.remaining_chapters(), Some(10));
    }
}
