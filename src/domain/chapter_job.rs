// ==========================================
// 连载生产流水线 - 章节写作任务
// ==========================================
// 红线: 只有 action=pass 的质检报告才能把任务推进到 completed
// ==========================================

use crate::domain::types::{ChapterJobStatus, PublishSlot, QualityAction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// ChapterWriteJob - 单次章节写作尝试
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterWriteJob {
    pub job_id: String,
    pub production_id: String,
    pub chapter_number: i32,
    pub status: ChapterJobStatus,
    pub attempt_count: i32,

    // ===== 排程 =====
    pub scheduled_slot: PublishSlot,
    pub scheduled_time: DateTime<Utc>,

    // ===== 上下文快照 =====
    pub previous_summary: String,
    pub objectives: Vec<String>,
    pub target_intensity: f64,

    // ===== 结果 =====
    pub chapter_id: Option<String>,
    pub word_count: Option<i32>,
    pub final_score: Option<f64>,
    pub needs_human_review: bool,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChapterWriteJob {
    /// 新建待执行任务
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        job_id: String,
        production_id: String,
        chapter_number: i32,
        scheduled_slot: PublishSlot,
        scheduled_time: DateTime<Utc>,
        previous_summary: String,
        objectives: Vec<String>,
        target_intensity: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            production_id,
            chapter_number,
            status: ChapterJobStatus::Pending,
            attempt_count: 0,
            scheduled_slot,
            scheduled_time,
            previous_summary,
            objectives,
            target_intensity,
            chapter_id: None,
            word_count: None,
            final_score: None,
            needs_human_review: false,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 是否已到执行时间
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ChapterJobStatus::Pending && self.scheduled_time <= now
    }
}

// ==========================================
// RewriteAttempt - 自动修复审计记录 (只追加)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteAttempt {
    pub attempt_id: String,
    pub job_id: String,
    pub attempt_index: i32,
    pub score_before: f64,
    pub score_after: f64,
    pub action_after: QualityAction,
    pub accepted: bool,
    pub instructions: Vec<String>,
    pub created_at: DateTime<Utc>,
}
