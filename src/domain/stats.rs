// ==========================================
// 连载生产流水线 - 每日统计
// ==========================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 每日聚合统计 (按参考时区日期, 一天一行)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub stat_date: NaiveDate,
    pub queued_count: i64,
    pub active_count: i64,
    pub paused_count: i64,
    pub finished_count: i64,
    pub chapters_written: i64,
    pub chapters_published: i64,
    pub failed_jobs: i64,
    pub avg_quality_score: Option<f64>,
}
