// ==========================================
// 连载生产流水线 - 发布任务
// ==========================================
// 红线: scheduled_time 必须落在某个配置时段窗口内
// ==========================================

use crate::domain::types::{PublishSlot, PublishStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishJob {
    pub publish_id: String,
    pub production_id: String,
    pub chapter_id: String,
    pub chapter_number: i32,
    pub scheduled_time: DateTime<Utc>,
    pub slot: PublishSlot,
    pub status: PublishStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PublishJob {
    /// 是否还能进入重试
    pub fn can_retry(&self, max_retries: i32) -> bool {
        self.status == PublishStatus::Failed && self.retry_count < max_retries
    }
}
