// ==========================================
// 连载生产流水线 - 领域模型层
// ==========================================
// 职责: 定义领域实体、状态枚举与转换表
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod chapter;
pub mod chapter_job;
pub mod production;
pub mod publish;
pub mod quality;
pub mod stats;
pub mod types;

// 重导出核心类型
pub use chapter::Chapter;
pub use chapter_job::{ChapterWriteJob, RewriteAttempt};
pub use production::{ProductionContext, ProductionRecord, ScoreHistory, WorkPlan};
pub use publish::PublishJob;
pub use quality::{
    ExtendedScores, IssueSeverity, QualityDimension, QualityIssue, QualityReport,
    QualityThresholds,
};
pub use stats::DailyStats;
pub use types::{ChapterJobStatus, ProductionStatus, PublishSlot, PublishStatus, QualityAction};
