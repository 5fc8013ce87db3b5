// ==========================================
// 连载生产流水线 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 并发: 状态认领一律为条件更新 (WHERE status = 期望旧状态)
// ==========================================

pub mod chapter_job_repo;
pub mod chapter_repo;
pub mod codec;
pub mod daily_stats_repo;
pub mod error;
pub mod production_repo;
pub mod publish_repo;
pub mod rewrite_attempt_repo;

// 重导出核心仓储
pub use chapter_job_repo::{ChapterJobRepository, StaleRecovery};
pub use chapter_repo::{ChapterRepository, UnscheduledChapter};
pub use daily_stats_repo::DailyStatsRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use production_repo::{ProductionRepository, ProductionStatusCounts};
pub use publish_repo::PublishJobRepository;
pub use rewrite_attempt_repo::RewriteAttemptRepository;
