// ==========================================
// 连载生产流水线 - 引擎层仓储聚合
// ==========================================
// 职责: 聚合流水线各组件所需的所有 Repository
// 目标: 各组件共享同一连接, 构造参数只有一个
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::repository::{
    ChapterJobRepository, ChapterRepository, DailyStatsRepository, ProductionRepository,
    PublishJobRepository, RewriteAttemptRepository,
};

/// 流水线仓储集合
///
/// # 包含的仓储
/// - `production_repo`: 作品生产记录
/// - `job_repo`: 章节写作任务
/// - `chapter_repo`: 章节成品
/// - `attempt_repo`: 修复审计记录
/// - `publish_repo`: 发布任务
/// - `stats_repo`: 每日统计
#[derive(Clone)]
pub struct PipelineRepositories {
    pub production_repo: Arc<ProductionRepository>,
    pub job_repo: Arc<ChapterJobRepository>,
    pub chapter_repo: Arc<ChapterRepository>,
    pub attempt_repo: Arc<RewriteAttemptRepository>,
    pub publish_repo: Arc<PublishJobRepository>,
    pub stats_repo: Arc<DailyStatsRepository>,
}

impl PipelineRepositories {
    /// 基于同一连接创建全部仓储
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            production_repo: Arc::new(ProductionRepository::new(conn.clone())),
            job_repo: Arc::new(ChapterJobRepository::new(conn.clone())),
            chapter_repo: Arc::new(ChapterRepository::new(conn.clone())),
            attempt_repo: Arc::new(RewriteAttemptRepository::new(conn.clone())),
            publish_repo: Arc::new(PublishJobRepository::new(conn.clone())),
            stats_repo: Arc::new(DailyStatsRepository::new(conn)),
        }
    }
}

// 注: PipelineRepositories 只做聚合, 其正确性由 tests/ 下的集成测试覆盖
