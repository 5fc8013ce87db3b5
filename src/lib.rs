// ==========================================
// 连载生产流水线 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + tokio
// 系统定位: 外部触发的 tick 驱动流水线 (无常驻后台循环)
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    ChapterJobStatus, ProductionStatus, PublishSlot, PublishStatus, QualityAction,
};

// 领域实体
pub use domain::{
    Chapter, ChapterWriteJob, DailyStats, ProductionRecord, PublishJob, QualityReport, WorkPlan,
};

// 配置
pub use config::{ConfigManager, PipelineConfig};

// 引擎
pub use engine::{
    AutoRepairLoop, ChapterScheduler, OfflineEngine, PipelineOrchestrator,
    ProductionStateMachine, PublishScheduler, QualityGate,
};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "连载生产流水线";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
