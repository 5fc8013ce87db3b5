// ==========================================
// 连载生产流水线 - 引擎层
// ==========================================
// 职责: 实现生产状态机、排程、质检、修复、发布与 tick 编排
// 红线: Engine 不拼 SQL, 所有数据访问经由 Repository
// ==========================================

pub mod chapter_executor;
pub mod chapter_scheduler;
pub mod clock;
pub mod error;
pub mod generation;
pub mod orchestrator;
pub mod production;
pub mod publish_scheduler;
pub mod quality;
pub mod repair;
pub mod repositories;

// 重导出核心引擎
pub use chapter_executor::{ChapterExecutor, JobOutcome};
pub use chapter_scheduler::{ChapterScheduler, ScheduleOutcome, SchedulePassSummary};
pub use clock::{FixedClock, PipelineClock, SystemClock};
pub use error::{PipelineError, PipelineResult};
pub use generation::{
    GenerationClient, GenerationEngine, GenerationError, GenerationOutput, GenerationRequest,
    OfflineEngine, TokenBucket,
};
pub use orchestrator::{DailyTickSummary, MainTickSummary, PipelineOrchestrator};
pub use production::{ChapterCompletion, ProductionStateMachine};
pub use publish_scheduler::{BackfillSummary, PublishPassSummary, PublishScheduler};
pub use quality::{ChapterEvaluator, QualityContext, QualityGate};
pub use repair::{AutoRepairLoop, ChapterReviser, RepairOutcome, RepairSettings};
pub use repositories::PipelineRepositories;
