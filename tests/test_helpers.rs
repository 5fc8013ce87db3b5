// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、固定时钟、脚本化生成引擎、测试计划
// ==========================================

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use serial_pipeline::config::PipelineConfig;
use serial_pipeline::db::{ensure_schema, open_sqlite_connection};
use serial_pipeline::domain::WorkPlan;
use serial_pipeline::engine::generation::GenerationUsage;
use serial_pipeline::engine::{
    FixedClock, GenerationClient, GenerationEngine, GenerationError, GenerationOutput,
    GenerationRequest, OfflineEngine, PipelineClock, PipelineOrchestrator,
};
use std::collections::VecDeque;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let conn = open_sqlite_connection(&db_path)?;
    ensure_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 打开测试数据库连接（统一 PRAGMA）
pub fn open_test_connection(db_path: &str) -> Result<Arc<Mutex<Connection>>, Box<dyn Error>> {
    let conn = open_sqlite_connection(db_path)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// UTC 时刻
pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).single().unwrap()
}

/// 上海时间 23:00 (当日全部时段均已过)
pub fn shanghai_late_evening(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    utc(y, m, d, 15, 0)
}

/// 测试配置: 默认三个时段, 放宽限流
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        rate_limit_per_minute: 6_000,
        rate_limit_burst: 100,
        ..PipelineConfig::default()
    }
}

/// 测试计划
pub fn test_plan(title: &str, per_day: i32, total: Option<i32>) -> WorkPlan {
    WorkPlan {
        title: title.to_string(),
        priority: 0,
        total_chapters: total,
        chapters_per_day: Some(per_day),
        synopsis: "少年离开山村, 沿盐道追查师父失踪的真相".to_string(),
        objectives: vec!["找到师父".to_string()],
        dead_characters: vec![],
        realm_ladder: vec![],
        initial_power_level: None,
        arc_max_power_delta: None,
        arc_length: None,
    }
}

// ==========================================
// 生成引擎替身
// ==========================================

/// 每次调用都返回同一结果
pub struct FixedEngine {
    result: Result<String, GenerationError>,
    calls: AtomicUsize,
}

impl FixedEngine {
    pub fn text(text: &str) -> Self {
        Self {
            result: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn error(err: GenerationError) -> Self {
        Self {
            result: Err(err),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationEngine for FixedEngine {
    async fn generate(&self, _request: GenerationRequest) -> Result<GenerationOutput, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map(|text| GenerationOutput {
            text,
            usage: GenerationUsage::default(),
        })
    }
}

/// 先按脚本返回, 脚本用完后交给离线引擎
pub struct ScriptedEngine {
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    fallback: OfflineEngine,
    calls: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(script: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: OfflineEngine::default(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationEngine for ScriptedEngine {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result.map(|text| GenerationOutput {
                text,
                usage: GenerationUsage::default(),
            }),
            None => self.fallback.generate(request).await,
        }
    }
}

// ==========================================
// 组装好的测试流水线
// ==========================================

pub struct TestPipeline {
    _temp_file: NamedTempFile,
    pub conn: Arc<Mutex<Connection>>,
    pub clock: Arc<FixedClock>,
    pub orchestrator: PipelineOrchestrator,
}

/// 组装流水线 (生成重试不退避)
pub fn build_pipeline(
    config: PipelineConfig,
    engine: Arc<dyn GenerationEngine>,
    now: DateTime<Utc>,
) -> TestPipeline {
    let (temp_file, db_path) = create_test_db().expect("创建测试数据库失败");
    let conn = open_test_connection(&db_path).expect("打开数据库失败");
    let clock = Arc::new(FixedClock::new(now));
    let client = GenerationClient::from_config(engine, &config).with_retry_backoff(Duration::ZERO);
    let orchestrator =
        PipelineOrchestrator::with_client(conn.clone(), Arc::new(config), client, clock.clone());

    TestPipeline {
        _temp_file: temp_file,
        conn,
        clock,
        orchestrator,
    }
}

/// 提交计划并跑一次每日 tick, 返回作品 ID
pub fn admit_and_activate(pipeline: &TestPipeline, plan: &WorkPlan) -> String {
    let record = pipeline
        .orchestrator
        .machine()
        .admit(plan, pipeline.clock.now())
        .expect("提交计划失败");
    pipeline.orchestrator.run_daily_tick().expect("每日 tick 失败");
    record.production_id
}
