// ==========================================
// 连载生产流水线 - Tick 编排器
// ==========================================
// 用途: 对外只暴露两个可重复触发的入口
// - 每日 tick: 清零配额 -> 晋升排队作品 -> 清理历史失败 -> 记录昨日统计
// - 主循环 tick: 回收滞留任务 -> 排程 -> 执行到期任务 -> 补排遗漏发布 -> 发布 -> 发布重试
// 红线:
// - 单个作品/任务失败只计数, 不中断其他作品
// - 不同作品并行执行, 同一作品内按章节号升序串行
// ==========================================

use crate::config::PipelineConfig;
use crate::domain::chapter_job::ChapterWriteJob;
use crate::domain::stats::DailyStats;
use crate::domain::types::{ChapterJobStatus, ProductionStatus};
use crate::engine::chapter_executor::{ChapterExecutor, JobOutcome};
use crate::engine::chapter_scheduler::ChapterScheduler;
use crate::engine::clock::{local_date, local_day_bounds, PipelineClock};
use crate::engine::error::PipelineResult;
use crate::engine::generation::{GenerationClient, GenerationEngine};
use crate::engine::production::ProductionStateMachine;
use crate::engine::publish_scheduler::PublishScheduler;
use crate::engine::quality::{ChapterEvaluator, QualityGate};
use crate::engine::repositories::PipelineRepositories;
use crate::repository::ProductionStatusCounts;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

// ==========================================
// Tick 汇总
// ==========================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailyTickSummary {
    pub counters_reset: usize,
    pub promoted: usize,
    pub cleaned: usize,
    pub stats_recorded: bool,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MainTickSummary {
    pub chapters_scheduled: usize,
    pub chapters_deferred: usize,
    pub chapters_written: usize,
    pub chapters_failed: usize,
    pub chapters_skipped: usize,
    pub chapters_published: usize,
    /// 已完成却没有发布任务的章节, 本轮补排数
    pub publish_backfilled: usize,
    pub publish_failures: usize,
    pub recovered: usize,
    pub errors: usize,
}

// ==========================================
// PipelineOrchestrator
// ==========================================

pub struct PipelineOrchestrator {
    repos: PipelineRepositories,
    config: Arc<PipelineConfig>,
    machine: Arc<ProductionStateMachine>,
    scheduler: ChapterScheduler,
    publisher: Arc<PublishScheduler>,
    executor: ChapterExecutor,
    clock: Arc<dyn PipelineClock>,
}

impl PipelineOrchestrator {
    /// 创建编排器 (生成客户端按配置构造)
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        config: PipelineConfig,
        engine: Arc<dyn GenerationEngine>,
        clock: Arc<dyn PipelineClock>,
    ) -> Self {
        let client = GenerationClient::from_config(engine, &config);
        Self::with_client(conn, Arc::new(config), client, clock)
    }

    /// 使用已构造好的生成客户端创建编排器
    pub fn with_client(
        conn: Arc<Mutex<Connection>>,
        config: Arc<PipelineConfig>,
        client: GenerationClient,
        clock: Arc<dyn PipelineClock>,
    ) -> Self {
        let repos = PipelineRepositories::from_connection(conn);
        let machine = Arc::new(ProductionStateMachine::new(
            repos.production_repo.clone(),
            config.default_chapters_per_day,
        ));
        let scheduler = ChapterScheduler::new(
            repos.production_repo.clone(),
            repos.job_repo.clone(),
            config.clone(),
        );
        let publisher = Arc::new(PublishScheduler::new(
            repos.publish_repo.clone(),
            repos.chapter_repo.clone(),
            config.clone(),
        ));
        let evaluator: Arc<dyn ChapterEvaluator> = Arc::new(QualityGate::new(
            config.quality_thresholds.clone(),
            config.extended_quality,
        ));
        let executor = ChapterExecutor::new(
            repos.clone(),
            machine.clone(),
            publisher.clone(),
            Arc::new(client),
            evaluator,
            config.clone(),
            clock.clone(),
        );

        Self {
            repos,
            config,
            machine,
            scheduler,
            publisher,
            executor,
            clock,
        }
    }

    pub fn machine(&self) -> &ProductionStateMachine {
        &self.machine
    }

    pub fn publisher(&self) -> &PublishScheduler {
        &self.publisher
    }

    pub fn repositories(&self) -> &PipelineRepositories {
        &self.repos
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 各状态作品数
    pub fn status(&self) -> PipelineResult<ProductionStatusCounts> {
        self.machine.count_by_status()
    }

    // ==========================================
    // 每日 tick
    // ==========================================

    #[instrument(skip(self))]
    pub fn run_daily_tick(&self) -> PipelineResult<DailyTickSummary> {
        let now = self.clock.now();
        let tz = &self.config.reference_timezone;
        let today = local_date(tz, now);
        let mut summary = DailyTickSummary::default();

        match self.machine.reset_daily_counters(today, now) {
            Ok(n) => summary.counters_reset = n,
            Err(e) => {
                warn!(error = %e, "每日计数清零失败");
                summary.errors += 1;
            }
        }

        let max_active = self.config.max_active_productions;
        match self.machine.activate(max_active, max_active, now) {
            Ok(ids) => summary.promoted = ids.len(),
            Err(e) => {
                warn!(error = %e, "排队作品晋升失败");
                summary.errors += 1;
            }
        }

        let retention_cutoff = now - Duration::days(self.config.error_retention_days);
        match self.repos.job_repo.delete_resolved_failures(retention_cutoff) {
            Ok(n) => summary.cleaned = n,
            Err(e) => {
                warn!(error = %e, "历史失败任务清理失败");
                summary.errors += 1;
            }
        }

        let yesterday = today.pred_opt().unwrap_or(today);
        match self.record_daily_stats(yesterday) {
            Ok(()) => summary.stats_recorded = true,
            Err(e) => {
                warn!(error = %e, %yesterday, "每日统计写入失败");
                summary.errors += 1;
            }
        }

        info!(
            %today,
            counters_reset = summary.counters_reset,
            promoted = summary.promoted,
            cleaned = summary.cleaned,
            errors = summary.errors,
            "每日 tick 完成"
        );
        Ok(summary)
    }

    /// 写入某日统计 (按日期覆盖)
    pub fn record_daily_stats(&self, date: NaiveDate) -> PipelineResult<()> {
        let (start, end) = local_day_bounds(&self.config.reference_timezone, date);
        let counts = self.repos.production_repo.count_by_status()?;
        let stats = DailyStats {
            stat_date: date,
            queued_count: counts.get(ProductionStatus::Queued),
            active_count: counts.occupying_capacity(),
            paused_count: counts.get(ProductionStatus::Paused),
            finished_count: counts.get(ProductionStatus::Finished),
            chapters_written: self.repos.job_repo.count_status_between(
                ChapterJobStatus::Completed,
                start,
                end,
            )?,
            chapters_published: self.repos.publish_repo.count_published_between(start, end)?,
            failed_jobs: self
                .repos
                .job_repo
                .count_status_between(ChapterJobStatus::Failed, start, end)?,
            avg_quality_score: self.repos.production_repo.average_quality()?,
        };
        self.repos.stats_repo.upsert(&stats)?;
        Ok(())
    }

    // ==========================================
    // 主循环 tick
    // ==========================================

    #[instrument(skip(self))]
    pub async fn run_main_loop_tick(&self) -> PipelineResult<MainTickSummary> {
        let now = self.clock.now();
        let mut summary = MainTickSummary::default();

        // ===== 步骤1: 回收 =====
        summary.recovered = self.recover(now, &mut summary.errors);

        // ===== 步骤2: 排程 =====
        match self.scheduler.schedule_all(now) {
            Ok(pass) => {
                summary.chapters_scheduled = pass.jobs_created;
                summary.chapters_deferred = pass.deferred;
                summary.errors += pass.errors;
            }
            Err(e) => {
                warn!(error = %e, "排程 pass 失败");
                summary.errors += 1;
            }
        }

        // ===== 步骤3: 执行到期任务 =====
        match self.repos.job_repo.list_due_pending(now) {
            Ok(due) => {
                for result in self.execute_due(due).await {
                    match result {
                        Ok(JobOutcome::Completed {
                            publish_scheduled, ..
                        }) => {
                            summary.chapters_written += 1;
                            if !publish_scheduled {
                                summary.publish_failures += 1;
                            }
                        }
                        Ok(JobOutcome::Failed { .. }) => summary.chapters_failed += 1,
                        Ok(JobOutcome::Skipped { .. }) => summary.chapters_skipped += 1,
                        Err(e) => {
                            warn!(error = %e, "章节任务执行出错");
                            summary.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "读取到期任务失败");
                summary.errors += 1;
            }
        }

        // ===== 步骤4: 补排 + 发布 + 重试 =====
        let now = self.clock.now();
        match self.publisher.schedule_missing(now) {
            Ok(pass) => {
                summary.publish_backfilled = pass.scheduled;
                summary.publish_failures += pass.failed;
            }
            Err(e) => {
                warn!(error = %e, "补排发布 pass 失败");
                summary.errors += 1;
            }
        }
        match self.publisher.run_publish_pass(now) {
            Ok(pass) => {
                summary.chapters_published += pass.published;
                summary.publish_failures += pass.failed;
            }
            Err(e) => {
                warn!(error = %e, "发布 pass 失败");
                summary.errors += 1;
            }
        }
        match self.publisher.run_retry_pass(now) {
            Ok(pass) => {
                summary.chapters_published += pass.published;
                summary.publish_failures += pass.failed;
            }
            Err(e) => {
                warn!(error = %e, "发布重试 pass 失败");
                summary.errors += 1;
            }
        }

        info!(
            scheduled = summary.chapters_scheduled,
            written = summary.chapters_written,
            failed = summary.chapters_failed,
            published = summary.chapters_published,
            errors = summary.errors,
            "主循环 tick 完成"
        );
        Ok(summary)
    }

    /// 滞留任务回收 + 过期 pending 失效 + 释放空闲 writing 作品
    fn recover(&self, now: DateTime<Utc>, errors: &mut usize) -> usize {
        let mut recovered = 0;
        let stale_before = now - Duration::minutes(self.config.stale_job_minutes);

        match self
            .repos
            .job_repo
            .recover_stale(stale_before, self.config.max_job_attempts, now)
        {
            Ok(r) => {
                if r.requeued + r.failed > 0 {
                    info!(requeued = r.requeued, failed = r.failed, "滞留任务已回收");
                }
                recovered += r.requeued + r.failed;
            }
            Err(e) => {
                warn!(error = %e, "滞留任务回收失败");
                *errors += 1;
            }
        }

        match self.repos.job_repo.supersede_obsolete_pending(now) {
            Ok(n) if n > 0 => debug!(superseded = n, "过期 pending 任务已失效"),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "过期 pending 任务处理失败");
                *errors += 1;
            }
        }

        match self.machine.release_idle_writers(now) {
            Ok(n) if n > 0 => debug!(released = n, "空闲 writing 作品已释放"),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "释放 writing 作品失败");
                *errors += 1;
            }
        }

        recovered
    }

    /// 按作品分组, 组内升序串行, 组间有界并行
    async fn execute_due(&self, due: Vec<ChapterWriteJob>) -> Vec<PipelineResult<JobOutcome>> {
        let mut groups: BTreeMap<String, Vec<ChapterWriteJob>> = BTreeMap::new();
        for job in due {
            groups.entry(job.production_id.clone()).or_default().push(job);
        }

        let workers = self.config.worker_count.max(1);
        let results: Vec<Vec<PipelineResult<JobOutcome>>> = stream::iter(groups.into_values())
            .map(|mut jobs| async move {
                jobs.sort_by_key(|j| j.chapter_number);
                let mut results = Vec::with_capacity(jobs.len());
                for job in &jobs {
                    let result = self.executor.execute(job).await;
                    // 本章未完成时, 后续章节无法认领
                    let proceed = matches!(result, Ok(JobOutcome::Completed { .. }));
                    results.push(result);
                    if !proceed {
                        break;
                    }
                }
                results
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }
}
