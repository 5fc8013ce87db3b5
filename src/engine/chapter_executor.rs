// ==========================================
// 连载生产流水线 - 章节任务执行器
// ==========================================
// 单个任务的完整流程:
//   认领(pending -> writing) -> 作品 active -> writing
//   -> 生成 -> quality_check -> 评分
//   -> 通过: 完成
//   -> 未通过: rewriting -> 自动修复 -> 最优版本通过则完成, 否则失败转人工
// 完成 = 章节落库 -> 作品进度回写 -> 任务 completed -> 排定发布 (失败则主循环补排)
// 失败 = 任务 failed -> 作品错误计数 +1 (可能暂停)
// 红线: 只有 action = pass 的报告才能让任务 completed
// ==========================================

use crate::config::PipelineConfig;
use crate::domain::chapter::{extractive_summary, Chapter};
use crate::domain::chapter_job::{ChapterWriteJob, RewriteAttempt};
use crate::domain::production::ProductionRecord;
use crate::domain::quality::QualityReport;
use crate::domain::types::{ChapterJobStatus, QualityAction};
use crate::engine::clock::{local_date, PipelineClock};
use crate::engine::error::{PipelineError, PipelineResult};
use crate::engine::generation::{build_chapter_prompt, GenerationClient};
use crate::engine::production::{ChapterCompletion, ProductionStateMachine};
use crate::engine::publish_scheduler::PublishScheduler;
use crate::engine::quality::{ChapterEvaluator, QualityContext};
use crate::engine::repair::{AutoRepairLoop, RepairAttemptRecord, RepairSettings};
use crate::engine::repositories::PipelineRepositories;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// 摘要最大字符数
const SUMMARY_MAX_CHARS: usize = 200;

/// 单个任务的执行结果
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        job_id: String,
        chapter_number: i32,
        score: f64,
        /// false = 发布排期失败, 由主循环补排
        publish_scheduled: bool,
    },
    Failed {
        job_id: String,
        reason: String,
        needs_human_review: bool,
    },
    /// 未能认领 (非下一章 / 作品不在 active / 已有执行中任务)
    Skipped { job_id: String },
}

pub struct ChapterExecutor {
    repos: PipelineRepositories,
    machine: Arc<ProductionStateMachine>,
    publisher: Arc<PublishScheduler>,
    client: Arc<GenerationClient>,
    evaluator: Arc<dyn ChapterEvaluator>,
    repair: AutoRepairLoop,
    config: Arc<PipelineConfig>,
    clock: Arc<dyn PipelineClock>,
}

impl ChapterExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repos: PipelineRepositories,
        machine: Arc<ProductionStateMachine>,
        publisher: Arc<PublishScheduler>,
        client: Arc<GenerationClient>,
        evaluator: Arc<dyn ChapterEvaluator>,
        config: Arc<PipelineConfig>,
        clock: Arc<dyn PipelineClock>,
    ) -> Self {
        let repair = AutoRepairLoop::new(
            evaluator.clone(),
            RepairSettings {
                max_attempts: config.max_repair_attempts,
                target_score: config.repair_target_score,
                min_improvement: config.repair_min_improvement,
            },
        );
        Self {
            repos,
            machine,
            publisher,
            client,
            evaluator,
            repair,
            config,
            clock,
        }
    }

    /// 执行单个待写任务
    #[instrument(skip(self, job), fields(job_id = %job.job_id, production_id = %job.production_id, chapter = job.chapter_number))]
    pub async fn execute(&self, job: &ChapterWriteJob) -> PipelineResult<JobOutcome> {
        let job_id = job.job_id.as_str();

        // ===== 认领 =====
        if !self.repos.job_repo.claim_for_writing(job_id, self.clock.now())? {
            return Ok(JobOutcome::Skipped {
                job_id: job_id.to_string(),
            });
        }
        if let Err(e) = self.machine.begin_writing(&job.production_id, self.clock.now()) {
            warn!(error = %e, "作品认领失败, 任务退回 pending");
            self.repos.job_repo.transition(
                job_id,
                ChapterJobStatus::Writing,
                ChapterJobStatus::Pending,
                self.clock.now(),
            )?;
            return Ok(JobOutcome::Skipped {
                job_id: job_id.to_string(),
            });
        }

        let record = self.repos.production_repo.get(&job.production_id)?;

        // ===== 生成 =====
        let content = match self.client.generate(build_chapter_prompt(&record, job)).await {
            Ok(output) => output.text,
            Err(e) => {
                return self.fail_job(
                    job,
                    ChapterJobStatus::Writing,
                    &format!("生成失败: {}", e),
                    None,
                    false,
                );
            }
        };

        // ===== 质检 =====
        self.advance(job_id, ChapterJobStatus::Writing, ChapterJobStatus::QualityCheck)?;
        let recent = self.repos.chapter_repo.recent_contents(
            &job.production_id,
            job.chapter_number,
            self.config.recent_chapter_window,
        )?;
        let context = QualityContext::from_production(&record.context, recent);
        let report = self.evaluator.evaluate(&content, &context);
        info!(
            overall = report.overall,
            action = %report.action,
            hard_failures = report.hard_failures.len(),
            "章节质检完成"
        );

        if report.passed() {
            return self.complete(job, &record, ChapterJobStatus::QualityCheck, content, &report);
        }
        if report.action == QualityAction::Fail {
            return self.fail_job(
                job,
                ChapterJobStatus::QualityCheck,
                "生成内容没有有效文字",
                Some(report.overall),
                false,
            );
        }

        // ===== 自动修复 =====
        self.advance(job_id, ChapterJobStatus::QualityCheck, ChapterJobStatus::Rewriting)?;
        let outcome = self
            .repair
            .run(content, report, &context, self.client.as_ref())
            .await;
        self.persist_attempts(job_id, &outcome.attempts)?;

        if outcome.report.passed() {
            return self.complete(
                job,
                &record,
                ChapterJobStatus::Rewriting,
                outcome.content,
                &outcome.report,
            );
        }

        let reason = outcome.reason.unwrap_or_else(|| {
            format!(
                "修复后最优版本未通过质检: overall={:.2} action={}",
                outcome.report.overall, outcome.report.action
            )
        });
        self.fail_job(
            job,
            ChapterJobStatus::Rewriting,
            &reason,
            Some(outcome.report.overall),
            true,
        )
    }

    fn advance(&self, job_id: &str, from: ChapterJobStatus, to: ChapterJobStatus) -> PipelineResult<()> {
        if !self.repos.job_repo.transition(job_id, from, to, self.clock.now())? {
            return Err(PipelineError::Conflict {
                entity: "chapter_write_job",
                id: job_id.to_string(),
                expected: from.to_string(),
            });
        }
        Ok(())
    }

    fn persist_attempts(&self, job_id: &str, attempts: &[RepairAttemptRecord]) -> PipelineResult<()> {
        let now = self.clock.now();
        for attempt in attempts {
            self.repos.attempt_repo.append(&RewriteAttempt {
                attempt_id: Uuid::new_v4().to_string(),
                job_id: job_id.to_string(),
                attempt_index: attempt.attempt_index as i32,
                score_before: attempt.score_before,
                score_after: attempt.score_after,
                action_after: attempt.action_after,
                accepted: attempt.accepted,
                instructions: attempt.instructions.clone(),
                created_at: now,
            })?;
        }
        Ok(())
    }

    fn complete(
        &self,
        job: &ChapterWriteJob,
        record: &ProductionRecord,
        from: ChapterJobStatus,
        content: String,
        report: &QualityReport,
    ) -> PipelineResult<JobOutcome> {
        let now = self.clock.now();
        let today = local_date(&self.config.reference_timezone, now);
        let summary = extractive_summary(&content, SUMMARY_MAX_CHARS);
        let chapter = Chapter {
            chapter_id: Uuid::new_v4().to_string(),
            production_id: record.production_id.clone(),
            chapter_number: job.chapter_number,
            content,
            word_count: report.word_count,
            quality_score: report.overall,
            summary: summary.clone(),
            is_visible: false,
            published_at: None,
            created_at: now,
        };
        self.repos.chapter_repo.upsert(&chapter)?;

        self.machine.record_completion(
            &record.production_id,
            &ChapterCompletion {
                chapter_number: job.chapter_number,
                summary,
                score: report.overall,
                power_level: report.detected_power_level,
            },
            today,
            now,
        )?;

        if !self.repos.job_repo.mark_completed(
            &job.job_id,
            from,
            &chapter.chapter_id,
            report.word_count,
            report.overall,
            now,
        )? {
            return Err(PipelineError::Conflict {
                entity: "chapter_write_job",
                id: job.job_id.clone(),
                expected: from.to_string(),
            });
        }

        let publish_scheduled = match self.publisher.schedule_publish(
            &record.production_id,
            &chapter.chapter_id,
            job.chapter_number,
            job.scheduled_slot,
            None,
            now,
        ) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "发布排期失败, 等待下一轮补排");
                false
            }
        };

        info!(score = report.overall, words = report.word_count, "章节任务完成");
        Ok(JobOutcome::Completed {
            job_id: job.job_id.clone(),
            chapter_number: job.chapter_number,
            score: report.overall,
            publish_scheduled,
        })
    }

    fn fail_job(
        &self,
        job: &ChapterWriteJob,
        from: ChapterJobStatus,
        reason: &str,
        final_score: Option<f64>,
        needs_human_review: bool,
    ) -> PipelineResult<JobOutcome> {
        let now = self.clock.now();
        if !self
            .repos
            .job_repo
            .mark_failed(&job.job_id, from, reason, final_score, needs_human_review, now)?
        {
            // 任务已被回收或另行处理, 失败不记到作品上
            self.machine.end_writing(&job.production_id, now)?;
            return Err(PipelineError::Conflict {
                entity: "chapter_write_job",
                id: job.job_id.clone(),
                expected: from.to_string(),
            });
        }
        self.machine.record_failure(
            &job.production_id,
            reason,
            self.config.pause_after_errors,
            now,
        )?;
        warn!(reason, needs_human_review, "章节任务失败");
        Ok(JobOutcome::Failed {
            job_id: job.job_id.clone(),
            reason: reason.to_string(),
            needs_human_review,
        })
    }
}
