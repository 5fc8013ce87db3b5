// ==========================================
// 连载生产流水线 - 发布排程器
// ==========================================
// 职责: 为已完成章节排定发布时间, 到期后发布
// 规则:
// - 时段换算一律使用参考时区, 与进程时区无关
// - 未指定时间: 今日窗口未结束则用今日 (不早于 now), 否则次日; 窗口内随机偏移
// - 发布 pass: scheduled 且到期, scheduled_time 升序
// - 重试 pass: failed 且 retry_count < 上限
// - 取消只允许在 scheduled 状态
// ==========================================

use crate::config::{PipelineConfig, SlotWindow};
use crate::domain::publish::PublishJob;
use crate::domain::types::{PublishSlot, PublishStatus};
use crate::engine::clock::{local_date, local_time, resolve_local};
use crate::engine::error::{PipelineError, PipelineResult};
use crate::repository::{ChapterRepository, PublishJobRepository};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 发布 pass 汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishPassSummary {
    pub published: usize,
    pub failed: usize,
    /// 认领失败 (已被其他执行者处理)
    pub skipped: usize,
}

/// 补排 pass 汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    pub scheduled: usize,
    pub failed: usize,
}

enum PublishResult {
    Published,
    Failed,
    Skipped,
}

pub struct PublishScheduler {
    publish_repo: Arc<PublishJobRepository>,
    chapter_repo: Arc<ChapterRepository>,
    config: Arc<PipelineConfig>,
}

impl PublishScheduler {
    pub fn new(
        publish_repo: Arc<PublishJobRepository>,
        chapter_repo: Arc<ChapterRepository>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            publish_repo,
            chapter_repo,
            config,
        }
    }

    fn window(&self, slot: PublishSlot) -> PipelineResult<&SlotWindow> {
        self.config
            .slot_window(slot)
            .ok_or_else(|| PipelineError::InvalidArgument(format!("未配置发布时段: {}", slot)))
    }

    /// 创建发布任务
    ///
    /// # 参数
    /// - time: 指定发布时间 (必须落在时段窗口内); None 时自动计算
    pub fn schedule_publish(
        &self,
        production_id: &str,
        chapter_id: &str,
        chapter_number: i32,
        slot: PublishSlot,
        time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> PipelineResult<PublishJob> {
        let window = self.window(slot)?;
        let tz = &self.config.reference_timezone;

        let scheduled_time = match time {
            Some(t) => {
                if !window.contains(local_time(tz, t)) {
                    return Err(PipelineError::InvalidArgument(format!(
                        "发布时间 {} 不在时段 {} 窗口内",
                        t, slot
                    )));
                }
                t
            }
            None => {
                let (start, end) = next_window(window, tz, now);
                let span = (end - start).num_seconds();
                let offset = if span > 0 {
                    rand::thread_rng().gen_range(0..span)
                } else {
                    0
                };
                start + Duration::seconds(offset)
            }
        };

        let job = PublishJob {
            publish_id: Uuid::new_v4().to_string(),
            production_id: production_id.to_string(),
            chapter_id: chapter_id.to_string(),
            chapter_number,
            scheduled_time,
            slot,
            status: PublishStatus::Scheduled,
            retry_count: 0,
            last_error: None,
            published_at: None,
            created_at: now,
            updated_at: now,
        };
        self.publish_repo.insert(&job)?;
        debug!(
            production_id,
            chapter_number,
            slot = %slot,
            scheduled_time = %scheduled_time,
            "发布任务已排期"
        );
        Ok(job)
    }

    /// 发布到期的 scheduled 任务
    pub fn run_publish_pass(&self, now: DateTime<Utc>) -> PipelineResult<PublishPassSummary> {
        let due = self.publish_repo.list_due(now)?;
        let summary = self.process(&due, PublishStatus::Scheduled, now);
        if summary.published + summary.failed > 0 {
            info!(
                published = summary.published,
                failed = summary.failed,
                skipped = summary.skipped,
                "发布 pass 完成"
            );
        }
        Ok(summary)
    }

    /// 重试未超过上限的 failed 任务
    pub fn run_retry_pass(&self, now: DateTime<Utc>) -> PipelineResult<PublishPassSummary> {
        let retryable = self
            .publish_repo
            .list_retryable(self.config.max_publish_retries)?;
        let summary = self.process(&retryable, PublishStatus::Failed, now);
        if !retryable.is_empty() {
            info!(
                published = summary.published,
                failed = summary.failed,
                "发布重试 pass 完成"
            );
        }
        Ok(summary)
    }

    /// 为已完成却没有发布任务的章节补排发布 (执行器排期失败后的补救)
    pub fn schedule_missing(&self, now: DateTime<Utc>) -> PipelineResult<BackfillSummary> {
        let mut summary = BackfillSummary::default();
        for chapter in self.chapter_repo.list_unscheduled()? {
            match self.schedule_publish(
                &chapter.production_id,
                &chapter.chapter_id,
                chapter.chapter_number,
                chapter.slot,
                None,
                now,
            ) {
                Ok(_) => summary.scheduled += 1,
                Err(e) => {
                    warn!(
                        error = %e,
                        production_id = %chapter.production_id,
                        chapter = chapter.chapter_number,
                        "补排发布失败"
                    );
                    summary.failed += 1;
                }
            }
        }
        if summary.scheduled > 0 {
            info!(rescheduled = summary.scheduled, "遗漏的发布任务已补排");
        }
        Ok(summary)
    }

    /// 取消发布 (仅 scheduled)
    pub fn cancel_publish(&self, publish_id: &str, now: DateTime<Utc>) -> PipelineResult<()> {
        let job = self.publish_repo.get(publish_id)?;
        if !job.status.can_transition_to(PublishStatus::Cancelled) {
            return Err(PipelineError::InvalidTransition {
                entity: "publish_job",
                id: publish_id.to_string(),
                from: job.status.to_string(),
                to: PublishStatus::Cancelled.to_string(),
            });
        }
        let cancelled = self.publish_repo.transition(
            publish_id,
            PublishStatus::Scheduled,
            PublishStatus::Cancelled,
            now,
        )?;
        if !cancelled {
            return Err(PipelineError::Conflict {
                entity: "publish_job",
                id: publish_id.to_string(),
                expected: PublishStatus::Scheduled.to_string(),
            });
        }
        info!(publish_id, "发布任务已取消");
        Ok(())
    }

    /// 时刻所属的发布时段 (不在任何窗口内返回 None)
    pub fn slot_for_time(&self, time: DateTime<Utc>) -> Option<PublishSlot> {
        let local = local_time(&self.config.reference_timezone, time);
        self.config
            .publish_slots
            .iter()
            .find(|w| w.contains(local))
            .map(|w| w.slot)
    }

    fn process(&self, jobs: &[PublishJob], from: PublishStatus, now: DateTime<Utc>) -> PublishPassSummary {
        let mut summary = PublishPassSummary::default();
        for job in jobs {
            match self.publish_one(job, from, now) {
                Ok(PublishResult::Published) => summary.published += 1,
                Ok(PublishResult::Failed) => summary.failed += 1,
                Ok(PublishResult::Skipped) => summary.skipped += 1,
                Err(e) => {
                    warn!(publish_id = %job.publish_id, error = %e, "发布任务处理失败");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    fn publish_one(
        &self,
        job: &PublishJob,
        from: PublishStatus,
        now: DateTime<Utc>,
    ) -> PipelineResult<PublishResult> {
        if !self
            .publish_repo
            .transition(&job.publish_id, from, PublishStatus::Publishing, now)?
        {
            return Ok(PublishResult::Skipped);
        }

        let error = match self.chapter_repo.mark_visible(&job.chapter_id, now) {
            Ok(true) => None,
            Ok(false) => Some(format!("章节不存在: {}", job.chapter_id)),
            Err(e) => Some(e.to_string()),
        };

        match error {
            None => {
                self.publish_repo.mark_published(&job.publish_id, now)?;
                info!(
                    publish_id = %job.publish_id,
                    production_id = %job.production_id,
                    chapter_number = job.chapter_number,
                    "章节已发布"
                );
                Ok(PublishResult::Published)
            }
            Some(message) => {
                warn!(
                    publish_id = %job.publish_id,
                    retry_count = job.retry_count,
                    error = %message,
                    "章节发布失败"
                );
                self.publish_repo.mark_failed(&job.publish_id, &message, now)?;
                Ok(PublishResult::Failed)
            }
        }
    }
}

/// 时段下一次可用的发布区间 [start, end)
///
/// 今日窗口尚未结束: [max(start, now), end); 否则次日完整窗口
pub fn next_window(window: &SlotWindow, tz: &Tz, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = local_date(tz, now);
    let (start, end) = window_on(window, tz, today);
    if end > now {
        return (start.max(now), end);
    }
    let tomorrow = today.succ_opt().unwrap_or(today);
    window_on(window, tz, tomorrow)
}

fn window_on(window: &SlotWindow, tz: &Tz, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        resolve_local(tz, date.and_time(window.start)),
        resolve_local(tz, date.and_time(window.end)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, ensure_schema};
    use crate::domain::chapter::Chapter;
    use crate::domain::production::WorkPlan;
    use crate::engine::production::ProductionStateMachine;
    use crate::repository::ProductionRepository;
    use chrono::NaiveTime;
    use rusqlite::Connection;
    use std::sync::Mutex;

    struct Fixture {
        scheduler: PublishScheduler,
        publish_repo: Arc<PublishJobRepository>,
        chapter_repo: Arc<ChapterRepository>,
        production_id: String,
    }

    fn fixture() -> Fixture {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let production_repo = Arc::new(ProductionRepository::new(conn.clone()));
        let publish_repo = Arc::new(PublishJobRepository::new(conn.clone()));
        let chapter_repo = Arc::new(ChapterRepository::new(conn));
        let machine = ProductionStateMachine::new(production_repo, 3);
        let plan = WorkPlan {
            title: "发布测试".to_string(),
            priority: 0,
            total_chapters: None,
            chapters_per_day: None,
            synopsis: String::new(),
            objectives: vec![],
            dead_characters: vec![],
            realm_ladder: vec![],
            initial_power_level: None,
            arc_max_power_delta: None,
            arc_length: None,
        };
        let production_id = machine.admit(&plan, shanghai(8, 0)).unwrap().production_id;
        Fixture {
            scheduler: PublishScheduler::new(
                publish_repo.clone(),
                chapter_repo.clone(),
                Arc::new(PipelineConfig::default()),
            ),
            publish_repo,
            chapter_repo,
            production_id,
        }
    }

    /// 上海 2026-05-01 本地时刻
    fn shanghai(hour: u32, minute: u32) -> DateTime<Utc> {
        resolve_local(
            &chrono_tz::Asia::Shanghai,
            NaiveDate::from_ymd_opt(2026, 5, 1)
                .unwrap()
                .and_hms_opt(hour, minute, 0)
                .unwrap(),
        )
    }

    fn insert_chapter(f: &Fixture, number: i32) -> Chapter {
        let chapter = Chapter {
            chapter_id: format!("C{}", number),
            production_id: f.production_id.clone(),
            chapter_number: number,
            content: "正文".to_string(),
            word_count: 2,
            quality_score: 80.0,
            summary: String::new(),
            is_visible: false,
            published_at: None,
            created_at: shanghai(8, 0),
        };
        f.chapter_repo.upsert(&chapter).unwrap();
        chapter
    }

    #[test]
    fn test_due_job_is_published_and_chapter_visible() {
        let f = fixture();
        let chapter = insert_chapter(&f, 1);
        let now = shanghai(8, 30);
        let job = f
            .scheduler
            .schedule_publish(
                &f.production_id,
                &chapter.chapter_id,
                1,
                PublishSlot::Morning,
                Some(now - Duration::minutes(10)),
                now,
            )
            .unwrap();

        let summary = f.scheduler.run_publish_pass(now).unwrap();
        assert_eq!(summary.published, 1);
        assert_eq!(f.publish_repo.get(&job.publish_id).unwrap().status, PublishStatus::Published);
        assert!(f.chapter_repo.find_by_id("C1").unwrap().unwrap().is_visible);
    }

    #[test]
    fn test_explicit_time_outside_window_is_rejected() {
        let f = fixture();
        let result = f.scheduler.schedule_publish(
            &f.production_id,
            "C1",
            1,
            PublishSlot::Morning,
            Some(shanghai(11, 0)),
            shanghai(7, 0),
        );
        assert!(matches!(result, Err(PipelineError::InvalidArgument(_))));
    }

    #[test]
    fn test_auto_time_falls_inside_window() {
        let f = fixture();
        let tz = chrono_tz::Asia::Shanghai;
        for now in [shanghai(7, 0), shanghai(9, 30), shanghai(23, 0)] {
            let job = f
                .scheduler
                .schedule_publish(&f.production_id, "C1", 1, PublishSlot::Morning, None, now)
                .unwrap();
            assert!(job.scheduled_time >= now);
            assert_eq!(f.scheduler.slot_for_time(job.scheduled_time), Some(PublishSlot::Morning));
            let window = PipelineConfig::default().publish_slots[0].clone();
            assert!(window.contains(local_time(&tz, job.scheduled_time)));
        }
    }

    #[test]
    fn test_next_window_rolls_to_tomorrow_after_end() {
        let window = SlotWindow::new(
            PublishSlot::Morning,
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            1,
        );
        let tz = chrono_tz::Asia::Shanghai;
        let (start, _) = next_window(&window, &tz, shanghai(10, 0));
        assert_eq!(local_date(&tz, start), NaiveDate::from_ymd_opt(2026, 5, 2).unwrap());

        let (start, end) = next_window(&window, &tz, shanghai(9, 0));
        assert_eq!(start, shanghai(9, 0));
        assert_eq!(end, shanghai(10, 0));
    }

    #[test]
    fn test_missing_chapter_fails_then_retry_succeeds() {
        let f = fixture();
        let now = shanghai(8, 30);
        let job = f
            .scheduler
            .schedule_publish(&f.production_id, "C7", 7, PublishSlot::Morning, Some(shanghai(8, 0)), now)
            .unwrap();

        let summary = f.scheduler.run_publish_pass(now).unwrap();
        assert_eq!(summary.failed, 1);
        let failed = f.publish_repo.get(&job.publish_id).unwrap();
        assert_eq!(failed.status, PublishStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert!(failed.last_error.is_some());

        insert_chapter(&f, 7);
        let summary = f.scheduler.run_retry_pass(now).unwrap();
        assert_eq!(summary.published, 1);
    }

    #[test]
    fn test_retry_ceiling_is_respected() {
        let f = fixture();
        let now = shanghai(8, 30);
        let job = f
            .scheduler
            .schedule_publish(&f.production_id, "C9", 9, PublishSlot::Morning, Some(shanghai(8, 0)), now)
            .unwrap();
        f.scheduler.run_publish_pass(now).unwrap();
        for _ in 0..5 {
            f.scheduler.run_retry_pass(now).unwrap();
        }
        let job = f.publish_repo.get(&job.publish_id).unwrap();
        assert_eq!(job.retry_count, PipelineConfig::default().max_publish_retries);
        assert_eq!(job.status, PublishStatus::Failed);
    }

    #[test]
    fn test_cancel_only_while_scheduled() {
        let f = fixture();
        insert_chapter(&f, 1);
        let now = shanghai(8, 30);
        let job = f
            .scheduler
            .schedule_publish(&f.production_id, "C1", 1, PublishSlot::Morning, Some(shanghai(8, 0)), now)
            .unwrap();
        f.scheduler.run_publish_pass(now).unwrap();
        assert!(matches!(
            f.scheduler.cancel_publish(&job.publish_id, now),
            Err(PipelineError::InvalidTransition { .. })
        ));

        let pending = f
            .scheduler
            .schedule_publish(&f.production_id, "C1", 1, PublishSlot::Evening, None, now)
            .unwrap();
        f.scheduler.cancel_publish(&pending.publish_id, now).unwrap();
        assert_eq!(
            f.publish_repo.get(&pending.publish_id).unwrap().status,
            PublishStatus::Cancelled
        );
    }
}
