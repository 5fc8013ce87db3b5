// ==========================================
// 连载生产流水线 - 章节排程器
// ==========================================
// 职责: 为 active 作品生成当日的章节写作任务
// 规则:
// - 今日需求 = 配额剩余 - 已有未结束任务 (重复 tick 不会重复排程)
// - 时段按配置顺序填满容量后再进入下一时段
// - 时段内均匀分布: start + 时长 / 容量 × 位置
// - 超出当日总容量的部分留给后续 tick
// - 章节号取 current_chapter 之上未被非失败任务占用的最小编号
// 红线: 单个作品的排程失败只记录, 不阻断其他作品
// ==========================================

use crate::config::{PipelineConfig, SlotWindow};
use crate::domain::chapter_job::ChapterWriteJob;
use crate::domain::production::ProductionRecord;
use crate::domain::types::{ProductionStatus, PublishSlot};
use crate::engine::clock::{local_date, local_day_bounds, resolve_local};
use crate::engine::error::PipelineResult;
use crate::engine::generation::offline::stable_seed;
use crate::repository::{ChapterJobRepository, ProductionRepository};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashSet};
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 计划未设定篇章长度时的强度波动周期
pub const DEFAULT_ARC_LENGTH: i32 = 12;

const MIN_INTENSITY: f64 = 1.0;
const MAX_INTENSITY: f64 = 10.0;

/// 单个作品的排程结果
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    pub production_id: String,
    pub jobs: Vec<ChapterWriteJob>,
    /// 当日时段容量不足而顺延的章数
    pub deferred: usize,
}

impl ScheduleOutcome {
    fn empty(production_id: &str) -> Self {
        Self {
            production_id: production_id.to_string(),
            jobs: Vec::new(),
            deferred: 0,
        }
    }
}

/// 一轮排程汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulePassSummary {
    pub jobs_created: usize,
    pub deferred: usize,
    pub errors: usize,
}

pub struct ChapterScheduler {
    production_repo: Arc<ProductionRepository>,
    job_repo: Arc<ChapterJobRepository>,
    config: Arc<PipelineConfig>,
}

impl ChapterScheduler {
    pub fn new(
        production_repo: Arc<ProductionRepository>,
        job_repo: Arc<ChapterJobRepository>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            production_repo,
            job_repo,
            config,
        }
    }

    /// 为全部 active 作品排程
    pub fn schedule_all(&self, now: DateTime<Utc>) -> PipelineResult<SchedulePassSummary> {
        let productions = self.production_repo.list_by_status(ProductionStatus::Active)?;
        let mut summary = SchedulePassSummary::default();

        for record in &productions {
            match self.schedule_production(record, now) {
                Ok(outcome) => {
                    summary.jobs_created += outcome.jobs.len();
                    summary.deferred += outcome.deferred;
                }
                Err(e) => {
                    warn!(
                        production_id = %record.production_id,
                        error = %e,
                        "作品排程失败, 跳过"
                    );
                    summary.errors += 1;
                }
            }
        }

        debug!(
            productions = productions.len(),
            jobs_created = summary.jobs_created,
            deferred = summary.deferred,
            errors = summary.errors,
            "排程完成"
        );
        Ok(summary)
    }

    /// 为单个作品排程当日任务
    pub fn schedule_production(
        &self,
        record: &ProductionRecord,
        now: DateTime<Utc>,
    ) -> PipelineResult<ScheduleOutcome> {
        let production_id = record.production_id.as_str();
        if record.status != ProductionStatus::Active || record.is_complete() {
            return Ok(ScheduleOutcome::empty(production_id));
        }

        let tz = &self.config.reference_timezone;
        let today = local_date(tz, now);
        let outstanding = self.job_repo.count_outstanding(production_id)?;
        let needed = i64::from(record.chapters_needed_today(today)) - outstanding;
        if needed <= 0 {
            return Ok(ScheduleOutcome::empty(production_id));
        }

        let live = self.job_repo.live_chapter_numbers(production_id)?;
        let numbers = next_chapter_numbers(
            record.current_chapter,
            record.total_chapters,
            &live,
            needed as usize,
        );
        if numbers.is_empty() {
            return Ok(ScheduleOutcome::empty(production_id));
        }

        // 今日已被占用的时段位置 (含已完成任务)
        let (day_start, day_end) = local_day_bounds(tz, today);
        let occupied: HashSet<DateTime<Utc>> = self
            .job_repo
            .scheduled_times_between(production_id, day_start, day_end)?
            .into_iter()
            .collect();
        let free: Vec<(PublishSlot, DateTime<Utc>)> =
            plan_slot_times(&self.config.publish_slots, tz, today)
                .into_iter()
                .filter(|(_, time)| !occupied.contains(time))
                .collect();

        let take = numbers.len().min(free.len());
        let deferred = numbers.len() - take;
        let planned_length = record
            .total_chapters
            .unwrap_or(self.config.default_planned_length);
        let arc_length = record.context.arc_length.unwrap_or(DEFAULT_ARC_LENGTH);

        let mut jobs = Vec::with_capacity(take);
        for (chapter_number, (slot, scheduled_time)) in numbers.into_iter().zip(free) {
            let job = ChapterWriteJob::new_pending(
                Uuid::new_v4().to_string(),
                record.production_id.clone(),
                chapter_number,
                slot,
                scheduled_time,
                record.context.running_summary.clone(),
                record.context.objectives.clone(),
                target_intensity(production_id, chapter_number, arc_length, planned_length),
                now,
            );
            self.job_repo.insert(&job)?;
            jobs.push(job);
        }

        if deferred > 0 {
            info!(
                production_id,
                deferred,
                slot_capacity = self.config.total_slot_capacity(),
                "当日时段容量不足, 剩余章节顺延"
            );
        }
        if !jobs.is_empty() {
            info!(
                production_id,
                count = jobs.len(),
                first_chapter = jobs[0].chapter_number,
                "章节任务已排程"
            );
        }

        Ok(ScheduleOutcome {
            production_id: record.production_id.clone(),
            jobs,
            deferred,
        })
    }
}

// ==========================================
// 纯函数
// ==========================================

/// current_chapter 之上未被占用的最小 count 个章节号, 不超过 total
pub fn next_chapter_numbers(
    current_chapter: i32,
    total_chapters: Option<i32>,
    live: &BTreeSet<i32>,
    count: usize,
) -> Vec<i32> {
    let mut numbers = Vec::with_capacity(count);
    let mut candidate = current_chapter + 1;
    while numbers.len() < count {
        if matches!(total_chapters, Some(total) if candidate > total) {
            break;
        }
        if !live.contains(&candidate) {
            numbers.push(candidate);
        }
        candidate += 1;
    }
    numbers
}

/// 某日全部时段位置 (时段按配置顺序, 时段内按位置)
pub fn plan_slot_times(
    slots: &[SlotWindow],
    tz: &Tz,
    date: NaiveDate,
) -> Vec<(PublishSlot, DateTime<Utc>)> {
    let mut times = Vec::new();
    for window in slots {
        if window.capacity == 0 {
            continue;
        }
        let step_secs = window.duration_minutes() * 60 / i64::from(window.capacity);
        for position in 0..window.capacity {
            let local = date.and_time(window.start) + Duration::seconds(step_secs * i64::from(position));
            times.push((window.slot, resolve_local(tz, local)));
        }
    }
    times
}

/// 目标强度: 波动项 + 进度项 + 抖动, 限制在 [1, 10]
///
/// 抖动由 (production_id, chapter) 决定, 同一章重复计算结果一致
pub fn target_intensity(
    production_id: &str,
    chapter_number: i32,
    arc_length: i32,
    planned_length: i32,
) -> f64 {
    let chapter = f64::from(chapter_number);
    let arc = f64::from(arc_length.max(1));
    let progress = (chapter / f64::from(planned_length.max(1))).min(1.0);

    let mut rng = StdRng::seed_from_u64(stable_seed(&[production_id, &chapter_number.to_string()]));
    let jitter: f64 = rng.gen_range(-0.5..=0.5);

    let raw = 4.0 + 2.0 * (2.0 * PI * chapter / arc).sin() + 4.0 * progress + jitter;
    raw.clamp(MIN_INTENSITY, MAX_INTENSITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, ensure_schema};
    use crate::domain::production::WorkPlan;
    use crate::domain::types::ChapterJobStatus;
    use crate::engine::clock::local_time;
    use crate::engine::production::ProductionStateMachine;
    use chrono::TimeZone;
    use rusqlite::Connection;
    use std::sync::Mutex;

    struct Fixture {
        machine: ProductionStateMachine,
        production_repo: Arc<ProductionRepository>,
        job_repo: Arc<ChapterJobRepository>,
        scheduler: ChapterScheduler,
    }

    fn fixture() -> Fixture {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let production_repo = Arc::new(ProductionRepository::new(conn.clone()));
        let job_repo = Arc::new(ChapterJobRepository::new(conn));
        Fixture {
            machine: ProductionStateMachine::new(production_repo.clone(), 3),
            scheduler: ChapterScheduler::new(
                production_repo.clone(),
                job_repo.clone(),
                Arc::new(PipelineConfig::default()),
            ),
            production_repo,
            job_repo,
        }
    }

    fn plan(per_day: i32, total: Option<i32>) -> WorkPlan {
        WorkPlan {
            title: "测试作品".to_string(),
            priority: 0,
            total_chapters: total,
            chapters_per_day: Some(per_day),
            synopsis: String::new(),
            objectives: vec!["找到师父".to_string()],
            dead_characters: vec![],
            realm_ladder: vec![],
            initial_power_level: None,
            arc_max_power_delta: None,
            arc_length: None,
        }
    }

    /// 上海 2026-05-01 07:00
    fn morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 30, 23, 0, 0).unwrap()
    }

    fn active_production(f: &Fixture, per_day: i32, total: Option<i32>) -> ProductionRecord {
        let id = f.machine.admit(&plan(per_day, total), morning()).unwrap().production_id;
        f.machine.activate(1, 10, morning()).unwrap();
        f.production_repo.get(&id).unwrap()
    }

    #[test]
    fn test_three_chapters_fill_three_slots() {
        let f = fixture();
        let record = active_production(&f, 3, None);
        let outcome = f.scheduler.schedule_production(&record, morning()).unwrap();

        assert_eq!(outcome.jobs.len(), 3);
        assert_eq!(outcome.deferred, 0);
        let config = PipelineConfig::default();
        let tz = config.reference_timezone;
        for (job, window) in outcome.jobs.iter().zip(&config.publish_slots) {
            assert_eq!(job.scheduled_slot, window.slot);
            assert!(window.contains(local_time(&tz, job.scheduled_time)));
        }
        let numbers: Vec<i32> = outcome.jobs.iter().map(|j| j.chapter_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_repeated_pass_does_not_double_schedule() {
        let f = fixture();
        active_production(&f, 3, None);
        let first = f.scheduler.schedule_all(morning()).unwrap();
        let second = f.scheduler.schedule_all(morning()).unwrap();
        assert_eq!(first.jobs_created, 3);
        assert_eq!(second.jobs_created, 0);
    }

    #[test]
    fn test_overflow_is_deferred() {
        let f = fixture();
        let record = active_production(&f, 5, None);
        let outcome = f.scheduler.schedule_production(&record, morning()).unwrap();
        assert_eq!(outcome.jobs.len(), 3);
        assert_eq!(outcome.deferred, 2);
    }

    #[test]
    fn test_never_schedules_past_total() {
        let f = fixture();
        let record = active_production(&f, 3, Some(2));
        let outcome = f.scheduler.schedule_production(&record, morning()).unwrap();
        assert_eq!(outcome.jobs.len(), 2);
        assert_eq!(outcome.deferred, 0);
    }

    #[test]
    fn test_failed_chapter_is_rescheduled_into_free_slot() {
        let f = fixture();
        let record = active_production(&f, 3, None);
        let outcome = f.scheduler.schedule_production(&record, morning()).unwrap();
        let first = &outcome.jobs[0];
        f.job_repo
            .mark_failed(&first.job_id, ChapterJobStatus::Pending, "boom", None, false, morning())
            .unwrap();

        let retry = f.scheduler.schedule_production(&record, morning()).unwrap();
        assert_eq!(retry.jobs.len(), 1);
        assert_eq!(retry.jobs[0].chapter_number, 1);
        assert_eq!(retry.jobs[0].scheduled_time, first.scheduled_time);
    }

    #[test]
    fn test_non_active_production_is_skipped() {
        let f = fixture();
        let queued = f.machine.admit(&plan(3, None), morning()).unwrap();
        let outcome = f.scheduler.schedule_production(&queued, morning()).unwrap();
        assert!(outcome.jobs.is_empty());
    }

    #[test]
    fn test_next_chapter_numbers_fill_gaps() {
        let live: BTreeSet<i32> = [5, 7].into_iter().collect();
        assert_eq!(next_chapter_numbers(4, None, &live, 3), vec![6, 8, 9]);
        assert_eq!(next_chapter_numbers(4, Some(7), &live, 3), vec![6]);
        assert!(next_chapter_numbers(10, Some(10), &BTreeSet::new(), 2).is_empty());
    }

    #[test]
    fn test_slot_positions_are_spread_evenly() {
        let window = SlotWindow::new(
            PublishSlot::Evening,
            chrono::NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            chrono::NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            3,
        );
        let date = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let times = plan_slot_times(&[window], &chrono_tz::UTC, date);
        let hours: Vec<u32> = times
            .iter()
            .map(|(_, t)| chrono::Timelike::hour(t))
            .collect();
        assert_eq!(hours, vec![19, 20, 21]);
    }

    #[test]
    fn test_intensity_is_stable_bounded_and_trends_upward() {
        assert_eq!(target_intensity("P", 17, 12, 300), target_intensity("P", 17, 12, 300));
        for chapter in 1..=400 {
            let v = target_intensity("P", chapter, 12, 300);
            assert!((MIN_INTENSITY..=MAX_INTENSITY).contains(&v));
        }
        let early: f64 = (1..=10).map(|c| target_intensity("P", c, 12, 300)).sum::<f64>() / 10.0;
        let late: f64 = (253..=262).map(|c| target_intensity("P", c, 12, 300)).sum::<f64>() / 10.0;
        assert!(late > early + 2.0);
    }
}
