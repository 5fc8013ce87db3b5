// ==========================================
// 连载生产流水线 - 作品生产状态机
// ==========================================
// 红线: 作品记录只能经由本状态机修改
// 并发: 每次写回都是 WHERE status = 读取时状态 的条件更新
// 状态图:
//   queued -> active <-> writing
//   active/writing -> paused (连续失败达到阈值) -> active (人工恢复)
//   active/writing -> finished (写满计划章数)
// ==========================================

use crate::domain::production::{ProductionRecord, WorkPlan};
use crate::domain::types::ProductionStatus;
use crate::engine::error::{PipelineError, PipelineResult};
use crate::repository::{ProductionRepository, ProductionStatusCounts};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// 一章成功写完后回写到作品的信息
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterCompletion {
    pub chapter_number: i32,
    pub summary: String,
    pub score: f64,
    /// 本章检测到的战力等级
    pub power_level: Option<i32>,
}

pub struct ProductionStateMachine {
    repo: Arc<ProductionRepository>,
    default_chapters_per_day: i32,
}

impl ProductionStateMachine {
    pub fn new(repo: Arc<ProductionRepository>, default_chapters_per_day: i32) -> Self {
        Self {
            repo,
            default_chapters_per_day: default_chapters_per_day.max(1),
        }
    }

    // ==========================================
    // 入队 / 激活
    // ==========================================

    /// 由已接受的计划创建 queued 记录
    pub fn admit(&self, plan: &WorkPlan, now: DateTime<Utc>) -> PipelineResult<ProductionRecord> {
        if plan.title.trim().is_empty() {
            return Err(PipelineError::InvalidArgument("作品标题不能为空".to_string()));
        }
        if matches!(plan.total_chapters, Some(total) if total <= 0) {
            return Err(PipelineError::InvalidArgument(
                "total_chapters 必须为正数".to_string(),
            ));
        }
        if matches!(plan.chapters_per_day, Some(per_day) if per_day <= 0) {
            return Err(PipelineError::InvalidArgument(
                "chapters_per_day 必须为正数".to_string(),
            ));
        }

        let record = ProductionRecord::from_plan(
            Uuid::new_v4().to_string(),
            plan,
            self.default_chapters_per_day,
            now,
        );
        self.repo.insert(&record)?;
        info!(
            production_id = %record.production_id,
            title = %record.title,
            priority = record.priority,
            "作品已入队"
        );
        Ok(record)
    }

    /// 晋升最多 n 个排队作品, 激活总数不超过 max_active
    pub fn activate(
        &self,
        n: usize,
        max_active: usize,
        now: DateTime<Utc>,
    ) -> PipelineResult<Vec<String>> {
        let promoted = self.repo.promote_queued(n, max_active, now)?;
        if !promoted.is_empty() {
            info!(count = promoted.len(), max_active, "排队作品已激活");
        }
        Ok(promoted)
    }

    // ==========================================
    // 写作认领
    // ==========================================

    /// active -> writing
    pub fn begin_writing(&self, production_id: &str, now: DateTime<Utc>) -> PipelineResult<()> {
        let claimed = self.repo.transition_status(
            production_id,
            ProductionStatus::Active,
            ProductionStatus::Writing,
            now,
        )?;
        if !claimed {
            return Err(PipelineError::Conflict {
                entity: "production",
                id: production_id.to_string(),
                expected: ProductionStatus::Active.to_string(),
            });
        }
        Ok(())
    }

    /// writing -> active (记录已不在 writing 时返回 false)
    pub fn end_writing(&self, production_id: &str, now: DateTime<Utc>) -> PipelineResult<bool> {
        Ok(self.repo.transition_status(
            production_id,
            ProductionStatus::Writing,
            ProductionStatus::Active,
            now,
        )?)
    }

    /// 进程中断后残留在 writing 且没有执行中任务的作品退回 active
    pub fn release_idle_writers(&self, now: DateTime<Utc>) -> PipelineResult<usize> {
        Ok(self.repo.release_idle_writers(now)?)
    }

    // ==========================================
    // 结果回写
    // ==========================================

    /// 章节完成
    ///
    /// - current_chapter 取 max, 不回退
    /// - 评分入窗口, 错误计数清零, 摘要追加
    /// - 今日配额计数 +1 (跨日则从 1 开始)
    /// - 写满计划章数 -> finished; 否则 writing 回到 active, paused 保持
    pub fn record_completion(
        &self,
        production_id: &str,
        completion: &ChapterCompletion,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> PipelineResult<ProductionRecord> {
        let mut record = self.repo.get(production_id)?;
        let expected = record.status;
        if matches!(expected, ProductionStatus::Queued | ProductionStatus::Finished) {
            return Err(PipelineError::InvalidTransition {
                entity: "production",
                id: production_id.to_string(),
                from: expected.to_string(),
                to: "chapter_completed".to_string(),
            });
        }

        record.current_chapter = record.current_chapter.max(completion.chapter_number);
        record.score_history.push(completion.score);
        record.consecutive_error_count = 0;
        record
            .context
            .append_summary(completion.chapter_number, &completion.summary);
        if let Some(level) = completion.power_level {
            record.context.power_level = Some(level);
        }

        if record.last_write_date == Some(today) {
            record.chapters_written_today += 1;
        } else {
            record.last_write_date = Some(today);
            record.chapters_written_today = 1;
        }

        if record.is_complete() && expected.can_transition_to(ProductionStatus::Finished) {
            record.status = ProductionStatus::Finished;
            record.finished_at = Some(now);
        } else if expected == ProductionStatus::Writing {
            record.status = ProductionStatus::Active;
        }
        record.updated_at = now;

        self.write_back(&record, expected)?;
        info!(
            production_id,
            chapter_number = completion.chapter_number,
            current_chapter = record.current_chapter,
            score = completion.score,
            status = %record.status,
            "章节完成已回写"
        );
        Ok(record)
    }

    /// 章节失败
    ///
    /// 连续错误达到阈值 -> paused (原因即错误信息); 否则 writing 回到 active
    pub fn record_failure(
        &self,
        production_id: &str,
        message: &str,
        pause_threshold: i32,
        now: DateTime<Utc>,
    ) -> PipelineResult<ProductionRecord> {
        let mut record = self.repo.get(production_id)?;
        let expected = record.status;
        record.consecutive_error_count += 1;

        if record.consecutive_error_count >= pause_threshold
            && expected.can_transition_to(ProductionStatus::Paused)
        {
            record.status = ProductionStatus::Paused;
            record.paused_at = Some(now);
            record.pause_reason = Some(message.to_string());
            warn!(
                production_id,
                consecutive_errors = record.consecutive_error_count,
                reason = message,
                "连续失败达到阈值, 作品已暂停"
            );
        } else if expected == ProductionStatus::Writing {
            record.status = ProductionStatus::Active;
        }
        record.updated_at = now;

        self.write_back(&record, expected)?;
        Ok(record)
    }

    /// 人工恢复: paused / error -> active, 清空错误计数
    pub fn resume_production(
        &self,
        production_id: &str,
        now: DateTime<Utc>,
    ) -> PipelineResult<ProductionRecord> {
        let mut record = self.repo.get(production_id)?;
        let expected = record.status;
        if !matches!(expected, ProductionStatus::Paused | ProductionStatus::Error) {
            return Err(PipelineError::InvalidTransition {
                entity: "production",
                id: production_id.to_string(),
                from: expected.to_string(),
                to: ProductionStatus::Active.to_string(),
            });
        }

        record.status = ProductionStatus::Active;
        record.consecutive_error_count = 0;
        record.paused_at = None;
        record.pause_reason = None;
        record.updated_at = now;

        self.write_back(&record, expected)?;
        info!(production_id, "作品已恢复生产");
        Ok(record)
    }

    /// 参考时区跨日后清零每日计数 (同日重复调用无副作用)
    pub fn reset_daily_counters(&self, today: NaiveDate, now: DateTime<Utc>) -> PipelineResult<usize> {
        let reset = self.repo.reset_daily_counters(today, now)?;
        if reset > 0 {
            info!(%today, reset, "每日计数已清零");
        }
        Ok(reset)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get(&self, production_id: &str) -> PipelineResult<ProductionRecord> {
        Ok(self.repo.get(production_id)?)
    }

    pub fn list_by_status(&self, status: ProductionStatus) -> PipelineResult<Vec<ProductionRecord>> {
        Ok(self.repo.list_by_status(status)?)
    }

    pub fn count_by_status(&self) -> PipelineResult<ProductionStatusCounts> {
        Ok(self.repo.count_by_status()?)
    }

    fn write_back(&self, record: &ProductionRecord, expected: ProductionStatus) -> PipelineResult<()> {
        if !self.repo.update_if_status(record, expected)? {
            return Err(PipelineError::Conflict {
                entity: "production",
                id: record.production_id.clone(),
                expected: expected.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, ensure_schema};
    use chrono::{Duration, TimeZone};
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn machine() -> ProductionStateMachine {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        let repo = Arc::new(ProductionRepository::new(Arc::new(Mutex::new(conn))));
        ProductionStateMachine::new(repo, 3)
    }

    fn plan(title: &str, priority: i32, total: Option<i32>) -> WorkPlan {
        WorkPlan {
            title: title.to_string(),
            priority,
            total_chapters: total,
            chapters_per_day: None,
            synopsis: String::new(),
            objectives: vec![],
            dead_characters: vec![],
            realm_ladder: vec![],
            initial_power_level: None,
            arc_max_power_delta: None,
            arc_length: None,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 2, 0, 0).unwrap()
    }

    fn completion(n: i32) -> ChapterCompletion {
        ChapterCompletion {
            chapter_number: n,
            summary: format!("第{}章摘要", n),
            score: 80.0,
            power_level: None,
        }
    }

    #[test]
    fn test_admit_uses_default_chapters_per_day() {
        let sm = machine();
        let record = sm.admit(&plan("A", 0, Some(10)), t0()).unwrap();
        assert_eq!(record.status, ProductionStatus::Queued);
        assert_eq!(record.chapters_per_day, 3);
        assert!(sm.admit(&plan("  ", 0, None), t0()).is_err());
        assert!(sm.admit(&plan("B", 0, Some(0)), t0()).is_err());
    }

    #[test]
    fn test_activate_respects_priority_and_capacity() {
        let sm = machine();
        let low = sm.admit(&plan("low", 1, None), t0()).unwrap();
        let high = sm
            .admit(&plan("high", 5, None), t0() + Duration::seconds(1))
            .unwrap();
        let promoted = sm.activate(5, 1, t0()).unwrap();
        assert_eq!(promoted, vec![high.production_id.clone()]);
        assert!(sm.activate(5, 1, t0()).unwrap().is_empty());
        assert_eq!(sm.get(&low.production_id).unwrap().status, ProductionStatus::Queued);
    }

    #[test]
    fn test_completion_finishes_at_total() {
        let sm = machine();
        let id = sm.admit(&plan("A", 0, Some(2)), t0()).unwrap().production_id;
        sm.activate(1, 10, t0()).unwrap();
        let today = t0().date_naive();

        sm.begin_writing(&id, t0()).unwrap();
        let record = sm.record_completion(&id, &completion(1), today, t0()).unwrap();
        assert_eq!(record.status, ProductionStatus::Active);
        assert_eq!(record.chapters_written_today, 1);

        sm.begin_writing(&id, t0()).unwrap();
        let record = sm.record_completion(&id, &completion(2), today, t0()).unwrap();
        assert_eq!(record.status, ProductionStatus::Finished);
        assert_eq!(record.current_chapter, 2);
        assert_eq!(record.chapters_written_today, 2);
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn test_current_chapter_never_moves_backwards() {
        let sm = machine();
        let id = sm.admit(&plan("A", 0, None), t0()).unwrap().production_id;
        sm.activate(1, 10, t0()).unwrap();
        let today = t0().date_naive();
        sm.record_completion(&id, &completion(5), today, t0()).unwrap();
        let record = sm.record_completion(&id, &completion(3), today, t0()).unwrap();
        assert_eq!(record.current_chapter, 5);
    }

    #[test]
    fn test_failures_pause_at_threshold_and_resume_clears() {
        let sm = machine();
        let id = sm.admit(&plan("A", 0, None), t0()).unwrap().production_id;
        sm.activate(1, 10, t0()).unwrap();

        for _ in 0..2 {
            sm.begin_writing(&id, t0()).unwrap();
            let record = sm.record_failure(&id, "engine down", 3, t0()).unwrap();
            assert_eq!(record.status, ProductionStatus::Active);
        }
        sm.begin_writing(&id, t0()).unwrap();
        let record = sm.record_failure(&id, "engine down", 3, t0()).unwrap();
        assert_eq!(record.status, ProductionStatus::Paused);
        assert_eq!(record.pause_reason.as_deref(), Some("engine down"));

        let record = sm.resume_production(&id, t0()).unwrap();
        assert_eq!(record.status, ProductionStatus::Active);
        assert_eq!(record.consecutive_error_count, 0);
        assert!(sm.resume_production(&id, t0()).is_err());
    }

    #[test]
    fn test_begin_writing_requires_active() {
        let sm = machine();
        let id = sm.admit(&plan("A", 0, None), t0()).unwrap().production_id;
        assert!(matches!(
            sm.begin_writing(&id, t0()),
            Err(PipelineError::Conflict { .. })
        ));
    }

    #[test]
    fn test_daily_reset_is_idempotent() {
        let sm = machine();
        let id = sm.admit(&plan("A", 0, None), t0()).unwrap().production_id;
        sm.activate(1, 10, t0()).unwrap();
        let day1 = t0().date_naive();
        sm.record_completion(&id, &completion(1), day1, t0()).unwrap();

        let day2 = day1.succ_opt().unwrap();
        assert_eq!(sm.reset_daily_counters(day2, t0()).unwrap(), 1);
        assert_eq!(sm.reset_daily_counters(day2, t0()).unwrap(), 0);
        assert_eq!(sm.get(&id).unwrap().chapters_written_today, 0);
    }

    #[test]
    fn test_daily_reset_keeps_count_written_earlier_today() {
        let sm = machine();
        let id = sm.admit(&plan("A", 0, None), t0()).unwrap().production_id;
        sm.activate(1, 10, t0()).unwrap();
        let day2 = t0().date_naive().succ_opt().unwrap();

        // 主循环先于每日 tick 写了两章
        sm.record_completion(&id, &completion(1), day2, t0()).unwrap();
        sm.record_completion(&id, &completion(2), day2, t0()).unwrap();

        assert_eq!(sm.reset_daily_counters(day2, t0()).unwrap(), 1);
        let record = sm.get(&id).unwrap();
        assert_eq!(record.chapters_written_today, 2);
        assert_eq!(record.counters_reset_date, Some(day2));
        assert_eq!(record.chapters_needed_today(day2), 1);
    }
}
