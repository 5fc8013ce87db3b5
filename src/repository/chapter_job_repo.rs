// ==========================================
// 连载生产流水线 - 章节写作任务仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 并发: 认领是条件更新, 跨进程重启仍然成立, 不依赖进程内锁
// ==========================================

use crate::domain::chapter_job::ChapterWriteJob;
use crate::domain::types::ChapterJobStatus;
use crate::repository::codec::{enum_from_row, json_from_row, ts_from_row, ts_to_db};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    job_id, production_id, chapter_number, status, attempt_count,
    scheduled_slot, scheduled_time, previous_summary, objectives_json, target_intensity,
    chapter_id, word_count, final_score, needs_human_review, error_message,
    created_at, updated_at
"#;

/// 滞留任务回收结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaleRecovery {
    pub requeued: usize,
    pub failed: usize,
}

// ==========================================
// ChapterJobRepository
// ==========================================
pub struct ChapterJobRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ChapterJobRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, job: &ChapterWriteJob) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO chapter_write_job (
                job_id, production_id, chapter_number, status, attempt_count,
                scheduled_slot, scheduled_time, previous_summary, objectives_json, target_intensity,
                chapter_id, word_count, final_score, needs_human_review, error_message,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
            params![
                job.job_id,
                job.production_id,
                job.chapter_number,
                job.status.as_str(),
                job.attempt_count,
                job.scheduled_slot.as_str(),
                ts_to_db(&job.scheduled_time),
                job.previous_summary,
                serde_json::to_string(&job.objectives)?,
                job.target_intensity,
                job.chapter_id,
                job.word_count,
                job.final_score,
                job.needs_human_review as i32,
                job.error_message,
                ts_to_db(&job.created_at),
                ts_to_db(&job.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, job_id: &str) -> RepositoryResult<Option<ChapterWriteJob>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM chapter_write_job WHERE job_id = ?1", SELECT_COLUMNS);
        Ok(conn.query_row(&sql, params![job_id], map_row).optional()?)
    }

    /// 作品的全部任务, 章节号升序
    pub fn list_by_production(&self, production_id: &str) -> RepositoryResult<Vec<ChapterWriteJob>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM chapter_write_job WHERE production_id = ?1 ORDER BY chapter_number ASC, created_at ASC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(params![production_id], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// 已到期的待执行任务, 按作品 + 章节号升序
    pub fn list_due_pending(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<ChapterWriteJob>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM chapter_write_job
            WHERE status = 'pending' AND scheduled_time <= ?1
            ORDER BY production_id ASC, chapter_number ASC
            "#,
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(params![ts_to_db(&now)], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// 未结束任务数 (pending + 执行中)
    pub fn count_outstanding(&self, production_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            r#"
            SELECT COUNT(*) FROM chapter_write_job
            WHERE production_id = ?1
              AND status IN ('pending', 'writing', 'quality_check', 'rewriting')
            "#,
            params![production_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 非失败任务占用的章节号
    pub fn live_chapter_numbers(&self, production_id: &str) -> RepositoryResult<BTreeSet<i32>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT chapter_number FROM chapter_write_job WHERE production_id = ?1 AND status != 'failed'",
        )?;
        let numbers = stmt
            .query_map(params![production_id], |row| row.get::<_, i32>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(numbers)
    }

    /// 认领任务进入 writing
    ///
    /// 同一条件更新内同时保证:
    /// - 任务仍为 pending
    /// - 作品处于 active
    /// - 该作品没有其他执行中的任务
    /// - 该任务正好是下一章 (章节号升序执行)
    pub fn claim_for_writing(&self, job_id: &str, now: DateTime<Utc>) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE chapter_write_job
            SET status = 'writing', attempt_count = attempt_count + 1, updated_at = ?2
            WHERE job_id = ?1
              AND status = 'pending'
              AND EXISTS (
                  SELECT 1 FROM production p
                  WHERE p.production_id = chapter_write_job.production_id
                    AND p.status = 'active'
                    AND p.current_chapter + 1 = chapter_write_job.chapter_number
              )
              AND NOT EXISTS (
                  SELECT 1 FROM chapter_write_job other
                  WHERE other.production_id = chapter_write_job.production_id
                    AND other.job_id != chapter_write_job.job_id
                    AND other.status IN ('writing', 'quality_check', 'rewriting')
              )
            "#,
            params![job_id, ts_to_db(&now)],
        )?;
        Ok(affected == 1)
    }

    /// 条件状态翻转
    pub fn transition(
        &self,
        job_id: &str,
        from: ChapterJobStatus,
        to: ChapterJobStatus,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        if !from.can_transition_to(to) {
            return Err(RepositoryError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE chapter_write_job SET status = ?1, updated_at = ?2 WHERE job_id = ?3 AND status = ?4",
            params![to.as_str(), ts_to_db(&now), job_id, from.as_str()],
        )?;
        Ok(affected == 1)
    }

    /// 写入完成结果
    pub fn mark_completed(
        &self,
        job_id: &str,
        from: ChapterJobStatus,
        chapter_id: &str,
        word_count: i32,
        final_score: f64,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        if !from.can_transition_to(ChapterJobStatus::Completed) {
            return Err(RepositoryError::InvalidStateTransition {
                from: from.to_string(),
                to: ChapterJobStatus::Completed.to_string(),
            });
        }
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE chapter_write_job
            SET status = 'completed', chapter_id = ?1, word_count = ?2, final_score = ?3,
                error_message = NULL, updated_at = ?4
            WHERE job_id = ?5 AND status = ?6
            "#,
            params![
                chapter_id,
                word_count,
                final_score,
                ts_to_db(&now),
                job_id,
                from.as_str()
            ],
        )?;
        Ok(affected == 1)
    }

    /// 写入失败结果
    pub fn mark_failed(
        &self,
        job_id: &str,
        from: ChapterJobStatus,
        error_message: &str,
        final_score: Option<f64>,
        needs_human_review: bool,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        if !from.can_transition_to(ChapterJobStatus::Failed) {
            return Err(RepositoryError::InvalidStateTransition {
                from: from.to_string(),
                to: ChapterJobStatus::Failed.to_string(),
            });
        }
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE chapter_write_job
            SET status = 'failed', error_message = ?1, final_score = ?2,
                needs_human_review = ?3, updated_at = ?4
            WHERE job_id = ?5 AND status = ?6
            "#,
            params![
                error_message,
                final_score,
                needs_human_review as i32,
                ts_to_db(&now),
                job_id,
                from.as_str()
            ],
        )?;
        Ok(affected == 1)
    }

    /// 回收滞留在执行中的任务
    ///
    /// - attempt_count < max_attempts: 退回 pending
    /// - 否则: 标记 failed
    pub fn recover_stale(
        &self,
        stale_before: DateTime<Utc>,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> RepositoryResult<StaleRecovery> {
        let conn = self.get_conn()?;
        let stale_str = ts_to_db(&stale_before);
        let now_str = ts_to_db(&now);

        let failed = conn.execute(
            r#"
            UPDATE chapter_write_job
            SET status = 'failed', error_message = '执行中断且已达最大尝试次数', updated_at = ?1
            WHERE status IN ('writing', 'quality_check', 'rewriting')
              AND updated_at < ?2
              AND attempt_count >= ?3
            "#,
            params![now_str, stale_str, max_attempts],
        )?;

        let requeued = conn.execute(
            r#"
            UPDATE chapter_write_job
            SET status = 'pending', updated_at = ?1
            WHERE status IN ('writing', 'quality_check', 'rewriting')
              AND updated_at < ?2
              AND attempt_count < ?3
            "#,
            params![now_str, stale_str, max_attempts],
        )?;

        Ok(StaleRecovery { requeued, failed })
    }

    /// 清理已被后续成功覆盖的历史失败任务
    pub fn delete_resolved_failures(&self, older_than: DateTime<Utc>) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            DELETE FROM chapter_write_job
            WHERE status = 'failed'
              AND updated_at < ?1
              AND chapter_number <= (
                  SELECT p.current_chapter FROM production p
                  WHERE p.production_id = chapter_write_job.production_id
              )
            "#,
            params![ts_to_db(&older_than)],
        )?;
        Ok(affected)
    }

    /// 作品在区间内已被非失败任务占用的排期时刻 (按 scheduled_time)
    pub fn scheduled_times_between(
        &self,
        production_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<Vec<DateTime<Utc>>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT scheduled_time FROM chapter_write_job
            WHERE production_id = ?1 AND status != 'failed'
              AND scheduled_time >= ?2 AND scheduled_time < ?3
            ORDER BY scheduled_time ASC
            "#,
        )?;
        let times = stmt
            .query_map(
                params![production_id, ts_to_db(&start), ts_to_db(&end)],
                |row| ts_from_row(row, 0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(times)
    }

    /// 作品进度已越过的 pending 任务直接失败 (章节已由其他任务写出)
    pub fn supersede_obsolete_pending(&self, now: DateTime<Utc>) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE chapter_write_job
            SET status = 'failed', error_message = '章节已被覆盖', updated_at = ?1
            WHERE status = 'pending'
              AND chapter_number <= (
                  SELECT p.current_chapter FROM production p
                  WHERE p.production_id = chapter_write_job.production_id
              )
            "#,
            params![ts_to_db(&now)],
        )?;
        Ok(affected)
    }

    /// 区间内某状态的任务数 (按 updated_at)
    pub fn count_status_between(
        &self,
        status: ChapterJobStatus,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            r#"
            SELECT COUNT(*) FROM chapter_write_job
            WHERE status = ?1 AND updated_at >= ?2 AND updated_at < ?3
            "#,
            params![status.as_str(), ts_to_db(&start), ts_to_db(&end)],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn map_row(row: &Row) -> rusqlite::Result<ChapterWriteJob> {
    Ok(ChapterWriteJob {
        job_id: row.get(0)?,
        production_id: row.get(1)?,
        chapter_number: row.get(2)?,
        status: enum_from_row(row, 3)?,
        attempt_count: row.get(4)?,
        scheduled_slot: enum_from_row(row, 5)?,
        scheduled_time: ts_from_row(row, 6)?,
        previous_summary: row.get(7)?,
        objectives: json_from_row(row, 8)?,
        target_intensity: row.get(9)?,
        chapter_id: row.get(10)?,
        word_count: row.get(11)?,
        final_score: row.get(12)?,
        needs_human_review: row.get::<_, i64>(13)? != 0,
        error_message: row.get(14)?,
        created_at: ts_from_row(row, 15)?,
        updated_at: ts_from_row(row, 16)?,
    })
}
