// ==========================================
// 连载生产流水线 - 发布任务仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 并发: scheduled/failed -> publishing 为条件认领
// ==========================================

use crate::domain::publish::PublishJob;
use crate::domain::types::PublishStatus;
use crate::repository::codec::{enum_from_row, opt_ts_from_row, opt_ts_to_db, ts_from_row, ts_to_db};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    publish_id, production_id, chapter_id, chapter_number, scheduled_time, slot,
    status, retry_count, last_error, published_at, created_at, updated_at
"#;

pub struct PublishJobRepository {
    conn: Arc<Mutex<Connection>>,
}

impl PublishJobRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, job: &PublishJob) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO publish_job (
                publish_id, production_id, chapter_id, chapter_number, scheduled_time, slot,
                status, retry_count, last_error, published_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                job.publish_id,
                job.production_id,
                job.chapter_id,
                job.chapter_number,
                ts_to_db(&job.scheduled_time),
                job.slot.as_str(),
                job.status.as_str(),
                job.retry_count,
                job.last_error,
                opt_ts_to_db(&job.published_at),
                ts_to_db(&job.created_at),
                ts_to_db(&job.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, publish_id: &str) -> RepositoryResult<Option<PublishJob>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM publish_job WHERE publish_id = ?1", SELECT_COLUMNS);
        Ok(conn.query_row(&sql, params![publish_id], map_row).optional()?)
    }

    pub fn get(&self, publish_id: &str) -> RepositoryResult<PublishJob> {
        self.find_by_id(publish_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "publish_job".to_string(),
                id: publish_id.to_string(),
            })
    }

    pub fn list_by_production(&self, production_id: &str) -> RepositoryResult<Vec<PublishJob>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM publish_job WHERE production_id = ?1 ORDER BY scheduled_time ASC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(params![production_id], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// 已到期的 scheduled 任务, scheduled_time 升序
    pub fn list_due(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<PublishJob>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM publish_job
            WHERE status = 'scheduled' AND scheduled_time <= ?1
            ORDER BY scheduled_time ASC, chapter_number ASC
            "#,
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(params![ts_to_db(&now)], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// 可重试的 failed 任务 (retry_count < max_retries), scheduled_time 升序
    pub fn list_retryable(&self, max_retries: i32) -> RepositoryResult<Vec<PublishJob>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM publish_job
            WHERE status = 'failed' AND retry_count < ?1
            ORDER BY scheduled_time ASC, chapter_number ASC
            "#,
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(params![max_retries], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// 条件状态翻转
    ///
    /// # 返回
    /// - Ok(false): 行状态已不是 from
    pub fn transition(
        &self,
        publish_id: &str,
        from: PublishStatus,
        to: PublishStatus,
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
            "UPDATE publish_job SET status = ?1, updated_at = ?2 WHERE publish_id = ?3 AND status = ?4",
            params![to.as_str(), ts_to_db(&now), publish_id, from.as_str()],
        )?;
        Ok(affected == 1)
    }

    pub fn mark_published(&self, publish_id: &str, now: DateTime<Utc>) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let now_str = ts_to_db(&now);
        let affected = conn.execute(
            r#"
            UPDATE publish_job
            SET status = 'published', published_at = ?1, last_error = NULL, updated_at = ?1
            WHERE publish_id = ?2 AND status = 'publishing'
            "#,
            params![now_str, publish_id],
        )?;
        Ok(affected == 1)
    }

    /// publishing -> failed, retry_count + 1
    pub fn mark_failed(&self, publish_id: &str, error: &str, now: DateTime<Utc>) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE publish_job
            SET status = 'failed', retry_count = retry_count + 1, last_error = ?1, updated_at = ?2
            WHERE publish_id = ?3 AND status = 'publishing'
            "#,
            params![error, ts_to_db(&now), publish_id],
        )?;
        Ok(affected == 1)
    }

    /// 区间内发布成功数 (按 published_at)
    pub fn count_published_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            r#"
            SELECT COUNT(*) FROM publish_job
            WHERE status = 'published' AND published_at >= ?1 AND published_at < ?2
            "#,
            params![ts_to_db(&start), ts_to_db(&end)],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn map_row(row: &Row) -> rusqlite::Result<PublishJob> {
    Ok(PublishJob {
        publish_id: row.get(0)?,
        production_id: row.get(1)?,
        chapter_id: row.get(2)?,
        chapter_number: row.get(3)?,
        scheduled_time: ts_from_row(row, 4)?,
        slot: enum_from_row(row, 5)?,
        status: enum_from_row(row, 6)?,
        retry_count: row.get(7)?,
        last_error: row.get(8)?,
        published_at: opt_ts_from_row(row, 9)?,
        created_at: ts_from_row(row, 10)?,
        updated_at: ts_from_row(row, 11)?,
    })
}
