// ==========================================
// 连载生产流水线 - 修复尝试审计仓储
// ==========================================
// 只追加, 不更新不删除
// ==========================================

use crate::domain::chapter_job::RewriteAttempt;
use crate::repository::codec::{enum_from_row, json_from_row, ts_from_row, ts_to_db};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

pub struct RewriteAttemptRepository {
    conn: Arc<Mutex<Connection>>,
}

impl RewriteAttemptRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn append(&self, attempt: &RewriteAttempt) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO rewrite_attempt (
                attempt_id, job_id, attempt_index, score_before, score_after,
                action_after, accepted, instructions_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                attempt.attempt_id,
                attempt.job_id,
                attempt.attempt_index,
                attempt.score_before,
                attempt.score_after,
                attempt.action_after.as_str(),
                attempt.accepted as i32,
                serde_json::to_string(&attempt.instructions)?,
                ts_to_db(&attempt.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn list_by_job(&self, job_id: &str) -> RepositoryResult<Vec<RewriteAttempt>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT attempt_id, job_id, attempt_index, score_before, score_after,
                   action_after, accepted, instructions_json, created_at
            FROM rewrite_attempt
            WHERE job_id = ?1
            ORDER BY attempt_index ASC
            "#,
        )?;
        let attempts = stmt
            .query_map(params![job_id], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(attempts)
    }
}

fn map_row(row: &Row) -> rusqlite::Result<RewriteAttempt> {
    Ok(RewriteAttempt {
        attempt_id: row.get(0)?,
        job_id: row.get(1)?,
        attempt_index: row.get(2)?,
        score_before: row.get(3)?,
        score_after: row.get(4)?,
        action_after: enum_from_row(row, 5)?,
        accepted: row.get::<_, i64>(6)? != 0,
        instructions: json_from_row(row, 7)?,
        created_at: ts_from_row(row, 8)?,
    })
}
