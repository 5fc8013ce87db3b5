// ==========================================
// 连载生产流水线 - 每日统计仓储
// ==========================================

use crate::domain::stats::DailyStats;
use crate::repository::codec::{date_from_row, date_to_db};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub struct DailyStatsRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DailyStatsRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按日期覆盖写入 (同一天重复写入只保留最新值)
    pub fn upsert(&self, stats: &DailyStats) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO daily_stats (
                stat_date, queued_count, active_count, paused_count, finished_count,
                chapters_written, chapters_published, failed_jobs, avg_quality_score, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))
            ON CONFLICT(stat_date) DO UPDATE SET
                queued_count = excluded.queued_count,
                active_count = excluded.active_count,
                paused_count = excluded.paused_count,
                finished_count = excluded.finished_count,
                chapters_written = excluded.chapters_written,
                chapters_published = excluded.chapters_published,
                failed_jobs = excluded.failed_jobs,
                avg_quality_score = excluded.avg_quality_score,
                recorded_at = excluded.recorded_at
            "#,
            params![
                date_to_db(&stats.stat_date),
                stats.queued_count,
                stats.active_count,
                stats.paused_count,
                stats.finished_count,
                stats.chapters_written,
                stats.chapters_published,
                stats.failed_jobs,
                stats.avg_quality_score,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_date(&self, date: NaiveDate) -> RepositoryResult<Option<DailyStats>> {
        let conn = self.get_conn()?;
        let stats = conn
            .query_row(
                r#"
                SELECT stat_date, queued_count, active_count, paused_count, finished_count,
                       chapters_written, chapters_published, failed_jobs, avg_quality_score
                FROM daily_stats WHERE stat_date = ?1
                "#,
                params![date_to_db(&date)],
                |row| {
                    Ok(DailyStats {
                        stat_date: date_from_row(row, 0)?,
                        queued_count: row.get(1)?,
                        active_count: row.get(2)?,
                        paused_count: row.get(3)?,
                        finished_count: row.get(4)?,
                        chapters_written: row.get(5)?,
                        chapters_published: row.get(6)?,
                        failed_jobs: row.get(7)?,
                        avg_quality_score: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(stats)
    }

    pub fn count(&self) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM daily_stats", [], |row| row.get(0))?)
    }
}
