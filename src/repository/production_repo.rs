// ==========================================
// 连载生产流水线 - 作品生产记录仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 并发: 状态变更一律为条件更新 (WHERE status = 期望旧状态)
// ==========================================

use crate::domain::production::{ProductionContext, ProductionRecord, ScoreHistory};
use crate::domain::types::ProductionStatus;
use crate::repository::codec::{
    date_to_db, enum_from_row, json_from_row, opt_date_from_row, opt_date_to_db, opt_ts_from_row,
    opt_ts_to_db, ts_from_row, ts_to_db,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    production_id, title, priority, status, current_chapter, total_chapters,
    chapters_per_day, last_write_date, chapters_written_today, counters_reset_date,
    context_json, score_history_json, consecutive_error_count,
    enqueued_at, activated_at, paused_at, finished_at, pause_reason, updated_at
"#;

/// 按状态聚合计数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductionStatusCounts {
    pub counts: HashMap<ProductionStatus, i64>,
}

impl ProductionStatusCounts {
    pub fn get(&self, status: ProductionStatus) -> i64 {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// 占用激活名额的数量 (active + writing)
    pub fn occupying_capacity(&self) -> i64 {
        self.get(ProductionStatus::Active) + self.get(ProductionStatus::Writing)
    }
}

// ==========================================
// ProductionRepository
// ==========================================
pub struct ProductionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProductionRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 插入新记录
    pub fn insert(&self, record: &ProductionRecord) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO production (
                production_id, title, priority, status, current_chapter, total_chapters,
                chapters_per_day, last_write_date, chapters_written_today, counters_reset_date,
                context_json, score_history_json, consecutive_error_count,
                enqueued_at, activated_at, paused_at, finished_at, pause_reason, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            "#,
            params![
                record.production_id,
                record.title,
                record.priority,
                record.status.as_str(),
                record.current_chapter,
                record.total_chapters,
                record.chapters_per_day,
                opt_date_to_db(&record.last_write_date),
                record.chapters_written_today,
                opt_date_to_db(&record.counters_reset_date),
                serde_json::to_string(&record.context)?,
                serde_json::to_string(&record.score_history)?,
                record.consecutive_error_count,
                ts_to_db(&record.enqueued_at),
                opt_ts_to_db(&record.activated_at),
                opt_ts_to_db(&record.paused_at),
                opt_ts_to_db(&record.finished_at),
                record.pause_reason,
                ts_to_db(&record.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 按 ID 查询
    pub fn find_by_id(&self, production_id: &str) -> RepositoryResult<Option<ProductionRecord>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM production WHERE production_id = ?1", SELECT_COLUMNS);
        let record = conn
            .query_row(&sql, params![production_id], map_row)
            .optional()?;
        Ok(record)
    }

    /// 按 ID 查询（不存在时报错）
    pub fn get(&self, production_id: &str) -> RepositoryResult<ProductionRecord> {
        self.find_by_id(production_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "production".to_string(),
                id: production_id.to_string(),
            })
    }

    /// 按状态查询, 优先级降序 + 入队时间升序
    pub fn list_by_status(&self, status: ProductionStatus) -> RepositoryResult<Vec<ProductionRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM production WHERE status = ?1 ORDER BY priority DESC, enqueued_at ASC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![status.as_str()], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// 按状态聚合计数
    pub fn count_by_status(&self) -> RepositoryResult<ProductionStatusCounts> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM production GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((enum_from_row::<ProductionStatus>(row, 0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = ProductionStatusCounts::default();
        for row in rows {
            let (status, count) = row?;
            counts.counts.insert(status, count);
        }
        Ok(counts)
    }

    /// 条件整行更新
    ///
    /// # 返回
    /// - Ok(true): 更新成功
    /// - Ok(false): 行状态已不是 expected (被其他执行者抢先)
    pub fn update_if_status(
        &self,
        record: &ProductionRecord,
        expected: ProductionStatus,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE production SET
                title = ?2, priority = ?3, status = ?4, current_chapter = ?5,
                total_chapters = ?6, chapters_per_day = ?7, last_write_date = ?8,
                chapters_written_today = ?9, counters_reset_date = ?10,
                context_json = ?11, score_history_json = ?12, consecutive_error_count = ?13,
                activated_at = ?14, paused_at = ?15, finished_at = ?16, pause_reason = ?17,
                updated_at = ?18
            WHERE production_id = ?1 AND status = ?19
            "#,
            params![
                record.production_id,
                record.title,
                record.priority,
                record.status.as_str(),
                record.current_chapter,
                record.total_chapters,
                record.chapters_per_day,
                opt_date_to_db(&record.last_write_date),
                record.chapters_written_today,
                opt_date_to_db(&record.counters_reset_date),
                serde_json::to_string(&record.context)?,
                serde_json::to_string(&record.score_history)?,
                record.consecutive_error_count,
                opt_ts_to_db(&record.activated_at),
                opt_ts_to_db(&record.paused_at),
                opt_ts_to_db(&record.finished_at),
                record.pause_reason,
                ts_to_db(&record.updated_at),
                expected.as_str(),
            ],
        )?;
        Ok(affected == 1)
    }

    /// 条件状态翻转 (认领)
    pub fn transition_status(
        &self,
        production_id: &str,
        from: ProductionStatus,
        to: ProductionStatus,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE production SET status = ?1, updated_at = ?2 WHERE production_id = ?3 AND status = ?4",
            params![to.as_str(), ts_to_db(&now), production_id, from.as_str()],
        )?;
        Ok(affected == 1)
    }

    /// 在单个 IMMEDIATE 事务中读取激活数并晋升排队记录
    ///
    /// # 参数
    /// - n: 本次最多晋升数量
    /// - max_active: 激活(active + writing)总数上限
    ///
    /// # 返回
    /// 被晋升的 production_id 列表
    pub fn promote_queued(
        &self,
        n: usize,
        max_active: usize,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<String>> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let active: i64 = tx.query_row(
            "SELECT COUNT(*) FROM production WHERE status IN ('active', 'writing')",
            [],
            |row| row.get(0),
        )?;

        let room = (max_active as i64 - active).max(0) as usize;
        let take = n.min(room);
        if take == 0 {
            tx.commit()?;
            return Ok(Vec::new());
        }

        let candidates: Vec<String> = {
            let mut stmt = tx.prepare(
                r#"
                SELECT production_id FROM production
                WHERE status = 'queued'
                ORDER BY priority DESC, enqueued_at ASC
                LIMIT ?1
                "#,
            )?;
            let ids = stmt
                .query_map(params![take as i64], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };

        let now_str = ts_to_db(&now);
        let mut promoted = Vec::with_capacity(candidates.len());
        for id in candidates {
            let affected = tx.execute(
                r#"
                UPDATE production
                SET status = 'active', activated_at = ?1, updated_at = ?1
                WHERE production_id = ?2 AND status = 'queued'
                "#,
                params![now_str, id],
            )?;
            if affected == 1 {
                promoted.push(id);
            }
        }

        tx.commit()?;
        Ok(promoted)
    }

    /// 清零每日计数 (同一天内重复调用无副作用)
    ///
    /// 今日已有写作的记录只盖章不清零: 主循环可能先于每日 tick 跑过
    ///
    /// # 返回
    /// 本次盖章的记录数
    pub fn reset_daily_counters(&self, today: NaiveDate, now: DateTime<Utc>) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let today_str = date_to_db(&today);
        let affected = conn.execute(
            r#"
            UPDATE production
            SET chapters_written_today = CASE
                    WHEN last_write_date IS NULL OR last_write_date < ?1 THEN 0
                    ELSE chapters_written_today
                END,
                counters_reset_date = ?1,
                updated_at = ?2
            WHERE status != 'finished'
              AND (counters_reset_date IS NULL OR counters_reset_date < ?1)
            "#,
            params![today_str, ts_to_db(&now)],
        )?;
        Ok(affected)
    }

    /// 释放没有执行中任务的 writing 记录 (进程中断后的残留)
    pub fn release_idle_writers(&self, now: DateTime<Utc>) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE production
            SET status = 'active', updated_at = ?1
            WHERE status = 'writing'
              AND NOT EXISTS (
                  SELECT 1 FROM chapter_write_job j
                  WHERE j.production_id = production.production_id
                    AND j.status IN ('writing', 'quality_check', 'rewriting')
              )
            "#,
            params![ts_to_db(&now)],
        )?;
        Ok(affected)
    }

    /// 全部质量均分的平均值 (用于每日统计)
    pub fn average_quality(&self) -> RepositoryResult<Option<f64>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT score_history_json FROM production WHERE status != 'queued'",
        )?;
        let histories = stmt
            .query_map([], |row| json_from_row::<ScoreHistory>(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let averages: Vec<f64> = histories
            .into_iter()
            .filter_map(|h| h.normalized().average())
            .collect();
        if averages.is_empty() {
            Ok(None)
        } else {
            Ok(Some(averages.iter().sum::<f64>() / averages.len() as f64))
        }
    }
}

fn map_row(row: &Row) -> rusqlite::Result<ProductionRecord> {
    Ok(ProductionRecord {
        production_id: row.get(0)?,
        title: row.get(1)?,
        priority: row.get(2)?,
        status: enum_from_row(row, 3)?,
        current_chapter: row.get(4)?,
        total_chapters: row.get(5)?,
        chapters_per_day: row.get(6)?,
        last_write_date: opt_date_from_row(row, 7)?,
        chapters_written_today: row.get(8)?,
        counters_reset_date: opt_date_from_row(row, 9)?,
        context: json_from_row::<ProductionContext>(row, 10)?,
        score_history: json_from_row::<ScoreHistory>(row, 11)?.normalized(),
        consecutive_error_count: row.get(12)?,
        enqueued_at: ts_from_row(row, 13)?,
        activated_at: opt_ts_from_row(row, 14)?,
        paused_at: opt_ts_from_row(row, 15)?,
        finished_at: opt_ts_from_row(row, 16)?,
        pause_reason: row.get(17)?,
        updated_at: ts_from_row(row, 18)?,
    })
}
