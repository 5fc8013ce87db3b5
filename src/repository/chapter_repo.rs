// ==========================================
// 连载生产流水线 - 章节成品仓储
// ==========================================

use crate::domain::chapter::Chapter;
use crate::domain::types::PublishSlot;
use crate::repository::codec::{enum_from_row, opt_ts_from_row, opt_ts_to_db, ts_from_row, ts_to_db};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    chapter_id, production_id, chapter_number, content, word_count,
    quality_score, summary, is_visible, published_at, created_at
"#;

/// 已完成但没有任何发布任务的章节
#[derive(Debug, Clone, PartialEq)]
pub struct UnscheduledChapter {
    pub production_id: String,
    pub chapter_id: String,
    pub chapter_number: i32,
    pub slot: PublishSlot,
}

pub struct ChapterRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ChapterRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 写入章节; 同一 (作品, 章节号) 已存在时覆盖内容
    ///
    /// 中断后重新执行的任务会再次写入同一章节号
    pub fn upsert(&self, chapter: &Chapter) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO chapter (
                chapter_id, production_id, chapter_number, content, word_count,
                quality_score, summary, is_visible, published_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(production_id, chapter_number) DO UPDATE SET
                chapter_id = excluded.chapter_id,
                content = excluded.content,
                word_count = excluded.word_count,
                quality_score = excluded.quality_score,
                summary = excluded.summary,
                is_visible = excluded.is_visible,
                published_at = excluded.published_at,
                created_at = excluded.created_at
            "#,
            params![
                chapter.chapter_id,
                chapter.production_id,
                chapter.chapter_number,
                chapter.content,
                chapter.word_count,
                chapter.quality_score,
                chapter.summary,
                chapter.is_visible as i32,
                opt_ts_to_db(&chapter.published_at),
                ts_to_db(&chapter.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, chapter_id: &str) -> RepositoryResult<Option<Chapter>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM chapter WHERE chapter_id = ?1", SELECT_COLUMNS);
        Ok(conn.query_row(&sql, params![chapter_id], map_row).optional()?)
    }

    pub fn find_by_number(
        &self,
        production_id: &str,
        chapter_number: i32,
    ) -> RepositoryResult<Option<Chapter>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM chapter WHERE production_id = ?1 AND chapter_number = ?2",
            SELECT_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![production_id, chapter_number], map_row)
            .optional()?)
    }

    /// 最近 limit 章的正文, 章节号升序 (供重复度检测)
    pub fn recent_contents(
        &self,
        production_id: &str,
        before_chapter: i32,
        limit: usize,
    ) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT content FROM chapter
            WHERE production_id = ?1 AND chapter_number < ?2
            ORDER BY chapter_number DESC
            LIMIT ?3
            "#,
        )?;
        let mut contents = stmt
            .query_map(params![production_id, before_chapter, limit as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        contents.reverse();
        Ok(contents)
    }

    /// 不可见、对应任务已完成、且从未排过发布的章节
    ///
    /// 已取消的发布任务也算排过, 不会被重新捡回
    pub fn list_unscheduled(&self) -> RepositoryResult<Vec<UnscheduledChapter>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT c.production_id, c.chapter_id, c.chapter_number, j.scheduled_slot
            FROM chapter c
            JOIN chapter_write_job j
              ON j.chapter_id = c.chapter_id AND j.status = 'completed'
            WHERE c.is_visible = 0
              AND NOT EXISTS (
                  SELECT 1 FROM publish_job p WHERE p.chapter_id = c.chapter_id
              )
            ORDER BY c.production_id, c.chapter_number
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UnscheduledChapter {
                    production_id: row.get(0)?,
                    chapter_id: row.get(1)?,
                    chapter_number: row.get(2)?,
                    slot: enum_from_row(row, 3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// 发布可见
    pub fn mark_visible(&self, chapter_id: &str, published_at: DateTime<Utc>) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE chapter SET is_visible = 1, published_at = ?1 WHERE chapter_id = ?2",
            params![ts_to_db(&published_at), chapter_id],
        )?;
        Ok(affected == 1)
    }
}

fn map_row(row: &Row) -> rusqlite::Result<Chapter> {
    Ok(Chapter {
        chapter_id: row.get(0)?,
        production_id: row.get(1)?,
        chapter_number: row.get(2)?,
        content: row.get(3)?,
        word_count: row.get(4)?,
        quality_score: row.get(5)?,
        summary: row.get(6)?,
        is_visible: row.get::<_, i64>(7)? != 0,
        published_at: opt_ts_from_row(row, 8)?,
        created_at: ts_from_row(row, 9)?,
    })
}
