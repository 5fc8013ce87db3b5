// ==========================================
// 连载生产流水线 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 建表幂等 (CREATE ... IF NOT EXISTS)
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::path::PathBuf;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 默认数据库路径
///
/// - SERIAL_PIPELINE_DB_PATH 环境变量优先
/// - 否则使用用户数据目录下的 serial-pipeline/serial_pipeline.db
/// - 拿不到数据目录时回退到当前目录
pub fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var("SERIAL_PIPELINE_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./serial_pipeline.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("serial-pipeline");
        // 目录创建失败时后续打开连接会给出明确错误
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("serial_pipeline.db");
        }
    }
    path.to_string_lossy().to_string()
}

/// 建表（幂等）并写入 schema_version
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS production (
    production_id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    current_chapter INTEGER NOT NULL DEFAULT 0,
    total_chapters INTEGER,
    chapters_per_day INTEGER NOT NULL,
    last_write_date TEXT,
    chapters_written_today INTEGER NOT NULL DEFAULT 0,
    counters_reset_date TEXT,
    context_json TEXT NOT NULL,
    score_history_json TEXT NOT NULL,
    consecutive_error_count INTEGER NOT NULL DEFAULT 0,
    enqueued_at TEXT NOT NULL,
    activated_at TEXT,
    paused_at TEXT,
    finished_at TEXT,
    pause_reason TEXT,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_production_status
    ON production(status, priority DESC, enqueued_at ASC);

CREATE TABLE IF NOT EXISTS chapter_write_job (
    job_id TEXT PRIMARY KEY,
    production_id TEXT NOT NULL REFERENCES production(production_id) ON DELETE CASCADE,
    chapter_number INTEGER NOT NULL,
    status TEXT NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    scheduled_slot TEXT NOT NULL,
    scheduled_time TEXT NOT NULL,
    previous_summary TEXT NOT NULL DEFAULT '',
    objectives_json TEXT NOT NULL DEFAULT '[]',
    target_intensity REAL NOT NULL,
    chapter_id TEXT,
    word_count INTEGER,
    final_score REAL,
    needs_human_review INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- 失败的章节会以同一章节号重新排程, 因此唯一性只约束非失败任务
CREATE UNIQUE INDEX IF NOT EXISTS uq_chapter_job_live
    ON chapter_write_job(production_id, chapter_number)
    WHERE status != 'failed';

CREATE INDEX IF NOT EXISTS idx_chapter_job_status
    ON chapter_write_job(status, scheduled_time);

CREATE TABLE IF NOT EXISTS chapter (
    chapter_id TEXT PRIMARY KEY,
    production_id TEXT NOT NULL REFERENCES production(production_id) ON DELETE CASCADE,
    chapter_number INTEGER NOT NULL,
    content TEXT NOT NULL,
    word_count INTEGER NOT NULL,
    quality_score REAL NOT NULL,
    summary TEXT NOT NULL DEFAULT '',
    is_visible INTEGER NOT NULL DEFAULT 0,
    published_at TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (production_id, chapter_number)
);

CREATE TABLE IF NOT EXISTS rewrite_attempt (
    attempt_id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL,
    attempt_index INTEGER NOT NULL,
    score_before REAL NOT NULL,
    score_after REAL NOT NULL,
    action_after TEXT NOT NULL,
    accepted INTEGER NOT NULL,
    instructions_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rewrite_attempt_job
    ON rewrite_attempt(job_id, attempt_index);

CREATE TABLE IF NOT EXISTS publish_job (
    publish_id TEXT PRIMARY KEY,
    production_id TEXT NOT NULL REFERENCES production(production_id) ON DELETE CASCADE,
    chapter_id TEXT NOT NULL,
    chapter_number INTEGER NOT NULL,
    scheduled_time TEXT NOT NULL,
    slot TEXT NOT NULL,
    status TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    published_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_publish_job_status
    ON publish_job(status, scheduled_time);

CREATE TABLE IF NOT EXISTS daily_stats (
    stat_date TEXT PRIMARY KEY,
    queued_count INTEGER NOT NULL,
    active_count INTEGER NOT NULL,
    paused_count INTEGER NOT NULL,
    finished_count INTEGER NOT NULL,
    chapters_written INTEGER NOT NULL,
    chapters_published INTEGER NOT NULL,
    failed_jobs INTEGER NOT NULL,
    avg_quality_score REAL,
    recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_default_db_path_ends_with_db() {
        assert!(get_default_db_path().ends_with(".db"));
    }
}
