// ==========================================
// 连载生产流水线 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::error::{ConfigError, ConfigResult};
use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// 全局配置作用域
pub const GLOBAL_SCOPE: &str = "global";

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| ConfigError::Lock(e.to_string()))?;
            crate::db::configure_sqlite_connection(&guard)?;
        }
        Ok(Self { conn })
    }

    fn get_conn(&self) -> ConfigResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| ConfigError::Lock(e.to_string()))
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
                params![GLOBAL_SCOPE, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值 (UPSERT)
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET value = ?3, updated_at = datetime('now')
            "#,
            params![GLOBAL_SCOPE, key, value],
        )?;
        Ok(())
    }

    /// 读取并解析配置值, 缺省时返回 default
    ///
    /// 存在但无法解析时报错, 不静默回退
    pub fn get_parsed_or<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_global_config_value(key)? {
            None => Ok(default),
            Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
                message: e.to_string(),
            }),
        }
    }

    /// 读取布尔配置 (true/false/1/0)
    pub fn get_bool_or(&self, key: &str, default: bool) -> ConfigResult<bool> {
        match self.get_global_config_value(key)? {
            None => Ok(default),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw,
                    message: "期望布尔值".to_string(),
                }),
            },
        }
    }

    /// 读取 JSON 配置
    pub fn get_json_or<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        match self.get_global_config_value(key)? {
            None => Ok(default),
            Some(raw) => serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
                message: e.to_string(),
            }),
        }
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// # 用途
    /// - CLI status 输出
    /// - 排查线上配置
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, value FROM config_kv WHERE scope_id = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![GLOBAL_SCOPE], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }
        Ok(serde_json::to_string(&json!(config_map))?)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // ===== 容量 =====
    pub const MAX_ACTIVE_PRODUCTIONS: &str = "max_active_productions";
    pub const DEFAULT_CHAPTERS_PER_DAY: &str = "default_chapters_per_day";
    pub const DEFAULT_PLANNED_LENGTH: &str = "default_planned_length";

    // ===== 发布时段 =====
    pub const PUBLISH_SLOTS: &str = "publish_slots"; // JSON
    pub const REFERENCE_TIMEZONE: &str = "reference_timezone";
    pub const MAX_PUBLISH_RETRIES: &str = "max_publish_retries";

    // ===== 质检 / 修复 =====
    pub const QUALITY_THRESHOLDS: &str = "quality_thresholds"; // JSON
    pub const EXTENDED_QUALITY: &str = "extended_quality";
    pub const RECENT_CHAPTER_WINDOW: &str = "recent_chapter_window";
    pub const MAX_REPAIR_ATTEMPTS: &str = "max_repair_attempts";
    pub const REPAIR_TARGET_SCORE: &str = "repair_target_score";
    pub const REPAIR_MIN_IMPROVEMENT: &str = "repair_min_improvement";

    // ===== 错误处理 =====
    pub const PAUSE_AFTER_ERRORS: &str = "pause_after_errors";
    pub const ERROR_RETENTION_DAYS: &str = "error_retention_days";
    pub const STALE_JOB_MINUTES: &str = "stale_job_minutes";
    pub const MAX_JOB_ATTEMPTS: &str = "max_job_attempts";

    // ===== 执行 / 生成 =====
    pub const WORKER_COUNT: &str = "worker_count";
    pub const GENERATION_TIMEOUT_SECS: &str = "generation_timeout_secs";
    pub const GENERATION_MAX_RETRIES: &str = "generation_max_retries";
    pub const RATE_LIMIT_PER_MINUTE: &str = "rate_limit_per_minute";
    pub const RATE_LIMIT_BURST: &str = "rate_limit_burst";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ensure_schema;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_parsed_value_falls_back_to_default() {
        let cm = manager();
        assert_eq!(cm.get_parsed_or::<i64>(config_keys::WORKER_COUNT, 4).unwrap(), 4);

        cm.set_global_config_value(config_keys::WORKER_COUNT, "8").unwrap();
        assert_eq!(cm.get_parsed_or::<i64>(config_keys::WORKER_COUNT, 4).unwrap(), 8);
    }

    #[test]
    fn test_unparsable_value_is_an_error() {
        let cm = manager();
        cm.set_global_config_value(config_keys::WORKER_COUNT, "many").unwrap();
        let err = cm.get_parsed_or::<i64>(config_keys::WORKER_COUNT, 4).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        cm.set_global_config_value(config_keys::EXTENDED_QUALITY, "maybe").unwrap();
        assert!(cm.get_bool_or(config_keys::EXTENDED_QUALITY, false).is_err());
    }

    #[test]
    fn test_snapshot_contains_overrides() {
        let cm = manager();
        cm.set_global_config_value(config_keys::REFERENCE_TIMEZONE, "UTC").unwrap();
        let snapshot = cm.get_config_snapshot().unwrap();
        assert!(snapshot.contains("reference_timezone"));
        assert!(snapshot.contains("UTC"));
    }
}
