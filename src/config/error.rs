// ==========================================
// 连载生产流水线 - 配置层错误类型
// ==========================================

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置存储访问失败: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("配置锁获取失败: {0}")]
    Lock(String),

    #[error("配置值无效 (key={key}, value={value}): {message}")]
    InvalidValue {
        key: String,
        value: String,
        message: String,
    },

    #[error("未配置任何发布时段")]
    NoPublishSlots,

    #[error("发布时段无效: {0}")]
    InvalidSlot(String),

    #[error("参考时区无效: {0}")]
    InvalidTimezone(String),

    #[error("质检阈值不一致: {0}")]
    InvalidThresholds(String),

    #[error("配置不一致: {0}")]
    Inconsistent(String),

    #[error("序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
