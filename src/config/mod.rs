// ==========================================
// 连载生产流水线 - 配置层
// ==========================================
// 职责: 系统配置管理与启动校验
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod error;
pub mod pipeline_config;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager, GLOBAL_SCOPE};
pub use error::{ConfigError, ConfigResult};
pub use pipeline_config::{PipelineConfig, SlotWindow, DEFAULT_REFERENCE_TIMEZONE};
