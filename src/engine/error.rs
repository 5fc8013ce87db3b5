// ==========================================
// 连载生产流水线 - 引擎层错误类型
// ==========================================

use crate::config::ConfigError;
use crate::engine::generation::GenerationError;
use crate::repository::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("无效的状态转换: {entity} id={id} {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    #[error("状态已被并发修改: {entity} id={id} 期望状态={expected}")]
    Conflict {
        entity: &'static str,
        id: String,
        expected: String,
    },

    #[error("参数无效: {0}")]
    InvalidArgument(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
