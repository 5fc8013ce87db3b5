// ==========================================
// 连载生产流水线 - 文本生成引擎契约
// ==========================================
// 生成引擎是外部协作方, 这里只定义调用契约与错误分类
// ==========================================

pub mod client;
pub mod limiter;
pub mod offline;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use client::{build_chapter_prompt, build_revision_prompt, GenerationClient};
pub use limiter::TokenBucket;
pub use offline::OfflineEngine;

/// 采样参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.95,
            max_tokens: 8_192,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub persona: String,
    pub sampling: SamplingParams,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub text: String,
    pub usage: GenerationUsage,
}

/// 生成错误分类
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// 可重试 (网络抖动、服务端 5xx 等)
    #[error("生成失败(可重试): {0}")]
    Retryable(String),

    /// 被限流, 由限流器推迟后续调用
    #[error("生成被限流")]
    RateLimited { retry_after: Option<Duration> },

    /// 不可重试 (安全拦截等)
    #[error("生成被拦截: {0}")]
    Blocked(String),

    #[error("生成超时 ({0:?})")]
    Timeout(Duration),

    #[error("生成重试耗尽 (共 {attempts} 次): {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

impl GenerationError {
    /// 是否允许在重试预算内再次尝试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::Retryable(_)
                | GenerationError::RateLimited { .. }
                | GenerationError::Timeout(_)
        )
    }
}

/// 文本生成引擎
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, GenerationError>;
}
