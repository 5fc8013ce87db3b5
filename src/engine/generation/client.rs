// ==========================================
// 生成客户端 - 限流 + 超时 + 有界重试
// ==========================================
// 红线:
// - Blocked 永不重试
// - 重试预算是硬上限
// ==========================================

use super::{
    GenerationEngine, GenerationError, GenerationOutput, GenerationRequest, SamplingParams,
    TokenBucket,
};
use crate::config::PipelineConfig;
use crate::domain::chapter_job::ChapterWriteJob;
use crate::domain::production::ProductionRecord;
use crate::engine::repair::ChapterReviser;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_PERSONA: &str = "serial-novelist";
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

pub struct GenerationClient {
    engine: Arc<dyn GenerationEngine>,
    limiter: Arc<TokenBucket>,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
    persona: String,
    sampling: SamplingParams,
}

impl GenerationClient {
    pub fn new(
        engine: Arc<dyn GenerationEngine>,
        limiter: Arc<TokenBucket>,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            engine,
            limiter,
            timeout,
            max_retries,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            persona: DEFAULT_PERSONA.to_string(),
            sampling: SamplingParams::default(),
        }
    }

    pub fn from_config(engine: Arc<dyn GenerationEngine>, config: &PipelineConfig) -> Self {
        let limiter = Arc::new(TokenBucket::new(
            config.rate_limit_per_minute,
            config.rate_limit_burst,
        ));
        Self::new(
            engine,
            limiter,
            Duration::from_secs(config.generation_timeout_secs),
            config.generation_max_retries,
        )
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn limiter(&self) -> &Arc<TokenBucket> {
        &self.limiter
    }

    /// 生成一次, 失败时在预算内重试
    ///
    /// 总尝试次数 = 1 + max_retries
    pub async fn generate(&self, prompt: String) -> Result<GenerationOutput, GenerationError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.limiter.acquire().await;

            let request = GenerationRequest {
                prompt: prompt.clone(),
                persona: self.persona.clone(),
                sampling: self.sampling.clone(),
                timeout: self.timeout,
            };
            let err = match tokio::time::timeout(self.timeout, self.engine.generate(request)).await {
                Ok(Ok(output)) => {
                    debug!(
                        attempt,
                        completion_tokens = output.usage.completion_tokens,
                        "生成成功"
                    );
                    return Ok(output);
                }
                Ok(Err(e)) => e,
                Err(_) => GenerationError::Timeout(self.timeout),
            };

            if !err.is_retryable() {
                warn!(attempt, error = %err, "生成失败, 不可重试");
                return Err(err);
            }

            if attempt > self.max_retries {
                warn!(attempt, error = %err, "生成重试预算耗尽");
                return Err(GenerationError::Exhausted {
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }

            let backoff = self.retry_backoff * 2u32.saturating_pow(attempt - 1);
            match &err {
                GenerationError::RateLimited { retry_after } => {
                    let delay = retry_after.unwrap_or(backoff);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "生成被限流, 推迟后续调用");
                    self.limiter.penalize(delay);
                }
                _ => {
                    warn!(attempt, error = %err, backoff_ms = backoff.as_millis() as u64, "生成失败, 退避后重试");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait]
impl ChapterReviser for GenerationClient {
    async fn revise(&self, content: &str, instructions: &[String]) -> Result<String, GenerationError> {
        let output = self.generate(build_revision_prompt(content, instructions)).await?;
        Ok(output.text)
    }
}

/// 章节写作请求
pub fn build_chapter_prompt(record: &ProductionRecord, job: &ChapterWriteJob) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("作品: {}\n", record.title));
    prompt.push_str(&format!("chapter: {}\n", job.chapter_number));
    prompt.push_str(&format!("目标强度: {:.1}/10\n", job.target_intensity));
    if !record.context.synopsis.is_empty() {
        prompt.push_str(&format!("梗概: {}\n", record.context.synopsis));
    }
    if !job.previous_summary.is_empty() {
        prompt.push_str(&format!("前情: {}\n", job.previous_summary));
    }
    if !job.objectives.is_empty() {
        prompt.push_str("本章目标:\n");
        for objective in &job.objectives {
            prompt.push_str(&format!("- {}\n", objective));
        }
    }
    if !record.context.dead_characters.is_empty() {
        prompt.push_str(&format!(
            "已死亡角色(不得出场): {}\n",
            record.context.dead_characters.join(", ")
        ));
    }
    if let Some(level) = record.context.power_level {
        prompt.push_str(&format!("当前战力等级: {}\n", level));
    }
    prompt
}

/// 修订请求: 按严重度排好序的修改意见 + 原文
pub fn build_revision_prompt(content: &str, instructions: &[String]) -> String {
    let mut prompt = String::from("按以下修改意见修订章节, 保留情节主线:\n");
    for (i, instruction) in instructions.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, instruction));
    }
    prompt.push_str("---\n");
    prompt.push_str(content);
    prompt
}
