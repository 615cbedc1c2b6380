//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：一次 complete 对应一次模型请求，
//! 返回文本与 token 用量。RetryingLlmClient 在外层提供超时与限流退避。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// 一次模型请求的结果
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub model: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM request timed out after {0:?}")]
    Timeout(Duration),

    #[error("LLM rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("LLM API error: {0}")]
    Api(String),

    #[error("LLM returned an empty response")]
    EmptyResponse,
}

impl LlmError {
    /// 超时与限流可重试，其余视为永久错误
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Timeout(_) | LlmError::RateLimited { .. })
    }
}

/// LLM 客户端 trait：system 为角色指令模板，user 为工单与上下文
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<LlmResponse, LlmError>;

    fn model_name(&self) -> &str;
}

/// 重试配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 首次请求之外的最大重试次数
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// 单次请求超时
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// 为任意 LlmClient 加上单次超时与限流/超时退避重试
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn backoff(&self, retry: u32, err: &LlmError) -> Duration {
        if let LlmError::RateLimited {
            retry_after_ms: Some(ms),
        } = err
        {
            return Duration::from_millis(*ms).min(self.config.max_delay);
        }
        let factor = 2u32.saturating_pow(retry);
        self.config
            .initial_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, system: &str, user: &str) -> Result<LlmResponse, LlmError> {
        let mut retry = 0;
        loop {
            let result = match tokio::time::timeout(
                self.config.request_timeout,
                self.inner.complete(system, user),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout(self.config.request_timeout)),
            };

            match result {
                Err(e) if e.is_transient() && retry < self.config.max_retries => {
                    let delay = self.backoff(retry, &e);
                    tracing::warn!(
                        error = %e,
                        retry = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        "LLM request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                other => return other,
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
