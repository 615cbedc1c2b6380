//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock），重试包装与用量计价

pub mod mock;
pub mod openai;
pub mod traits;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::OpenAiClient;
pub use traits::{LlmClient, LlmError, LlmResponse, RetryConfig, RetryingLlmClient};
pub use usage::{estimate_tokens, CostModel};

use crate::config::LlmSection;

/// 按 [llm] 段创建客户端（openai / mock），外层统一包上 RetryingLlmClient
pub fn create_llm_from_config(section: &LlmSection) -> Arc<dyn LlmClient> {
    let inner: Arc<dyn LlmClient> = match section.provider.as_str() {
        "openai" => {
            tracing::info!(model = %section.model, "Using OpenAI-compatible LLM backend");
            Arc::new(OpenAiClient::new(
                section.base_url.as_deref(),
                &section.model,
                None,
            ))
        }
        other => {
            if other != "mock" {
                tracing::warn!(provider = %other, "Unknown LLM provider, falling back to mock");
            }
            Arc::new(MockLlmClient::new(section.model.clone()))
        }
    };

    let retry = RetryConfig {
        max_retries: section.max_retries,
        request_timeout: Duration::from_secs(section.timeout_secs),
        ..RetryConfig::default()
    };
    Arc::new(RetryingLlmClient::new(inner, retry))
}
