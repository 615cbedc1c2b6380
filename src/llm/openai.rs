//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；返回内容与本次请求的 token 用量。

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::usage::estimate_tokens;
use crate::llm::{LlmClient, LlmError, LlmResponse};

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    fn to_openai_messages(
        system: &str,
        user: &str,
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(system.to_string())
            .build()
            .map_err(map_error)?;
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(user.to_string())
            .build()
            .map_err(map_error)?;
        Ok(vec![
            ChatCompletionRequestMessage::System(system),
            ChatCompletionRequestMessage::User(user),
        ])
    }
}

fn map_error(e: OpenAIError) -> LlmError {
    let message = e.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("rate limit") || lowered.contains("429") {
        LlmError::RateLimited {
            retry_after_ms: None,
        }
    } else {
        LlmError::Api(message)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, system: &str, user: &str) -> Result<LlmResponse, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::to_openai_messages(system, user)?)
            .temperature(0.0)
            .build()
            .map_err(map_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_error)?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        // 端点未返回 usage 时退回估算值
        let (prompt_tokens, completion_tokens) = match &response.usage {
            Some(usage) => (usage.prompt_tokens as u64, usage.completion_tokens as u64),
            None => (
                estimate_tokens(&format!("{system} {user}")),
                estimate_tokens(&content),
            ),
        };

        Ok(LlmResponse {
            content,
            prompt_tokens,
            completion_tokens,
            model: response.model,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
