//! Mock LLM 客户端（用于演示与测试，无需 API）
//!
//! - MockLlmClient：按角色指令与工单关键词给出确定性的协议回复
//! - ScriptedLlmClient：按 system 中的标记返回预设回复，可注入错误，并统计调用次数

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::usage::estimate_tokens;
use crate::llm::{LlmClient, LlmError, LlmResponse};

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn respond(model: &str, system: &str, user: &str, content: String) -> LlmResponse {
    LlmResponse {
        prompt_tokens: estimate_tokens(&format!("{system} {user}")),
        completion_tokens: estimate_tokens(&content),
        content,
        model: model.to_string(),
    }
}

/// Mock 客户端：关键词驱动的确定性回复
#[derive(Debug, Clone)]
pub struct MockLlmClient {
    model: String,
}

impl MockLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    fn reply(system: &str, user: &str) -> String {
        let system = system.to_lowercase();
        let user = user.to_lowercase();

        if system.contains("you are the triage agent") {
            if contains_any(&user, &["lawsuit", "lawyer", "legal action"]) {
                return "ROUTE: escalation_agent | URGENCY: critical | CONFIDENCE: 0.45 | REASONING: Legal threat requires human review".into();
            }
            if contains_any(&user, &["charge", "billing", "refund", "payment"]) {
                return "ROUTE: billing_agent | URGENCY: medium | CONFIDENCE: 0.92 | REASONING: Customer mentions billing-related terms".into();
            }
            if contains_any(&user, &["bug", "error", "crash", "not working"]) {
                return "ROUTE: technical_agent | URGENCY: high | CONFIDENCE: 0.88 | REASONING: Technical issue reported".into();
            }
            if contains_any(&user, &["password", "account", "login", "profile"]) {
                return "ROUTE: account_agent | URGENCY: medium | CONFIDENCE: 0.85 | REASONING: Account management issue".into();
            }
            return "ROUTE: escalation_agent | URGENCY: low | CONFIDENCE: 0.60 | REASONING: Unclear category".into();
        }

        if system.contains("you are the billing agent") {
            let mut text = "I understand you're experiencing a billing issue. I checked your payment \
                history and will make sure any incorrect charge is corrected."
                .to_string();
            if contains_any(&user, &["refund", "twice", "duplicate", "double"]) {
                text.push_str("\nACTION: PROCESS_REFUND");
            }
            return text;
        }

        if system.contains("you are the technical agent") {
            return "I've identified the technical issue you're experiencing. The troubleshooting \
                steps from our knowledge base are summarised below and have been emailed to you."
                .into();
        }

        if system.contains("you are the account agent") {
            return "I can help you with your account management request. I'll update your account \
                settings and send you a confirmation email."
                .into();
        }

        if system.contains("you are the escalation agent") {
            return "This request needs review by a human specialist. I have summarised the customer \
                history and relevant articles for the support team, who will follow up shortly.\n\
                ACTION: SEND_EMAIL"
                .into();
        }

        "Thank you for contacting support. I'll help you with your request right away.".into()
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new("mock-support-model")
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, system: &str, user: &str) -> Result<LlmResponse, LlmError> {
        let content = Self::reply(system, user);
        tracing::debug!(model = %self.model, "mock LLM generated response");
        Ok(respond(&self.model, system, user, content))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// 预设回复客户端：第一条 system 包含 marker 的规则生效
pub struct ScriptedLlmClient {
    rules: Vec<(String, Result<String, LlmError>)>,
    fallback: Result<String, LlmError>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: Err(LlmError::Api("no scripted response".into())),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// system 中包含 marker（不区分大小写）时返回 reply
    pub fn on(mut self, marker: &str, reply: impl Into<String>) -> Self {
        self.rules.push((marker.to_lowercase(), Ok(reply.into())));
        self
    }

    pub fn fail_on(mut self, marker: &str, error: LlmError) -> Self {
        self.rules.push((marker.to_lowercase(), Err(error)));
        self
    }

    pub fn otherwise(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Ok(reply.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 按调用顺序返回收到的 system 指令
    pub fn system_prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Default for ScriptedLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, system: &str, user: &str) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(system.to_string());
        }
        let lowered = system.to_lowercase();
        let scripted = self
            .rules
            .iter()
            .find(|(marker, _)| lowered.contains(marker.as_str()))
            .map(|(_, reply)| reply)
            .unwrap_or(&self.fallback);
        let content = scripted.clone()?;
        Ok(respond("scripted", system, user, content))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_triage_routes_billing() {
        let client = MockLlmClient::default();
        let resp = client
            .complete(
                "You are the triage agent for a support team.",
                "Subject: Double charge\nI was charged twice",
            )
            .await
            .unwrap();
        assert!(resp.content.starts_with("ROUTE: billing_agent"));
        assert!(resp.prompt_tokens >= 1);
        assert_eq!(resp.model, "mock-support-model");
    }

    #[tokio::test]
    async fn test_mock_billing_requests_refund_for_duplicate_charge() {
        let client = MockLlmClient::default();
        let resp = client
            .complete("You are the billing agent.", "I was charged twice")
            .await
            .unwrap();
        assert!(resp.content.contains("ACTION: PROCESS_REFUND"));
    }

    #[tokio::test]
    async fn test_scripted_first_matching_rule() {
        let client = ScriptedLlmClient::new()
            .on("triage", "ROUTE: account_agent")
            .fail_on("billing", LlmError::Api("down".into()));
        assert_eq!(
            client.complete("TRIAGE role", "x").await.unwrap().content,
            "ROUTE: account_agent"
        );
        assert!(client.complete("billing role", "x").await.is_err());
        assert!(client.complete("other", "x").await.is_err());
        assert_eq!(client.calls(), 3);
        assert_eq!(client.system_prompts().len(), 3);
    }
}
