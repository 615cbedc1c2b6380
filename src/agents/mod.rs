//! 智能体节点
//!
//! 每个节点执行一个决策周期：通过 ToolInvoker 收集上下文 → 一次模型请求 → 按协议解析 →
//! 执行回复指示的动作能力 → 产出 NodeUpdate。节点从不直接修改 AgentState。
//!
//! `DecisionCycle` 封装周期内的公共步骤：调用记录、必需能力判定、模型调用 span 与用量统计。

pub mod account;
pub mod billing;
pub mod escalation;
pub mod parse;
pub mod prompts;
pub mod technical;
pub mod triage;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::Instrument;

pub use account::AccountAgent;
pub use billing::BillingAgent;
pub use escalation::EscalationAgent;
pub use technical::TechnicalAgent;
pub use triage::TriageAgent;

use crate::core::error::AgentError;
use crate::core::state::{AgentKind, AgentState, NodeUpdate};
use crate::llm::{CostModel, LlmClient};
use crate::observability::metrics::{LLM_COST, LLM_LATENCY, LLM_TOKENS};
use crate::observability::{ScopedSpan, SpanStatus};
use crate::tools::{record_call, ToolInvoker};

/// 必需能力：调用失败即节点失败；其余能力失败只记录并继续
pub fn required_capabilities(agent: AgentKind) -> &'static [&'static str] {
    match agent {
        AgentKind::Billing => &["database_query", "payment_gateway"],
        AgentKind::Technical => &["knowledge_base"],
        AgentKind::Account => &["database_query"],
        AgentKind::Triage | AgentKind::Escalation => &[],
    }
}

/// 节点执行所需的协作者，由 WorkflowGraph 在每次节点执行时构造
pub struct NodeContext<'a> {
    pub invoker: &'a ToolInvoker,
    pub llm: &'a dyn LlmClient,
    pub cost: CostModel,
    /// 节点 span；能力与模型调用在其下开孙 span
    pub span: &'a ScopedSpan,
    /// 进入本节点的转移原因（升级节点用于说明上下文）
    pub arrival: Option<&'a str>,
}

#[async_trait]
pub trait AgentNode: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// 执行一个决策周期；失败以 NodeUpdate::fail 的形式返回，不向外抛出
    async fn process(&self, cx: &NodeContext<'_>, state: &AgentState) -> NodeUpdate;
}

/// 一个决策周期内的累积结果
pub struct DecisionCycle<'c, 'a> {
    cx: &'c NodeContext<'a>,
    agent: AgentKind,
    update: NodeUpdate,
    asked: bool,
}

impl<'c, 'a> DecisionCycle<'c, 'a> {
    pub fn new(cx: &'c NodeContext<'a>, agent: AgentKind, action: &str) -> Self {
        Self {
            cx,
            agent,
            update: NodeUpdate::new(agent, action),
            asked: false,
        }
    }

    pub fn update(&mut self) -> &mut NodeUpdate {
        &mut self.update
    }

    pub fn arrival(&self) -> Option<&'a str> {
        self.cx.arrival
    }

    /// 调用能力并记入 tool_calls。必需能力失败返回 Err；可选能力失败返回 Ok(None)
    pub async fn call(&mut self, capability: &str, input: Value) -> Result<Option<Value>, AgentError> {
        let required = required_capabilities(self.agent).contains(&capability);
        let result = self
            .cx
            .invoker
            .invoke(self.agent, self.cx.span, capability, input.clone())
            .await;
        self.update
            .tool_calls
            .push(record_call(capability, input, &result, required));

        match result {
            Ok(out) => Ok(Some(out.value)),
            Err(e) if required => Err(AgentError::Tool(e)),
            Err(e) => {
                tracing::warn!(
                    agent = self.agent.as_str(),
                    capability,
                    error = %e,
                    "Optional capability failed, continuing"
                );
                Ok(None)
            }
        }
    }

    /// 本周期唯一一次模型请求；记录 token、成本与延迟
    pub async fn ask(&mut self, system: &str, user: &str) -> Result<String, AgentError> {
        if self.asked {
            return Err(AgentError::WorkflowFatal(format!(
                "{} requested a second model call in one decision cycle",
                self.agent
            )));
        }
        self.asked = true;

        let agent = self.agent.as_str();
        let mut span = self.cx.span.child(format!("llm.{agent}"));
        span.set_attribute("model", self.cx.llm.model_name());
        let result = self
            .cx
            .llm
            .complete(system, user)
            .instrument(span.tracing_span().clone())
            .await;
        span.record_metric(&LLM_LATENCY, &[("agent", agent)], span.elapsed_secs());

        match result {
            Ok(resp) => {
                let cost = self.cx.cost.cost(resp.prompt_tokens, resp.completion_tokens);
                self.update.tokens.prompt += resp.prompt_tokens;
                self.update.tokens.completion += resp.completion_tokens;
                self.update.cost += cost;

                span.record_metric(
                    &LLM_TOKENS,
                    &[("model", resp.model.as_str()), ("type", "prompt")],
                    resp.prompt_tokens as f64,
                );
                span.record_metric(
                    &LLM_TOKENS,
                    &[("model", resp.model.as_str()), ("type", "completion")],
                    resp.completion_tokens as f64,
                );
                span.record_metric(&LLM_COST, &[("agent", agent)], cost);
                span.set_attribute("prompt_tokens", resp.prompt_tokens);
                span.set_attribute("completion_tokens", resp.completion_tokens);
                span.finish(SpanStatus::Ok);
                Ok(resp.content)
            }
            Err(e) => {
                span.set_attribute("error", &e);
                tracing::warn!(parent: span.tracing_span(), agent, error = %e, "LLM request failed");
                span.finish(SpanStatus::Error);
                Err(AgentError::Llm(e))
            }
        }
    }

    /// 结束周期：成功返回累积的增量，失败转为失败增量（保留已发生的调用与用量）
    pub fn finish(self, result: Result<(), AgentError>) -> NodeUpdate {
        match result {
            Ok(()) => self.update,
            Err(e) => {
                tracing::warn!(
                    agent = self.agent.as_str(),
                    error_type = e.kind(),
                    error = %e,
                    "Agent decision cycle failed"
                );
                self.update.fail(e)
            }
        }
    }
}

/// 截断到 max 个字符
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

/// 节点表：AgentKind → 节点实现，可按角色覆盖
#[derive(Clone)]
pub struct NodeTable {
    nodes: BTreeMap<AgentKind, Arc<dyn AgentNode>>,
}

impl NodeTable {
    pub fn empty() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }

    /// 五个内置节点
    pub fn support_defaults() -> Self {
        Self::empty()
            .with(Arc::new(TriageAgent))
            .with(Arc::new(BillingAgent))
            .with(Arc::new(TechnicalAgent))
            .with(Arc::new(AccountAgent))
            .with(Arc::new(EscalationAgent))
    }

    /// 注册或覆盖 node.kind() 对应的实现
    pub fn with(mut self, node: Arc<dyn AgentNode>) -> Self {
        self.nodes.insert(node.kind(), node);
        self
    }

    pub fn get(&self, kind: AgentKind) -> Option<&Arc<dyn AgentNode>> {
        self.nodes.get(&kind)
    }

    pub fn kinds(&self) -> Vec<AgentKind> {
        self.nodes.keys().copied().collect()
    }
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::support_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_capabilities() {
        assert_eq!(
            required_capabilities(AgentKind::Billing),
            &["database_query", "payment_gateway"]
        );
        assert!(required_capabilities(AgentKind::Escalation).is_empty());
    }

    #[test]
    fn test_default_table_covers_every_kind() {
        let table = NodeTable::support_defaults();
        assert_eq!(table.kinds(), AgentKind::ALL.to_vec());
        for kind in AgentKind::ALL {
            assert_eq!(table.get(kind).map(|n| n.kind()), Some(kind));
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 2), "he");
    }
}
