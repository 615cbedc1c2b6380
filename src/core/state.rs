//! 工单状态：AgentState 及其值类型
//!
//! 每张工单一个 AgentState，由执行该工单的任务独占。节点不直接改写状态，
//! 而是产出 NodeUpdate，由 `AgentState::merge` 以追加 / 一次性写入的方式合并：
//! - routing 只能被设置一次
//! - resolution 只能从 pending 迁移到一个终态
//! - agent_interactions 只追加，metadata 只累加

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{AgentError, StateError, ValidationError};

/// 节点失败时对客户的兜底回复
pub const FALLBACK_RESPONSE: &str = "We were unable to complete automated handling of your \
request. A support specialist has been notified and will follow up with you shortly.";

const MAX_SUBJECT_CHARS: usize = 200;
const MAX_BODY_CHARS: usize = 5000;

/// 智能体角色标签（节点身份）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Triage,
    Billing,
    Technical,
    Account,
    Escalation,
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Triage,
        AgentKind::Billing,
        AgentKind::Technical,
        AgentKind::Account,
        AgentKind::Escalation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Triage => "triage",
            AgentKind::Billing => "billing",
            AgentKind::Technical => "technical",
            AgentKind::Account => "account",
            AgentKind::Escalation => "escalation",
        }
    }

    /// 交互记录中使用的智能体名称
    pub fn agent_name(&self) -> &'static str {
        match self {
            AgentKind::Triage => "triage_agent",
            AgentKind::Billing => "billing_agent",
            AgentKind::Technical => "technical_agent",
            AgentKind::Account => "account_agent",
            AgentKind::Escalation => "escalation_agent",
        }
    }

    /// 将分诊输出的 ROUTE 标签映射为可分配的智能体；triage 本身与未知标签返回 None
    pub fn from_route_label(label: &str) -> Option<AgentKind> {
        match label.trim().to_ascii_lowercase().as_str() {
            "billing" | "billing_agent" => Some(AgentKind::Billing),
            "technical" | "technical_agent" => Some(AgentKind::Technical),
            "account" | "account_agent" => Some(AgentKind::Account),
            "escalation" | "escalation_agent" => Some(AgentKind::Escalation),
            _ => None,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 紧急程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }

    pub fn parse(raw: &str) -> Option<Urgency> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Urgency::Low),
            "medium" => Some(Urgency::Medium),
            "high" => Some(Urgency::High),
            "critical" => Some(Urgency::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 分诊决定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routing {
    /// None 表示模型给出的路由标签无法映射（null）
    pub assigned_agent: Option<AgentKind>,
    /// 模型原样给出的 ROUTE 标签
    pub requested_route: String,
    pub urgency: Urgency,
    /// 取值范围 [0, 1]
    pub confidence_score: f64,
    pub reasoning: String,
}

/// 客户上下文：customer_id / email 来自录入，其余字段由能力调用按需填充
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerContext {
    pub customer_id: String,
    pub email: Option<String>,
    pub tier: Option<String>,
    pub account_status: Option<String>,
    pub history: Vec<serde_json::Value>,
}

/// 节点对客户上下文的增量补充
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerUpdate {
    pub email: Option<String>,
    pub tier: Option<String>,
    pub account_status: Option<String>,
    pub history: Vec<serde_json::Value>,
}

/// 工单内容：录入后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketContent {
    pub subject: String,
    pub body: String,
    pub category_hint: Option<String>,
}

/// 一次能力调用的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub capability: String,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub attempts: u32,
    /// 是否为该智能体的必需能力
    pub required: bool,
}

impl ToolCallRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    Completed,
    Failed,
}

/// 单个节点执行的交互记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInteraction {
    pub agent_name: String,
    pub agent: AgentKind,
    pub action: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub reasoning: String,
    pub result: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: InteractionStatus,
    /// 节点显式要求升级
    pub escalate: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Pending,
    Resolved,
    Escalated,
    Failed,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Pending => "pending",
            ResolutionStatus::Resolved => "resolved",
            ResolutionStatus::Escalated => "escalated",
            ResolutionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResolutionStatus::Pending)
    }
}

impl fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub status: ResolutionStatus,
    pub response: String,
    /// 需要人工跟进（与 status 独立，失败后仍可被升级节点置位）
    pub requires_human: bool,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            status: ResolutionStatus::Pending,
            response: String::new(),
            requires_human: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCount {
    pub prompt: u64,
    pub completion: u64,
}

impl TokenCount {
    pub fn total(&self) -> u64 {
        self.prompt + self.completion
    }
}

/// 处理元数据：跨节点累加，从不覆盖
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub token_usage: BTreeMap<String, TokenCount>,
    pub latency_ms: BTreeMap<String, u64>,
    pub cost_estimate: f64,
    pub error_count: u32,
    pub retry_count: u32,
}

/// 工单录入请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRequest {
    pub customer_id: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub category_hint: Option<String>,
}

impl TicketRequest {
    pub fn new(
        customer_id: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            customer_id: customer_id.into(),
            subject: subject.into(),
            body: body.into(),
            email: None,
            category_hint: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_category_hint(mut self, hint: impl Into<String>) -> Self {
        self.category_hint = Some(hint.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.customer_id.trim().is_empty() {
            return Err(ValidationError::new("customer_id", "must not be empty"));
        }
        let subject_len = self.subject.trim().chars().count();
        if subject_len == 0 || subject_len > MAX_SUBJECT_CHARS {
            return Err(ValidationError::new(
                "subject",
                format!("length must be within 1..={MAX_SUBJECT_CHARS}"),
            ));
        }
        let body_len = self.body.trim().chars().count();
        if body_len == 0 || body_len > MAX_BODY_CHARS {
            return Err(ValidationError::new(
                "body",
                format!("length must be within 1..={MAX_BODY_CHARS}"),
            ));
        }
        Ok(())
    }
}

/// 节点提议的终态
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionUpdate {
    pub status: ResolutionStatus,
    pub response: String,
}

/// 节点一次执行产出的增量
#[derive(Debug, Clone)]
pub struct NodeUpdate {
    pub agent: AgentKind,
    pub action: String,
    pub reasoning: String,
    pub result: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub routing: Option<Routing>,
    pub customer: Option<CustomerUpdate>,
    pub resolution: Option<ResolutionUpdate>,
    pub requires_human: bool,
    pub escalate: bool,
    pub tokens: TokenCount,
    pub cost: f64,
    pub latency_ms: u64,
    pub failure: Option<AgentError>,
}

impl NodeUpdate {
    pub fn new(agent: AgentKind, action: impl Into<String>) -> Self {
        Self {
            agent,
            action: action.into(),
            reasoning: String::new(),
            result: None,
            tool_calls: Vec::new(),
            routing: None,
            customer: None,
            resolution: None,
            requires_human: false,
            escalate: false,
            tokens: TokenCount::default(),
            cost: 0.0,
            latency_ms: 0,
            failure: None,
        }
    }

    /// 标记失败：丢弃该节点提议的 routing / resolution，仅保留已发生的调用记录与用量
    pub fn fail(mut self, error: AgentError) -> Self {
        self.routing = None;
        self.resolution = None;
        self.result = Some(format!("failed: {error}"));
        self.failure = Some(error);
        self
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// 单张工单在整个工作流中的状态
#[derive(Debug, Clone, Serialize)]
pub struct AgentState {
    ticket_id: String,
    correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub customer_context: CustomerContext,
    ticket_content: TicketContent,
    routing: Option<Routing>,
    agent_interactions: Vec<AgentInteraction>,
    resolution: Resolution,
    metadata: Metadata,
}

impl AgentState {
    /// 录入时创建：只有工单内容与客户标识
    pub fn new(
        ticket_id: impl Into<String>,
        correlation_id: impl Into<String>,
        request: &TicketRequest,
    ) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            correlation_id: correlation_id.into(),
            timestamp: Utc::now(),
            customer_context: CustomerContext {
                customer_id: request.customer_id.clone(),
                email: request.email.clone(),
                ..CustomerContext::default()
            },
            ticket_content: TicketContent {
                subject: request.subject.clone(),
                body: request.body.clone(),
                category_hint: request.category_hint.clone(),
            },
            routing: None,
            agent_interactions: Vec::new(),
            resolution: Resolution::default(),
            metadata: Metadata::default(),
        }
    }

    pub fn ticket_id(&self) -> &str {
        &self.ticket_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn ticket_content(&self) -> &TicketContent {
        &self.ticket_content
    }

    pub fn routing(&self) -> Option<&Routing> {
        self.routing.as_ref()
    }

    pub fn agent_interactions(&self) -> &[AgentInteraction] {
        &self.agent_interactions
    }

    pub fn last_interaction(&self) -> Option<&AgentInteraction> {
        self.agent_interactions.last()
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// 按执行顺序列出已执行的节点
    pub fn visited_agents(&self) -> Vec<AgentKind> {
        self.agent_interactions.iter().map(|i| i.agent).collect()
    }

    /// 合并节点增量。先整体校验，再应用，校验失败时状态保持不变。
    pub fn merge(&mut self, update: NodeUpdate) -> Result<(), StateError> {
        if update.routing.is_some() && self.routing.is_some() {
            return Err(StateError::RoutingAlreadySet);
        }
        if let Some(proposed) = &update.resolution {
            if !proposed.status.is_terminal() {
                return Err(StateError::NonTerminalResolution(
                    proposed.status.to_string(),
                ));
            }
            if self.resolution.status.is_terminal() {
                return Err(StateError::ResolutionAlreadySettled(
                    self.resolution.status.to_string(),
                ));
            }
        }
        self.apply(update);
        Ok(())
    }

    /// 记录一个无法合并的节点结果：只追加失败交互并累加元数据，不会失败
    pub fn absorb_failure(&mut self, update: NodeUpdate, error: AgentError) {
        let mut update = update.fail(error);
        update.customer = None;
        self.apply(update);
    }

    fn apply(&mut self, update: NodeUpdate) {
        let NodeUpdate {
            agent,
            action,
            reasoning,
            result,
            tool_calls,
            routing,
            customer,
            resolution,
            requires_human,
            escalate,
            tokens,
            cost,
            latency_ms,
            failure,
        } = update;

        if let Some(customer) = customer {
            let ctx = &mut self.customer_context;
            if ctx.email.is_none() {
                ctx.email = customer.email;
            }
            if customer.tier.is_some() {
                ctx.tier = customer.tier;
            }
            if customer.account_status.is_some() {
                ctx.account_status = customer.account_status;
            }
            ctx.history.extend(customer.history);
        }

        if let Some(routing) = routing {
            self.routing = Some(routing);
        }

        match (&failure, resolution) {
            (Some(_), _) => {
                if !self.resolution.status.is_terminal() {
                    self.resolution.status = ResolutionStatus::Failed;
                    self.resolution.response = FALLBACK_RESPONSE.to_string();
                }
            }
            (None, Some(proposed)) => {
                self.resolution.status = proposed.status;
                self.resolution.response = proposed.response;
            }
            (None, None) => {}
        }
        if requires_human {
            self.resolution.requires_human = true;
        }

        let key = agent.as_str().to_string();
        let usage = self.metadata.token_usage.entry(key.clone()).or_default();
        usage.prompt += tokens.prompt;
        usage.completion += tokens.completion;
        *self.metadata.latency_ms.entry(key).or_insert(0) += latency_ms;
        self.metadata.cost_estimate += cost;
        self.metadata.retry_count += tool_calls
            .iter()
            .map(|c| c.attempts.saturating_sub(1))
            .sum::<u32>();
        self.metadata.error_count += tool_calls.iter().filter(|c| !c.succeeded()).count() as u32;
        if failure.is_some() {
            self.metadata.error_count += 1;
        }

        self.agent_interactions.push(AgentInteraction {
            agent_name: agent.agent_name().to_string(),
            agent,
            action,
            tool_calls,
            reasoning,
            result,
            timestamp: Utc::now(),
            status: if failure.is_some() {
                InteractionStatus::Failed
            } else {
                InteractionStatus::Completed
            },
            escalate,
            error: failure.map(|e| e.to_string()),
        });
    }

    /// 工作流结束前的兜底：仍为 pending 时强制置为 failed
    pub fn force_failed(&mut self) -> bool {
        if self.resolution.status.is_terminal() {
            return false;
        }
        self.resolution.status = ResolutionStatus::Failed;
        self.resolution.response = FALLBACK_RESPONSE.to_string();
        self.resolution.requires_human = true;
        self.metadata.error_count += 1;
        true
    }
}
