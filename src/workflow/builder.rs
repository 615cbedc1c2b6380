//! 工作流构建器
//!
//! 显式组装 WorkflowGraph：能力注册表与授权表以 Arc 传入，不存在全局注册表。

use std::sync::Arc;

use crate::agents::{AgentNode, NodeTable};
use crate::config::{AppConfig, WorkflowSection};
use crate::llm::{create_llm_from_config, CostModel, LlmClient, MockLlmClient};
use crate::observability::ObservabilityBus;
use crate::tools::{default_registry, CapabilityGrants, CapabilityRegistry, RetryPolicy, ToolInvoker};
use crate::workflow::graph::WorkflowGraph;

pub struct WorkflowBuilder {
    registry: Arc<CapabilityRegistry>,
    grants: Arc<CapabilityGrants>,
    policy: RetryPolicy,
    llm: Option<Arc<dyn LlmClient>>,
    bus: ObservabilityBus,
    workflow: WorkflowSection,
    cost: CostModel,
    nodes: NodeTable,
}

impl WorkflowBuilder {
    /// 默认组装：内存能力、默认授权、Mock 模型
    pub fn new() -> Self {
        Self {
            registry: Arc::new(default_registry()),
            grants: Arc::new(CapabilityGrants::support_defaults()),
            policy: RetryPolicy::default(),
            llm: None,
            bus: ObservabilityBus::new(),
            workflow: WorkflowSection::default(),
            cost: CostModel::default(),
            nodes: NodeTable::support_defaults(),
        }
    }

    /// 按配置组装：重试策略、模型后端、计价与工作流参数
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new()
            .retry_policy(config.retry.to_policy())
            .llm(create_llm_from_config(&config.llm))
            .cost_model(config.llm.pricing.into())
            .workflow_config(config.workflow.clone())
            .bus(ObservabilityBus::with_journal_capacity(
                config.observability.journal_capacity,
            ))
    }

    pub fn registry(mut self, registry: Arc<CapabilityRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn grants(mut self, grants: Arc<CapabilityGrants>) -> Self {
        self.grants = grants;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn bus(mut self, bus: ObservabilityBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn workflow_config(mut self, workflow: WorkflowSection) -> Self {
        self.workflow = workflow;
        self
    }

    pub fn cost_model(mut self, cost: CostModel) -> Self {
        self.cost = cost;
        self
    }

    /// 覆盖 node.kind() 对应的节点实现
    pub fn node(mut self, node: Arc<dyn AgentNode>) -> Self {
        self.nodes = self.nodes.with(node);
        self
    }

    pub fn nodes(mut self, nodes: NodeTable) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn build(self) -> WorkflowGraph {
        let llm: Arc<dyn LlmClient> = match self.llm {
            Some(llm) => llm,
            None => Arc::new(MockLlmClient::default()),
        };
        tracing::debug!(
            capabilities = ?self.registry.names(),
            agents = ?self.nodes.kinds(),
            model = llm.model_name(),
            "Workflow graph built"
        );
        WorkflowGraph::from_parts(
            self.nodes,
            ToolInvoker::new(self.registry, self.grants, self.policy),
            llm,
            self.cost,
            self.bus,
            self.workflow.escalation_confidence_threshold,
        )
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}
