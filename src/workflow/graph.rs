//! 工作流图
//!
//! START → TRIAGE → {BILLING, TECHNICAL, ACCOUNT} → DONE，每个节点之后独立判定是否进入
//! ESCALATION，ESCALATION 之后总是 DONE。节点按顺序执行，同一节点不会执行两次。
//!
//! 节点失败（包括 panic 与状态合并违规）都在这里被吸收：工单置为 failed 并进入升级，
//! 不会以错误形式离开 `execute`。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tracing::Instrument;

use crate::agents::{NodeContext, NodeTable};
use crate::core::error::AgentError;
use crate::core::state::{AgentKind, AgentState, NodeUpdate, ResolutionStatus};
use crate::llm::{CostModel, LlmClient};
use crate::observability::metrics::{
    AGENT_DECISION_LATENCY, AGENT_ERRORS, AGENT_INVOCATIONS, ESCALATIONS, TICKETS_PROCESSED,
    TICKET_RESOLUTION_TIME, WORKFLOW_FAILURES,
};
use crate::observability::{CorrelationContext, ObservabilityBus, ScopedSpan, SpanStatus};
use crate::tools::ToolInvoker;
use crate::workflow::routing::next_stage;
use crate::workflow::types::{Stage, TicketOutcome, Transition, TransitionReason};

pub struct WorkflowGraph {
    nodes: NodeTable,
    invoker: ToolInvoker,
    llm: Arc<dyn LlmClient>,
    cost: CostModel,
    bus: ObservabilityBus,
    escalation_threshold: f64,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl WorkflowGraph {
    pub(crate) fn from_parts(
        nodes: NodeTable,
        invoker: ToolInvoker,
        llm: Arc<dyn LlmClient>,
        cost: CostModel,
        bus: ObservabilityBus,
        escalation_threshold: f64,
    ) -> Self {
        Self {
            nodes,
            invoker,
            llm,
            cost,
            bus,
            escalation_threshold,
        }
    }

    pub fn bus(&self) -> &ObservabilityBus {
        &self.bus
    }

    pub fn invoker(&self) -> &ToolInvoker {
        &self.invoker
    }

    pub async fn execute(&self, state: AgentState) -> AgentState {
        self.execute_traced(state).await.0
    }

    /// 执行并返回按顺序发生的转移
    pub async fn execute_traced(&self, state: AgentState) -> (AgentState, Vec<Transition>) {
        let ctx = CorrelationContext::for_correlation(state.correlation_id());
        self.execute_in(&ctx, state).await
    }

    /// 执行并整理为对外结果
    pub async fn run(&self, ctx: &CorrelationContext, state: AgentState) -> TicketOutcome {
        let (state, transitions) = self.execute_in(ctx, state).await;
        TicketOutcome::new(state, transitions)
    }

    /// 在给定关联上下文下执行：一个根 span 覆盖整个工作流
    pub async fn execute_in(
        &self,
        ctx: &CorrelationContext,
        mut state: AgentState,
    ) -> (AgentState, Vec<Transition>) {
        let mut root = self
            .bus
            .scoped_span(ctx, state.ticket_id(), "workflow.execute");
        let transitions = self
            .drive(&mut state, &root)
            .instrument(root.tracing_span().clone())
            .await;

        let status = state.resolution().status;
        let category = state
            .routing()
            .and_then(|r| r.assigned_agent)
            .map_or("unrouted", |k| k.as_str());
        let urgency = state.routing().map_or("unknown", |r| r.urgency.as_str());
        root.record_metric(
            &TICKETS_PROCESSED,
            &[
                ("category", category),
                ("urgency", urgency),
                ("status", status.as_str()),
            ],
            1.0,
        );
        root.record_metric(
            &TICKET_RESOLUTION_TIME,
            &[("status", status.as_str())],
            root.elapsed_secs(),
        );

        let path = transitions
            .iter()
            .map(|t| t.to.as_str())
            .collect::<Vec<_>>()
            .join(" -> ");
        root.set_attribute("resolution", status);
        root.set_attribute("path", &path);
        tracing::info!(
            parent: root.tracing_span(),
            status = %status,
            requires_human = state.resolution().requires_human,
            nodes = state.agent_interactions().len(),
            path = %path,
            "Workflow completed"
        );
        root.finish(if status == ResolutionStatus::Failed {
            SpanStatus::Error
        } else {
            SpanStatus::Ok
        });
        (state, transitions)
    }

    async fn drive(&self, state: &mut AgentState, root: &ScopedSpan) -> Vec<Transition> {
        tracing::info!(
            customer_id = %state.customer_context.customer_id,
            "Workflow started"
        );
        let mut transitions = Vec::new();
        let mut current = Stage::Start;
        loop {
            let (next, reason) = next_stage(current, state, self.escalation_threshold);
            transitions.push(Transition {
                from: current,
                to: next,
                reason,
            });
            tracing::debug!(from = %current, to = %next, reason = %reason, "Transition");

            if next == Stage::Escalation {
                root.record_metric(&ESCALATIONS, &[("reason", reason.as_str())], 1.0);
                tracing::warn!(reason = %reason, from = %current, "Escalating ticket");
            }

            let Some(kind) = next.agent() else {
                break;
            };
            self.run_node(kind, state, root, reason).await;
            current = next;
        }

        if state.force_failed() {
            root.record_metric(
                &WORKFLOW_FAILURES,
                &[("agent", "workflow"), ("error_type", "unresolved_at_done")],
                1.0,
            );
            tracing::error!("Workflow reached DONE without a terminal resolution, marked failed");
        }
        transitions
    }

    /// 执行单个节点并合并其增量；任何失败都转为失败交互
    async fn run_node(
        &self,
        kind: AgentKind,
        state: &mut AgentState,
        root: &ScopedSpan,
        arrival: TransitionReason,
    ) {
        let mut span = root.child(kind.as_str());
        span.set_attribute("agent", kind);
        span.set_attribute("arrival", arrival);
        let started = Instant::now();

        let mut update = match self.nodes.get(kind) {
            Some(node) => {
                let cx = NodeContext {
                    invoker: &self.invoker,
                    llm: &*self.llm,
                    cost: self.cost,
                    span: &span,
                    arrival: Some(arrival.as_str()),
                };
                let cycle = node
                    .process(&cx, state)
                    .instrument(span.tracing_span().clone());
                match AssertUnwindSafe(cycle).catch_unwind().await {
                    Ok(update) => update,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        tracing::error!(
                            parent: span.tracing_span(),
                            agent = kind.as_str(),
                            panic = %message,
                            "Agent node panicked"
                        );
                        NodeUpdate::new(kind, "panic").fail(AgentError::WorkflowFatal(format!(
                            "{kind} node panicked: {message}"
                        )))
                    }
                }
            }
            None => NodeUpdate::new(kind, "unavailable").fail(AgentError::WorkflowFatal(
                format!("no node registered for {kind}"),
            )),
        };
        update.latency_ms = started.elapsed().as_millis() as u64;

        let mut failure = update.failure.clone();
        let fallback = update.clone();
        if let Err(e) = state.merge(update) {
            tracing::error!(
                parent: span.tracing_span(),
                agent = kind.as_str(),
                error = %e,
                "State merge rejected node update"
            );
            let fatal = AgentError::WorkflowFatal(format!("state merge rejected: {e}"));
            state.absorb_failure(fallback, fatal.clone());
            failure = Some(fatal);
        }

        let agent = kind.as_str();
        let status = if failure.is_some() { "failed" } else { "completed" };
        span.record_metric(&AGENT_INVOCATIONS, &[("agent", agent), ("status", status)], 1.0);
        span.record_metric(
            &AGENT_DECISION_LATENCY,
            &[("agent", agent)],
            started.elapsed().as_secs_f64(),
        );

        match failure {
            Some(e) => {
                span.record_metric(&AGENT_ERRORS, &[("agent", agent), ("error_type", e.kind())], 1.0);
                span.record_metric(
                    &WORKFLOW_FAILURES,
                    &[("agent", agent), ("error_type", e.kind())],
                    1.0,
                );
                span.set_attribute("error_type", e.kind());
                tracing::warn!(
                    parent: span.tracing_span(),
                    agent,
                    error_type = e.kind(),
                    error = %e,
                    "Agent node failed, failure absorbed"
                );
                span.finish(SpanStatus::Error);
            }
            None => {
                tracing::info!(
                    parent: span.tracing_span(),
                    agent,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Agent node completed"
                );
                span.finish(SpanStatus::Ok);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::agents::AgentNode;
    use crate::core::state::{InteractionStatus, Routing, TicketRequest, Urgency};
    use crate::llm::ScriptedLlmClient;
    use crate::workflow::WorkflowBuilder;

    fn scripted() -> Arc<ScriptedLlmClient> {
        Arc::new(
            ScriptedLlmClient::new()
                .on(
                    "you are the triage agent",
                    "ROUTE: billing_agent\nURGENCY: medium\nCONFIDENCE: 0.9\nREASONING: billing",
                )
                .on("you are the escalation agent", "Customer needs a specialist."),
        )
    }

    fn ticket() -> AgentState {
        let req = TicketRequest::new("C12345", "Invoice question", "Why is my invoice higher?");
        AgentState::new("T-1", "CID-0000000000000001", &req)
    }

    struct PanickingBilling;

    #[async_trait]
    impl AgentNode for PanickingBilling {
        fn kind(&self) -> AgentKind {
            AgentKind::Billing
        }

        async fn process(&self, _cx: &NodeContext<'_>, _state: &AgentState) -> NodeUpdate {
            panic!("billing exploded")
        }
    }

    /// 试图第二次写入 routing 的节点
    struct RerouteBilling;

    #[async_trait]
    impl AgentNode for RerouteBilling {
        fn kind(&self) -> AgentKind {
            AgentKind::Billing
        }

        async fn process(&self, _cx: &NodeContext<'_>, _state: &AgentState) -> NodeUpdate {
            let mut update = NodeUpdate::new(AgentKind::Billing, "resolve");
            update.routing = Some(Routing {
                assigned_agent: Some(AgentKind::Account),
                requested_route: "account_agent".into(),
                urgency: Urgency::Low,
                confidence_score: 1.0,
                reasoning: String::new(),
            });
            update
        }
    }

    #[tokio::test]
    async fn test_panicking_node_is_absorbed() {
        let graph = WorkflowBuilder::new()
            .llm(scripted())
            .node(Arc::new(PanickingBilling))
            .build();
        let (state, transitions) = graph.execute_traced(ticket()).await;

        assert_eq!(state.resolution().status, ResolutionStatus::Failed);
        assert!(state.resolution().requires_human);
        assert_eq!(
            state.visited_agents(),
            vec![AgentKind::Triage, AgentKind::Billing, AgentKind::Escalation]
        );
        let billing = &state.agent_interactions()[1];
        assert_eq!(billing.status, InteractionStatus::Failed);
        assert!(billing.error.as_deref().unwrap().contains("billing exploded"));
        assert_eq!(transitions[2].reason, TransitionReason::Failure);
        assert_eq!(
            graph
                .bus()
                .metrics()
                .counter_value(
                    "workflow_failures_total",
                    &[("agent", "billing"), ("error_type", "workflow_fatal_error")]
                ),
            1.0
        );
    }

    #[tokio::test]
    async fn test_merge_violation_is_fatal_not_overwrite() {
        let graph = WorkflowBuilder::new()
            .llm(scripted())
            .node(Arc::new(RerouteBilling))
            .build();
        let state = graph.execute(ticket()).await;

        assert_eq!(
            state.routing().and_then(|r| r.assigned_agent),
            Some(AgentKind::Billing)
        );
        assert_eq!(state.resolution().status, ResolutionStatus::Failed);
        assert_eq!(state.agent_interactions()[1].status, InteractionStatus::Failed);
        assert_eq!(state.agent_interactions().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_node_is_absorbed() {
        let graph = WorkflowBuilder::new()
            .llm(scripted())
            .nodes(crate::agents::NodeTable::empty().with(Arc::new(crate::agents::TriageAgent)))
            .build();
        let state = graph.execute(ticket()).await;
        assert_eq!(state.resolution().status, ResolutionStatus::Failed);
        assert!(state.agent_interactions()[1]
            .error
            .as_deref()
            .unwrap()
            .contains("no node registered"));
    }
}
