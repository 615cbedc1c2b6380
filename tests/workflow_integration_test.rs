//! 工作流集成测试：路由场景、失败吸收、重试、遥测关联、并发与取消

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing_subscriber::prelude::*;

use deskflow::config::WorkflowSection;
use deskflow::core::error::DispatchError;
use deskflow::core::state::{
    AgentKind, AgentState, InteractionStatus, ResolutionStatus, TicketRequest, FALLBACK_RESPONSE,
};
use deskflow::llm::{LlmClient, LlmError, LlmResponse, MockLlmClient, ScriptedLlmClient};
use deskflow::observability::{CorrelationLayer, ObservabilityBus, SpanLevel, SpanStatus};
use deskflow::tools::{
    CapabilityGrants, CapabilityRegistry, DatabaseTool, EmailTool, FaultPlan, KnowledgeBaseTool,
    PaymentTool, RetryPolicy,
};
use deskflow::workflow::{Stage, TicketOutcome, TransitionReason, WorkflowBuilder, WorkflowGraph};
use deskflow::TicketSupervisor;

fn double_charge() -> TicketRequest {
    TicketRequest::new(
        "C12345",
        "Charged twice this month",
        "I was charged twice for my subscription. Please refund the duplicate payment.",
    )
}

fn crash_report() -> TicketRequest {
    TicketRequest::new(
        "C67890",
        "App crashes on export",
        "The app shows an error every time I export a report.",
    )
}

async fn run(graph: &WorkflowGraph, request: TicketRequest) -> TicketOutcome {
    let ctx = graph.bus().begin_request();
    let state = AgentState::new("T-test0001", ctx.correlation_id.clone(), &request);
    graph.run(&ctx, state).await
}

fn registry_with(database: Arc<FaultPlan>, knowledge: Arc<FaultPlan>) -> Arc<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();
    registry.register(DatabaseTool::new().with_faults(database));
    registry.register(PaymentTool::new());
    registry.register(EmailTool::new());
    registry.register(KnowledgeBaseTool::new().with_faults(knowledge));
    Arc::new(registry)
}

fn registry_with_actions(payment: Arc<FaultPlan>, email: Arc<FaultPlan>) -> Arc<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();
    registry.register(DatabaseTool::new());
    registry.register(PaymentTool::new().with_faults(payment));
    registry.register(EmailTool::new().with_faults(email));
    registry.register(KnowledgeBaseTool::new());
    Arc::new(registry)
}

fn refund_script() -> ScriptedLlmClient {
    ScriptedLlmClient::new()
        .on(
            "you are the triage agent",
            "ROUTE: billing_agent | URGENCY: medium | CONFIDENCE: 0.92 | REASONING: duplicate charge",
        )
        .on(
            "you are the billing agent",
            "We refunded the duplicate charge.\nACTION: PROCESS_REFUND",
        )
        .on(
            "you are the escalation agent",
            "Refund could not be completed, finance will follow up.",
        )
}

/// 每次请求前等待固定时长的模型
struct SlowLlm {
    delay: Duration,
    inner: MockLlmClient,
}

#[async_trait]
impl LlmClient for SlowLlm {
    async fn complete(&self, system: &str, user: &str) -> Result<LlmResponse, LlmError> {
        tokio::time::sleep(self.delay).await;
        self.inner.complete(system, user).await
    }

    fn model_name(&self) -> &str {
        "slow-mock"
    }
}

#[tokio::test]
async fn test_double_charge_resolved_by_billing() {
    let graph = WorkflowBuilder::new().build();
    let outcome = run(&graph, double_charge()).await;

    assert_eq!(
        outcome.execution_path,
        vec![Stage::Start, Stage::Triage, Stage::Billing, Stage::Done]
    );
    assert_eq!(outcome.resolution.status, ResolutionStatus::Resolved);
    assert!(!outcome.resolution.requires_human);
    assert_eq!(outcome.agent_interactions.len(), 2);

    let routing = outcome.routing.as_ref().unwrap();
    assert_eq!(routing.assigned_agent, Some(AgentKind::Billing));
    assert!(routing.confidence_score > 0.9);

    let billing = &outcome.agent_interactions[1];
    assert_eq!(billing.agent_name, "billing_agent");
    let refund = billing
        .tool_calls
        .iter()
        .find(|c| c.capability == "payment_gateway")
        .expect("refund issued");
    assert_eq!(refund.input["payment_id"], "PAY-002");
    assert_eq!(refund.output.as_ref().unwrap()["refund_id"], "REF-0001");
    assert!(billing.tool_calls.iter().any(|c| c.capability == "email_sender" && c.succeeded()));

    assert!(outcome.metadata.token_usage["triage"].total() > 0);
    assert!(outcome.metadata.cost_estimate > 0.0);
    assert_eq!(outcome.metadata.error_count, 0);
    assert_eq!(
        graph.bus().metrics().counter_value(
            "tickets_processed_total",
            &[("category", "billing"), ("urgency", "medium"), ("status", "resolved")]
        ),
        1.0
    );
}

#[tokio::test]
async fn test_stubbed_triage_routes_double_charge() {
    let request = || TicketRequest::new("C12345", "Double charge", "I was charged twice for my subscription");

    let graph = WorkflowBuilder::new().llm(Arc::new(refund_script())).build();
    let outcome = run(&graph, request()).await;
    assert_eq!(
        outcome.execution_path,
        vec![Stage::Start, Stage::Triage, Stage::Billing, Stage::Done]
    );
    assert_eq!(outcome.resolution.status, ResolutionStatus::Resolved);
    assert_eq!(outcome.agent_interactions.len(), 2);
    let routing = outcome.routing.as_ref().unwrap();
    assert_eq!(routing.assigned_agent, Some(AgentKind::Billing));
    assert!((routing.confidence_score - 0.92).abs() < 1e-9);

    let unsure = Arc::new(
        ScriptedLlmClient::new()
            .on(
                "you are the triage agent",
                "ROUTE: unknown_agent | URGENCY: medium | CONFIDENCE: 0.40",
            )
            .on("you are the escalation agent", "Needs a human to review."),
    );
    let graph = WorkflowBuilder::new().llm(unsure).build();
    let outcome = run(&graph, request()).await;
    assert_eq!(
        outcome.execution_path,
        vec![Stage::Start, Stage::Triage, Stage::Escalation, Stage::Done]
    );
    assert_eq!(outcome.resolution.status, ResolutionStatus::Escalated);
}

#[tokio::test(start_paused = true)]
async fn test_email_outage_does_not_block_resolution() {
    let email = Arc::new(FaultPlan::outage());
    let graph = WorkflowBuilder::new()
        .registry(registry_with_actions(Arc::new(FaultPlan::none()), email.clone()))
        .llm(Arc::new(refund_script()))
        .build();
    let outcome = run(&graph, double_charge()).await;

    assert_eq!(
        outcome.execution_path,
        vec![Stage::Start, Stage::Triage, Stage::Billing, Stage::Done]
    );
    assert_eq!(outcome.resolution.status, ResolutionStatus::Resolved);
    assert!(!outcome.resolution.requires_human);

    let billing = &outcome.agent_interactions[1];
    assert_eq!(billing.status, InteractionStatus::Completed);
    assert!(billing
        .tool_calls
        .iter()
        .any(|c| c.capability == "payment_gateway" && c.succeeded()));
    let confirmation = billing
        .tool_calls
        .iter()
        .find(|c| c.capability == "email_sender")
        .unwrap();
    assert!(!confirmation.required);
    assert_eq!(confirmation.error_kind.as_deref(), Some("transient_error"));
    assert_eq!(confirmation.attempts, 3);
    assert_eq!(email.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_payment_outage_after_refund_directive_escalates() {
    let payment = Arc::new(FaultPlan::outage());
    let graph = WorkflowBuilder::new()
        .registry(registry_with_actions(payment.clone(), Arc::new(FaultPlan::none())))
        .llm(Arc::new(refund_script()))
        .build();
    let outcome = run(&graph, double_charge()).await;

    assert_eq!(
        outcome.execution_path,
        vec![
            Stage::Start,
            Stage::Triage,
            Stage::Billing,
            Stage::Escalation,
            Stage::Done
        ]
    );
    assert_eq!(outcome.transitions[2].reason, TransitionReason::Failure);

    let billing = &outcome.agent_interactions[1];
    assert_eq!(billing.status, InteractionStatus::Failed);
    let refund = billing
        .tool_calls
        .iter()
        .find(|c| c.capability == "payment_gateway")
        .unwrap();
    assert!(refund.required);
    assert_eq!(refund.attempts, 3);
    assert_eq!(payment.calls(), 3);
    assert!(!billing.tool_calls.iter().any(|c| c.capability == "email_sender"));

    assert_eq!(outcome.resolution.status, ResolutionStatus::Failed);
    assert!(outcome.resolution.requires_human);
}

#[tokio::test]
async fn test_unmapped_route_escalates() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .on(
                "you are the triage agent",
                "ROUTE: unknown_agent | URGENCY: medium | CONFIDENCE: 0.40 | REASONING: unsure",
            )
            .on(
                "you are the escalation agent",
                "Customer intent unclear, please call them.\nACTION: SEND_EMAIL",
            ),
    );
    let graph = WorkflowBuilder::new().llm(llm).build();
    let outcome = run(&graph, TicketRequest::new("C12345", "Hello", "Something odd happened")).await;

    let routing = outcome.routing.as_ref().unwrap();
    assert_eq!(routing.assigned_agent, None);
    assert_eq!(routing.requested_route, "unknown_agent");
    assert_eq!(outcome.transitions[1].reason, TransitionReason::UnmappedRoute);
    assert_eq!(
        outcome.execution_path,
        vec![Stage::Start, Stage::Triage, Stage::Escalation, Stage::Done]
    );
    assert_eq!(outcome.resolution.status, ResolutionStatus::Escalated);
    assert!(outcome.resolution.requires_human);
    assert!(outcome.agent_interactions[1]
        .tool_calls
        .iter()
        .any(|c| c.capability == "email_sender"));
}

#[tokio::test]
async fn test_critical_low_confidence_skips_specialist() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .on(
                "you are the triage agent",
                "ROUTE: technical_agent\nURGENCY: critical\nCONFIDENCE: 0.3\nREASONING: outage?",
            )
            .on("you are the escalation agent", "Possible outage, page on-call."),
    );
    let graph = WorkflowBuilder::new().llm(llm.clone()).build();
    let outcome = run(&graph, crash_report()).await;

    assert_eq!(
        outcome.execution_path,
        vec![Stage::Start, Stage::Triage, Stage::Escalation, Stage::Done]
    );
    assert_eq!(outcome.transitions[1].reason, TransitionReason::CriticalLowConfidence);
    assert_eq!(outcome.resolution.status, ResolutionStatus::Escalated);
    assert_eq!(llm.calls(), 2);
    assert_eq!(
        graph
            .bus()
            .metrics()
            .counter_value("escalations_total", &[("reason", "critical_low_confidence")]),
        1.0
    );
}

#[tokio::test]
async fn test_specialist_requested_escalation() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .on(
                "you are the triage agent",
                "ROUTE: billing\nURGENCY: high\nCONFIDENCE: 0.8",
            )
            .on("you are the billing agent", "This is a dispute.\nACTION: ESCALATE")
            .on("you are the escalation agent", "Chargeback dispute, needs finance."),
    );
    let graph = WorkflowBuilder::new().llm(llm).build();
    let outcome = run(&graph, double_charge()).await;

    assert_eq!(
        outcome.execution_path,
        vec![
            Stage::Start,
            Stage::Triage,
            Stage::Billing,
            Stage::Escalation,
            Stage::Done
        ]
    );
    assert!(outcome.agent_interactions[1].escalate);
    assert_eq!(outcome.transitions[2].reason, TransitionReason::EscalationRequested);
    assert_eq!(outcome.transitions[3].reason, TransitionReason::Completed);
    assert_eq!(outcome.resolution.status, ResolutionStatus::Escalated);
    assert_eq!(
        outcome.resolution.response,
        "Chargeback dispute, needs finance."
    );
}

#[tokio::test]
async fn test_triage_parse_failure_is_absorbed() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .on("you are the triage agent", "I think this is about billing.")
            .otherwise("Could not triage automatically."),
    );
    let graph = WorkflowBuilder::new().llm(llm).build();
    let outcome = run(&graph, double_charge()).await;

    assert_eq!(outcome.resolution.status, ResolutionStatus::Failed);
    assert_eq!(outcome.resolution.response, FALLBACK_RESPONSE);
    assert!(outcome.resolution.requires_human);
    assert!(outcome.routing.is_none());
    assert_eq!(outcome.agent_interactions.len(), 2);

    let triage = &outcome.agent_interactions[0];
    assert_eq!(triage.status, InteractionStatus::Failed);
    assert!(triage.error.as_deref().unwrap().contains("ROUTE"));
    assert_eq!(outcome.agent_interactions[1].agent, AgentKind::Escalation);
    assert_eq!(outcome.agent_interactions[1].status, InteractionStatus::Completed);
    assert_eq!(outcome.transitions[1].reason, TransitionReason::Failure);
    assert_eq!(
        graph.bus().metrics().counter_value(
            "workflow_failures_total",
            &[("agent", "triage"), ("error_type", "parse_error")]
        ),
        1.0
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retried_within_budget() {
    let faults = Arc::new(FaultPlan::transient(2));
    let graph = WorkflowBuilder::new()
        .registry(registry_with(faults.clone(), Arc::new(FaultPlan::none())))
        .retry_policy(RetryPolicy::new(3, Duration::from_millis(100), 2.0))
        .build();
    let outcome = run(&graph, double_charge()).await;

    let lookup = &outcome.agent_interactions[0].tool_calls[0];
    assert_eq!(lookup.capability, "database_query");
    assert!(lookup.succeeded());
    assert_eq!(lookup.attempts, 3);
    assert_eq!(outcome.metadata.retry_count, 2);
    assert_eq!(outcome.resolution.status, ResolutionStatus::Resolved);
    assert_eq!(
        graph.bus().metrics().counter_value(
            "tool_call_attempts_total",
            &[("tool", "database_query"), ("outcome", "transient_error")]
        ),
        2.0
    );
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_optional_lookup_degrades() {
    let faults = Arc::new(FaultPlan::transient(5));
    let graph = WorkflowBuilder::new()
        .registry(registry_with(faults.clone(), Arc::new(FaultPlan::none())))
        .retry_policy(RetryPolicy::new(3, Duration::from_millis(100), 2.0))
        .build();
    let outcome = run(&graph, double_charge()).await;

    let lookup = &outcome.agent_interactions[0].tool_calls[0];
    assert_eq!(lookup.error_kind.as_deref(), Some("transient_error"));
    assert_eq!(lookup.attempts, 3);
    assert!(!lookup.required);
    assert_eq!(outcome.agent_interactions[0].status, InteractionStatus::Completed);

    // 付款查询：两次失败后第三次成功
    let history = &outcome.agent_interactions[1].tool_calls[0];
    assert!(history.succeeded());
    assert_eq!(history.attempts, 3);
    assert_eq!(faults.calls(), 6);
    assert_eq!(outcome.resolution.status, ResolutionStatus::Resolved);
    assert_eq!(outcome.metadata.error_count, 1);
    assert_eq!(outcome.metadata.retry_count, 4);
}

#[tokio::test]
async fn test_ungranted_capability_fails_closed() {
    let knowledge = Arc::new(FaultPlan::none());
    let grants = CapabilityGrants::new()
        .grant(AgentKind::Triage, &["database_query"])
        .grant(AgentKind::Technical, &["database_query", "email_sender"])
        .grant(AgentKind::Escalation, &["database_query", "email_sender"]);
    let graph = WorkflowBuilder::new()
        .registry(registry_with(Arc::new(FaultPlan::none()), knowledge.clone()))
        .grants(Arc::new(grants))
        .build();
    let outcome = run(&graph, crash_report()).await;

    let technical = &outcome.agent_interactions[1];
    assert_eq!(technical.agent, AgentKind::Technical);
    assert_eq!(technical.status, InteractionStatus::Failed);
    assert_eq!(
        technical.tool_calls[0].error_kind.as_deref(),
        Some("capability_not_registered")
    );
    assert_eq!(technical.tool_calls[0].attempts, 0);
    assert_eq!(knowledge.calls(), 0);
    assert_eq!(outcome.resolution.status, ResolutionStatus::Failed);
    assert!(outcome.resolution.requires_human);
}

#[tokio::test]
async fn test_execution_is_deterministic() {
    let fingerprint = |o: &TicketOutcome| {
        serde_json::json!({
            "path": o.execution_path,
            "routing": o.routing,
            "resolution": o.resolution,
            "calls": o.agent_interactions.iter().map(|i| &i.tool_calls).collect::<Vec<_>>(),
            "tokens": o.metadata.token_usage,
        })
    };
    for request in [double_charge(), crash_report()] {
        let a = run(&WorkflowBuilder::new().build(), request.clone()).await;
        let b = run(&WorkflowBuilder::new().build(), request).await;
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }
}

#[tokio::test]
async fn test_span_count_matches_calls() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .on(
                "you are the triage agent",
                "ROUTE: billing_agent\nURGENCY: medium\nCONFIDENCE: 0.9",
            )
            .on("you are the billing agent", "Refunded.\nACTION: PROCESS_REFUND"),
    );
    let graph = WorkflowBuilder::new().llm(llm.clone()).build();
    let outcome = run(&graph, double_charge()).await;

    let spans = graph.bus().journal().spans(&outcome.correlation_id);
    let tool_calls: usize = outcome
        .agent_interactions
        .iter()
        .map(|i| i.tool_calls.len())
        .sum();
    let count = |level| spans.iter().filter(|s| s.level == level).count();
    assert_eq!(count(SpanLevel::Root), 1);
    assert_eq!(count(SpanLevel::Node), outcome.agent_interactions.len());
    assert_eq!(count(SpanLevel::Call), tool_calls + llm.calls());
    assert_eq!(spans.len(), 1 + 2 + tool_calls + 2);
    assert!(spans.iter().all(|s| s.status == SpanStatus::Ok));

    let root = spans.iter().find(|s| s.level == SpanLevel::Root).unwrap();
    assert!(spans
        .iter()
        .filter(|s| s.level == SpanLevel::Node)
        .all(|s| s.parent_span_id.as_deref() == Some(root.span_id.as_str())));
}

#[tokio::test]
async fn test_all_telemetry_carries_correlation_id() {
    let graph = Arc::new(WorkflowBuilder::new().build());
    let supervisor = TicketSupervisor::new(graph.clone(), &WorkflowSection::default());

    let layer = CorrelationLayer::new();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer.clone()));

    let outcome = supervisor.process(double_charge()).await.unwrap();
    let cid = outcome.correlation_id.as_str();

    let events = layer.events();
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.correlation_id.as_deref() == Some(cid)));
    assert!(events.iter().all(|e| e.trace_id.is_some() && e.span_id.is_some()));
    assert!(events
        .iter()
        .all(|e| e.ticket_id.as_deref() == Some(outcome.ticket_id.as_str())));
    assert!(events
        .iter()
        .any(|e| e.message == "Routing decision" && e.fields["decision"] == "billing_agent"));

    let journal = graph.bus().journal();
    assert!(journal.spans(cid).iter().all(|s| s.correlation_id == cid));
    assert!(!journal.samples(cid).is_empty());
    assert_eq!(journal.correlation_ids(), vec![cid.to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tickets_stay_isolated() {
    let bus = ObservabilityBus::new();
    let graph = Arc::new(WorkflowBuilder::new().bus(bus.clone()).build());
    let supervisor = TicketSupervisor::new(graph, &WorkflowSection::default());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let request = if i % 2 == 0 { double_charge() } else { crash_report() };
            supervisor.submit(request).unwrap()
        })
        .collect();
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.outcome().await.unwrap());
    }

    let ids: HashSet<_> = outcomes.iter().map(|o| o.correlation_id.clone()).collect();
    assert_eq!(ids.len(), 8);
    for outcome in &outcomes {
        let spans = bus.journal().spans(&outcome.correlation_id);
        assert_eq!(spans.iter().filter(|s| s.level == SpanLevel::Root).count(), 1);
        assert!(spans.iter().all(|s| s.ticket_id == outcome.ticket_id));
        assert!(bus
            .journal()
            .samples(&outcome.correlation_id)
            .iter()
            .all(|s| s.correlation_id == outcome.correlation_id));
        assert_eq!(outcome.resolution.status, ResolutionStatus::Resolved);
    }
    assert_eq!(bus.metrics().total("tickets_processed_total"), 8.0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_closes_spans_as_cancelled() {
    let llm = Arc::new(SlowLlm {
        delay: Duration::from_secs(10),
        inner: MockLlmClient::default(),
    });
    let graph = Arc::new(WorkflowBuilder::new().llm(llm).build());
    let supervisor = TicketSupervisor::new(graph.clone(), &WorkflowSection::default());

    let handle = supervisor.submit(double_charge()).unwrap();
    let cid = handle.correlation_id().to_string();
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.cancel();

    let err = handle.outcome().await.unwrap_err();
    assert_eq!(err, DispatchError::Cancelled { correlation_id: cid.clone() });

    let spans = graph.bus().journal().spans(&cid);
    let status_of = |name: &str| spans.iter().find(|s| s.name == name).map(|s| s.status);
    assert_eq!(status_of("tool.database_query"), Some(SpanStatus::Ok));
    assert_eq!(status_of("llm.triage"), Some(SpanStatus::Cancelled));
    assert_eq!(status_of("triage"), Some(SpanStatus::Cancelled));
    assert_eq!(status_of("workflow.execute"), Some(SpanStatus::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_ticket_timeout_reports_correlation_id() {
    let llm = Arc::new(SlowLlm {
        delay: Duration::from_secs(10),
        inner: MockLlmClient::default(),
    });
    let graph = Arc::new(WorkflowBuilder::new().llm(llm).build());
    let supervisor = TicketSupervisor::new(graph.clone(), &WorkflowSection::default())
        .with_timeout(Duration::from_secs(2));

    let handle = supervisor.submit(crash_report()).unwrap();
    let cid = handle.correlation_id().to_string();
    let err = handle.outcome().await.unwrap_err();

    assert_eq!(
        err,
        DispatchError::TimedOut {
            correlation_id: cid.clone(),
            after_ms: 2000
        }
    );
    let spans = graph.bus().journal().spans(&cid);
    assert!(spans
        .iter()
        .any(|s| s.level == SpanLevel::Root && s.status == SpanStatus::Cancelled));
}

#[tokio::test]
async fn test_long_running_supervisor_keeps_bounded_journal() {
    let bus = ObservabilityBus::with_journal_capacity(4);
    let graph = Arc::new(WorkflowBuilder::new().bus(bus.clone()).build());
    let supervisor = TicketSupervisor::new(graph, &WorkflowSection::default());

    let mut cids = Vec::new();
    for _ in 0..10 {
        let outcome = supervisor.process(crash_report()).await.unwrap();
        cids.push(outcome.correlation_id);
    }

    assert_eq!(bus.journal().len(), 4);
    assert!(bus.journal().spans(&cids[0]).is_empty());
    let mut retained = cids[6..].to_vec();
    retained.sort();
    assert_eq!(bus.journal().correlation_ids(), retained);
    assert!(!bus.journal().spans(&cids[9]).is_empty());
    assert_eq!(bus.metrics().total("tickets_processed_total"), 10.0);
}
