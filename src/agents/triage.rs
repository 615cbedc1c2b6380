//! 分诊节点：查询客户信息，由模型给出路由、紧急程度与置信度

use async_trait::async_trait;

use crate::agents::parse::parse_triage;
use crate::agents::prompts::TRIAGE_PROMPT;
use crate::agents::{AgentNode, DecisionCycle, NodeContext};
use crate::core::error::AgentError;
use crate::core::state::{AgentKind, AgentState, CustomerUpdate, Routing};

pub struct TriageAgent;

impl TriageAgent {
    async fn decide(
        &self,
        cycle: &mut DecisionCycle<'_, '_>,
        state: &AgentState,
    ) -> Result<(), AgentError> {
        let customer_id = state.customer_context.customer_id.clone();
        let lookup = cycle
            .call(
                "database_query",
                serde_json::json!({"query_type": "customer_info", "customer_id": customer_id}),
            )
            .await?;

        let mut tier = state.customer_context.tier.clone();
        if let Some(customer) = lookup
            .as_ref()
            .filter(|v| v["found"] == true)
            .map(|v| &v["customer"])
        {
            let field = |key: &str| customer[key].as_str().map(String::from);
            tier = field("tier");
            cycle.update().customer = Some(CustomerUpdate {
                email: field("email"),
                tier: field("tier"),
                account_status: field("account_status"),
                history: Vec::new(),
            });
        }

        let content = state.ticket_content();
        let mut user = format!(
            "Subject: {}\nBody: {}\nCustomer ID: {}\nCustomer tier: {}",
            content.subject,
            content.body,
            customer_id,
            tier.as_deref().unwrap_or("unknown"),
        );
        if let Some(hint) = &content.category_hint {
            user.push_str(&format!("\nCategory hint from the customer: {hint}"));
        }

        let reply = cycle.ask(TRIAGE_PROMPT, &user).await?;
        let decision = parse_triage(&reply)?;

        let target = decision
            .assigned_agent
            .map(|a| a.agent_name())
            .unwrap_or("escalation_agent");
        tracing::info!(
            agent = "triage",
            decision = %target,
            requested_route = %decision.route_label,
            urgency = %decision.urgency,
            confidence = decision.confidence,
            "Routing decision"
        );

        let update = cycle.update();
        update.reasoning = decision.reasoning.clone();
        update.result = Some(format!(
            "routed to {target} ({} urgency, confidence {:.2})",
            decision.urgency, decision.confidence
        ));
        update.routing = Some(Routing {
            assigned_agent: decision.assigned_agent,
            requested_route: decision.route_label,
            urgency: decision.urgency,
            confidence_score: decision.confidence,
            reasoning: decision.reasoning,
        });
        Ok(())
    }
}

#[async_trait]
impl AgentNode for TriageAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Triage
    }

    async fn process(&self, cx: &NodeContext<'_>, state: &AgentState) -> crate::core::state::NodeUpdate {
        let mut cycle = DecisionCycle::new(cx, AgentKind::Triage, "route");
        let result = self.decide(&mut cycle, state).await;
        cycle.finish(result)
    }
}
