//! 升级节点
//!
//! 汇总客户信息、历史工单、已尝试的处理与相关文章，生成交接摘要并转人工。
//! 工单仍为 pending 时定为 `escalated`；已失败的工单只追加转人工标记。
//! 升级节点自身失败时同样保留 requires_human。

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::billing::{latest_payment, refund_request};
use crate::agents::parse::{parse_specialist, Directive};
use crate::agents::prompts::ESCALATION_PROMPT;
use crate::agents::technical::format_articles;
use crate::agents::{truncate, AgentNode, DecisionCycle, NodeContext};
use crate::core::error::AgentError;
use crate::core::state::{
    AgentKind, AgentState, CustomerUpdate, NodeUpdate, ResolutionStatus, ResolutionUpdate,
};

pub struct EscalationAgent;

/// 已执行节点的摘要，供交接使用
fn describe_interactions(state: &AgentState) -> String {
    if state.agent_interactions().is_empty() {
        return "None".to_string();
    }
    state
        .agent_interactions()
        .iter()
        .map(|i| {
            let mut line = format!(
                "- {} {}: {}",
                i.agent_name,
                i.action,
                i.result.as_deref().unwrap_or("no result")
            );
            if let Some(err) = &i.error {
                line.push_str(&format!(" (error: {err})"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe_tickets(history: Option<&Value>) -> String {
    let Some(tickets) = history.and_then(|h| h["tickets"].as_array()) else {
        return "Not available".to_string();
    };
    if tickets.is_empty() {
        return "No previous tickets".to_string();
    }
    tickets
        .iter()
        .map(|t| {
            format!(
                "- {} [{}] {}",
                t["ticket_id"].as_str().unwrap_or("?"),
                t["status"].as_str().unwrap_or("?"),
                t["subject"].as_str().unwrap_or(""),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl EscalationAgent {
    async fn decide(
        &self,
        cycle: &mut DecisionCycle<'_, '_>,
        state: &AgentState,
    ) -> Result<(), AgentError> {
        let customer_id = state.customer_context.customer_id.clone();
        let content = state.ticket_content();

        let info = cycle
            .call(
                "database_query",
                serde_json::json!({"query_type": "customer_info", "customer_id": customer_id}),
            )
            .await?;
        let tickets = cycle
            .call(
                "database_query",
                serde_json::json!({
                    "query_type": "ticket_history",
                    "customer_id": customer_id,
                    "limit": 10
                }),
            )
            .await?;
        let articles = cycle
            .call(
                "knowledge_base",
                serde_json::json!({
                    "query": content.subject,
                    "category": "all",
                    "max_results": 5
                }),
            )
            .await?;

        let customer = info
            .as_ref()
            .filter(|v| v["found"] == true)
            .map(|v| v["customer"].clone());
        let history: Vec<Value> = tickets
            .as_ref()
            .and_then(|t| t["tickets"].as_array())
            .cloned()
            .unwrap_or_default();
        if customer.is_some() || !history.is_empty() {
            let field = |key: &str| {
                customer
                    .as_ref()
                    .and_then(|c| c[key].as_str().map(String::from))
            };
            cycle.update().customer = Some(CustomerUpdate {
                email: field("email"),
                tier: field("tier"),
                account_status: field("account_status"),
                history,
            });
        }

        let routing = state
            .routing()
            .map(|r| {
                format!(
                    "{} ({} urgency, confidence {:.2}): {}",
                    r.requested_route, r.urgency, r.confidence_score, r.reasoning
                )
            })
            .unwrap_or_else(|| "not routed".to_string());
        let user = format!(
            "Ticket: {}\nDescription: {}\nCustomer ID: {}\nTier: {}\nEscalation reason: {}\nRouting: {}\nPrevious agents:\n{}\nTicket history:\n{}\nRelated articles:\n{}",
            content.subject,
            content.body,
            customer_id,
            state
                .customer_context
                .tier
                .as_deref()
                .or_else(|| customer.as_ref().and_then(|c| c["tier"].as_str()))
                .unwrap_or("unknown"),
            cycle.arrival().unwrap_or("direct routing"),
            routing,
            describe_interactions(state),
            describe_tickets(tickets.as_ref()),
            format_articles(articles.as_ref()),
        );
        let reply = cycle.ask(ESCALATION_PROMPT, &user).await?;
        let parsed = parse_specialist(&reply)?;

        let mut actions = Vec::new();
        if parsed.has(Directive::ProcessRefund) {
            let payments = cycle
                .call(
                    "database_query",
                    serde_json::json!({
                        "query_type": "payment_history",
                        "customer_id": customer_id,
                        "limit": 5
                    }),
                )
                .await?;
            match payments.as_ref().and_then(latest_payment) {
                Some(payment) => {
                    let input = refund_request(&customer_id, payment, &content.subject);
                    if cycle.call("payment_gateway", input).await?.is_some() {
                        actions.push("refund issued");
                    }
                }
                None => tracing::warn!(agent = "escalation", "Refund requested but no payment on record"),
            }
        }

        if parsed.has(Directive::SendEmail) {
            let email = state.customer_context.email.clone().or_else(|| {
                customer
                    .as_ref()
                    .and_then(|c| c["email"].as_str().map(String::from))
            });
            if let Some(to) = email {
                let sent = cycle
                    .call(
                        "email_sender",
                        serde_json::json!({
                            "to": to,
                            "subject": format!("Your ticket has been escalated: {}", content.subject),
                            "body": "A support specialist has been assigned to your ticket and will contact you shortly.",
                            "template": "escalation_notice",
                        }),
                    )
                    .await?;
                if sent.is_some() {
                    actions.push("customer notified");
                }
            }
        }

        let already_failed = state.resolution().status == ResolutionStatus::Failed;
        tracing::warn!(
            agent = "escalation",
            decision = "escalated",
            already_failed,
            "Ticket handed off to a human specialist"
        );

        let update = cycle.update();
        update.action = "escalate".into();
        update.reasoning = truncate(&parsed.text, 200);
        update.result = Some(if actions.is_empty() {
            "handed off to human specialist".to_string()
        } else {
            format!("handed off to human specialist ({})", actions.join(", "))
        });
        if !state.resolution().status.is_terminal() {
            update.resolution = Some(ResolutionUpdate {
                status: ResolutionStatus::Escalated,
                response: parsed.text,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AgentNode for EscalationAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Escalation
    }

    async fn process(&self, cx: &NodeContext<'_>, state: &AgentState) -> NodeUpdate {
        let mut cycle = DecisionCycle::new(cx, AgentKind::Escalation, "escalate");
        cycle.update().requires_human = true;
        let result = self.decide(&mut cycle, state).await;
        cycle.finish(result)
    }
}
