//! 账单节点：查询付款记录，按模型指令退款，并发送确认邮件

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::parse::{parse_specialist, Directive};
use crate::agents::prompts::BILLING_PROMPT;
use crate::agents::{truncate, AgentNode, DecisionCycle, NodeContext};
use crate::core::error::AgentError;
use crate::core::state::{AgentKind, AgentState, NodeUpdate, ResolutionStatus, ResolutionUpdate};

pub struct BillingAgent;

/// 最近一笔付款（按日期）
pub(crate) fn latest_payment(history: &Value) -> Option<&Value> {
    history["payments"]
        .as_array()?
        .iter()
        .max_by(|a, b| {
            a["date"]
                .as_str()
                .unwrap_or_default()
                .cmp(b["date"].as_str().unwrap_or_default())
        })
}

pub(crate) fn format_payments(history: Option<&Value>) -> String {
    let Some(payments) = history.and_then(|h| h["payments"].as_array()) else {
        return "Not available".to_string();
    };
    if payments.is_empty() {
        return "No payment history found".to_string();
    }
    payments
        .iter()
        .map(|p| {
            format!(
                "- {} {}: ${:.2} ({}) {}",
                p["payment_id"].as_str().unwrap_or("?"),
                p["date"].as_str().unwrap_or("?"),
                p["amount"].as_f64().unwrap_or_default(),
                p["status"].as_str().unwrap_or("?"),
                p["description"].as_str().unwrap_or(""),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 退款输入：最近一笔付款全额
pub(crate) fn refund_request(customer_id: &str, payment: &Value, subject: &str) -> Value {
    serde_json::json!({
        "operation": "refund",
        "payment_id": payment["payment_id"],
        "customer_id": customer_id,
        "amount": payment["amount"],
        "reason": format!("Issue: {}", truncate(subject, 100)),
    })
}

impl BillingAgent {
    async fn decide(
        &self,
        cycle: &mut DecisionCycle<'_, '_>,
        state: &AgentState,
    ) -> Result<(), AgentError> {
        let customer_id = state.customer_context.customer_id.clone();
        let content = state.ticket_content();

        let history = cycle
            .call(
                "database_query",
                serde_json::json!({
                    "query_type": "payment_history",
                    "customer_id": customer_id,
                    "limit": 5
                }),
            )
            .await?;

        let user = format!(
            "Ticket: {}\nDescription: {}\nCustomer ID: {}\nTier: {}\nPayment history (last 5):\n{}",
            content.subject,
            content.body,
            customer_id,
            state.customer_context.tier.as_deref().unwrap_or("unknown"),
            format_payments(history.as_ref()),
        );
        let reply = cycle.ask(BILLING_PROMPT, &user).await?;
        let parsed = parse_specialist(&reply)?;

        if parsed.has(Directive::Escalate) {
            let update = cycle.update();
            update.action = "escalate".into();
            update.escalate = true;
            update.reasoning = "Billing agent requested human review".into();
            update.result = Some(truncate(&parsed.text, 200));
            return Ok(());
        }

        let mut summary = "Investigated payment history".to_string();
        if parsed.has(Directive::ProcessRefund) {
            match history.as_ref().and_then(latest_payment) {
                Some(payment) => {
                    let input = refund_request(&customer_id, payment, &content.subject);
                    let refund = cycle.call("payment_gateway", input).await?;
                    let refund_id = refund
                        .as_ref()
                        .and_then(|r| r["refund_id"].as_str())
                        .unwrap_or("unknown");
                    let payment_id = payment["payment_id"].as_str().unwrap_or("?");
                    summary = format!("Refunded {payment_id} ({refund_id})");
                }
                None => {
                    let update = cycle.update();
                    update.action = "escalate".into();
                    update.escalate = true;
                    update.reasoning = "Refund requested but no payment on record".into();
                    update.result = Some("no refundable payment found".into());
                    return Ok(());
                }
            }
        }

        match &state.customer_context.email {
            Some(email) => {
                cycle
                    .call(
                        "email_sender",
                        serde_json::json!({
                            "to": email,
                            "subject": format!("Re: {}", content.subject),
                            "body": truncate(&parsed.text, 500),
                        }),
                    )
                    .await?;
            }
            None => tracing::warn!(agent = "billing", "No customer email on record, confirmation skipped"),
        }

        tracing::info!(agent = "billing", decision = "resolved", "Billing issue resolved");
        let update = cycle.update();
        update.action = "resolve".into();
        update.reasoning = summary.clone();
        update.result = Some(summary);
        update.resolution = Some(ResolutionUpdate {
            status: ResolutionStatus::Resolved,
            response: parsed.text,
        });
        Ok(())
    }
}

#[async_trait]
impl AgentNode for BillingAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Billing
    }

    async fn process(&self, cx: &NodeContext<'_>, state: &AgentState) -> NodeUpdate {
        let mut cycle = DecisionCycle::new(cx, AgentKind::Billing, "resolve");
        let result = self.decide(&mut cycle, state).await;
        cycle.finish(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_payment_by_date() {
        let history = serde_json::json!({"payments": [
            {"payment_id": "PAY-001", "date": "2024-11-01", "amount": 49.99},
            {"payment_id": "PAY-002", "date": "2024-12-01", "amount": 49.99}
        ]});
        assert_eq!(latest_payment(&history).unwrap()["payment_id"], "PAY-002");
        assert!(latest_payment(&serde_json::json!({"payments": []})).is_none());
    }

    #[test]
    fn test_format_payments() {
        assert_eq!(format_payments(None), "Not available");
        let history = serde_json::json!({"payments": [
            {"payment_id": "PAY-001", "date": "2024-11-01", "amount": 49.99, "status": "completed", "description": "Pro"}
        ]});
        assert_eq!(
            format_payments(Some(&history)),
            "- PAY-001 2024-11-01: $49.99 (completed) Pro"
        );
    }
}
