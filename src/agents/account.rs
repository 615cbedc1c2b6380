//! 账户节点：查询客户信息，处理登录 / 密码 / 资料类问题

use async_trait::async_trait;

use crate::agents::parse::{parse_specialist, Directive};
use crate::agents::prompts::ACCOUNT_PROMPT;
use crate::agents::{truncate, AgentNode, DecisionCycle, NodeContext};
use crate::core::error::AgentError;
use crate::core::state::{
    AgentKind, AgentState, CustomerUpdate, NodeUpdate, ResolutionStatus, ResolutionUpdate,
};

pub struct AccountAgent;

/// 工单提到密码时使用重置邮件主题
pub(crate) fn email_subject(subject: &str, body: &str) -> String {
    let mentions_password = format!("{subject} {body}")
        .to_lowercase()
        .contains("password");
    if mentions_password {
        "Password Reset Link".to_string()
    } else {
        format!("Re: {subject}")
    }
}

impl AccountAgent {
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
        let customer = info
            .as_ref()
            .filter(|v| v["found"] == true)
            .map(|v| v["customer"].clone());

        let describe = |key: &str| {
            customer
                .as_ref()
                .and_then(|c| c[key].as_str())
                .unwrap_or("unknown")
                .to_string()
        };
        let user = format!(
            "Ticket: {}\nDescription: {}\nCustomer ID: {}\nName: {}\nTier: {}\nAccount status: {}",
            content.subject,
            content.body,
            customer_id,
            describe("name"),
            describe("tier"),
            describe("account_status"),
        );
        let reply = cycle.ask(ACCOUNT_PROMPT, &user).await?;
        let parsed = parse_specialist(&reply)?;

        if let Some(c) = &customer {
            cycle.update().customer = Some(CustomerUpdate {
                email: c["email"].as_str().map(String::from),
                tier: c["tier"].as_str().map(String::from),
                account_status: c["account_status"].as_str().map(String::from),
                history: Vec::new(),
            });
        }

        if parsed.has(Directive::Escalate) {
            let update = cycle.update();
            update.action = "escalate".into();
            update.escalate = true;
            update.reasoning = "Account agent could not safely complete the request".into();
            update.result = Some(truncate(&parsed.text, 200));
            return Ok(());
        }

        let email = state
            .customer_context
            .email
            .clone()
            .or_else(|| customer.as_ref().and_then(|c| c["email"].as_str().map(String::from)));
        match email {
            Some(to) => {
                cycle
                    .call(
                        "email_sender",
                        serde_json::json!({
                            "to": to,
                            "subject": email_subject(&content.subject, &content.body),
                            "body": truncate(&parsed.text, 500),
                        }),
                    )
                    .await?;
            }
            None => tracing::warn!(agent = "account", "No customer email on record, confirmation skipped"),
        }

        tracing::info!(agent = "account", decision = "resolved", "Account request resolved");
        let update = cycle.update();
        update.action = "resolve".into();
        update.reasoning = "Verified account details and applied the requested change".into();
        update.result = Some("Account request handled".into());
        update.resolution = Some(ResolutionUpdate {
            status: ResolutionStatus::Resolved,
            response: parsed.text,
        });
        Ok(())
    }
}

#[async_trait]
impl AgentNode for AccountAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Account
    }

    async fn process(&self, cx: &NodeContext<'_>, state: &AgentState) -> NodeUpdate {
        let mut cycle = DecisionCycle::new(cx, AgentKind::Account, "resolve");
        let result = self.decide(&mut cycle, state).await;
        cycle.finish(result)
    }
}
