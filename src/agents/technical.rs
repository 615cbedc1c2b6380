//! 技术支持节点：检索知识库，给出排障步骤并邮件发送

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::parse::{parse_specialist, Directive};
use crate::agents::prompts::TECHNICAL_PROMPT;
use crate::agents::{truncate, AgentNode, DecisionCycle, NodeContext};
use crate::core::error::AgentError;
use crate::core::state::{AgentKind, AgentState, NodeUpdate, ResolutionStatus, ResolutionUpdate};

pub struct TechnicalAgent;

pub(crate) fn format_articles(results: Option<&Value>) -> String {
    let Some(articles) = results.and_then(|r| r["results"].as_array()) else {
        return "No articles available".to_string();
    };
    if articles.is_empty() {
        return "No matching articles".to_string();
    }
    articles
        .iter()
        .map(|a| {
            format!(
                "[{}] {}: {}",
                a["id"].as_str().unwrap_or("?"),
                a["title"].as_str().unwrap_or(""),
                a["content"].as_str().unwrap_or(""),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl TechnicalAgent {
    async fn decide(
        &self,
        cycle: &mut DecisionCycle<'_, '_>,
        state: &AgentState,
    ) -> Result<(), AgentError> {
        let content = state.ticket_content();
        let articles = cycle
            .call(
                "knowledge_base",
                serde_json::json!({
                    "query": format!("{} {}", content.subject, truncate(&content.body, 200)),
                    "category": "technical",
                    "max_results": 3
                }),
            )
            .await?;
        let article_count = articles
            .as_ref()
            .and_then(|a| a["results"].as_array())
            .map_or(0, Vec::len);

        let user = format!(
            "Ticket: {}\nDescription: {}\nCustomer tier: {}\nRelevant articles:\n{}",
            content.subject,
            content.body,
            state.customer_context.tier.as_deref().unwrap_or("unknown"),
            format_articles(articles.as_ref()),
        );
        let reply = cycle.ask(TECHNICAL_PROMPT, &user).await?;
        let parsed = parse_specialist(&reply)?;

        if parsed.has(Directive::Escalate) {
            let update = cycle.update();
            update.action = "escalate".into();
            update.escalate = true;
            update.reasoning = "Technical agent flagged an issue engineering must handle".into();
            update.result = Some(truncate(&parsed.text, 200));
            return Ok(());
        }

        match &state.customer_context.email {
            Some(email) => {
                cycle
                    .call(
                        "email_sender",
                        serde_json::json!({
                            "to": email,
                            "subject": format!("Troubleshooting guide: {}", content.subject),
                            "body": truncate(&parsed.text, 500),
                            "template": "technical_guide",
                        }),
                    )
                    .await?;
            }
            None => tracing::warn!(agent = "technical", "No customer email on record, guide not sent"),
        }

        tracing::info!(
            agent = "technical",
            decision = "resolved",
            articles = article_count,
            "Technical issue resolved"
        );
        let update = cycle.update();
        update.action = "resolve".into();
        update.reasoning = format!("Matched {article_count} knowledge base article(s)");
        update.result = Some("Troubleshooting guide provided".into());
        update.resolution = Some(ResolutionUpdate {
            status: ResolutionStatus::Resolved,
            response: parsed.text,
        });
        Ok(())
    }
}

#[async_trait]
impl AgentNode for TechnicalAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Technical
    }

    async fn process(&self, cx: &NodeContext<'_>, state: &AgentState) -> NodeUpdate {
        let mut cycle = DecisionCycle::new(cx, AgentKind::Technical, "resolve");
        let result = self.decide(&mut cycle, state).await;
        cycle.finish(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_articles() {
        assert_eq!(format_articles(None), "No articles available");
        let results = serde_json::json!({"results": [
            {"id": "KB-003", "title": "Troubleshooting", "content": "Clear cache"}
        ]});
        assert_eq!(
            format_articles(Some(&results)),
            "[KB-003] Troubleshooting: Clear cache"
        );
    }
}
