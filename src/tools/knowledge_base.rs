//! 内存知识库检索能力（knowledge_base）
//!
//! 关键词打分：每个查询词命中标题 +0.1，命中正文 +0.05，在文章基础分上累加后降序取前 N 条。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::CapabilityError;
use crate::tools::{decode_input, schema_of, Capability, FaultPlan};

const CATEGORIES: [&str; 4] = ["all", "technical", "billing", "account"];

fn default_category() -> String {
    "all".to_string()
}

fn default_max_results() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct KnowledgeBaseQuery {
    pub query: String,
    /// all / technical / billing / account
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Article {
    pub id: &'static str,
    pub title: &'static str,
    pub category: &'static str,
    pub content: &'static str,
    pub relevance_score: f64,
}

const ARTICLES: [Article; 8] = [
    Article {
        id: "KB-001",
        title: "How to reset your password",
        category: "account",
        content: "To reset your password, go to Settings > Security > Reset Password. You'll receive an email with a reset link.",
        relevance_score: 0.95,
    },
    Article {
        id: "KB-002",
        title: "Understanding your bill",
        category: "billing",
        content: "Your bill includes your subscription tier, any add-ons, and usage charges. Pro tier is $49.99/month.",
        relevance_score: 0.92,
    },
    Article {
        id: "KB-003",
        title: "Troubleshooting connection issues",
        category: "technical",
        content: "If you're experiencing connection issues, try: 1) Clear browser cache 2) Check firewall settings 3) Restart your device.",
        relevance_score: 0.88,
    },
    Article {
        id: "KB-004",
        title: "How to request a refund",
        category: "billing",
        content: "Refunds can be requested within 30 days of payment. Contact support with your payment ID and reason.",
        relevance_score: 0.90,
    },
    Article {
        id: "KB-005",
        title: "Updating account information",
        category: "account",
        content: "Update your email, name, or billing address in Settings > Account > Profile Information.",
        relevance_score: 0.85,
    },
    Article {
        id: "KB-006",
        title: "API rate limits explained",
        category: "technical",
        content: "API rate limits vary by tier: Free (100/day), Pro (1000/day), Enterprise (unlimited).",
        relevance_score: 0.87,
    },
    Article {
        id: "KB-007",
        title: "Subscription upgrade process",
        category: "billing",
        content: "Upgrade your subscription at any time. You'll be prorated for the remaining time in your billing cycle.",
        relevance_score: 0.89,
    },
    Article {
        id: "KB-008",
        title: "Two-factor authentication setup",
        category: "account",
        content: "Enable 2FA in Settings > Security > Two-Factor Authentication. Use an authenticator app like Google Authenticator.",
        relevance_score: 0.93,
    },
];

pub struct KnowledgeBaseTool {
    faults: Arc<FaultPlan>,
}

impl KnowledgeBaseTool {
    pub fn new() -> Self {
        Self {
            faults: Arc::new(FaultPlan::none()),
        }
    }

    pub fn with_faults(mut self, faults: Arc<FaultPlan>) -> Self {
        self.faults = faults;
        self
    }

    fn search(query: &KnowledgeBaseQuery) -> Vec<Article> {
        let query_lower = query.query.to_lowercase();
        let words: Vec<&str> = query_lower.split_whitespace().collect();
        let mut results: Vec<Article> = ARTICLES
            .iter()
            .filter(|a| query.category == "all" || a.category == query.category)
            .map(|a| {
                let title = a.title.to_lowercase();
                let content = a.content.to_lowercase();
                let mut score = a.relevance_score;
                for word in &words {
                    if title.contains(word) {
                        score += 0.1;
                    }
                    if content.contains(word) {
                        score += 0.05;
                    }
                }
                Article {
                    relevance_score: score,
                    ..a.clone()
                }
            })
            .collect();
        results.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        results.truncate(query.max_results);
        results
    }
}

impl Default for KnowledgeBaseTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for KnowledgeBaseTool {
    fn name(&self) -> &str {
        "knowledge_base"
    }

    fn description(&self) -> &str {
        "Search the knowledge base for help articles and documentation"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<KnowledgeBaseQuery>()
    }

    async fn execute(&self, input: Value) -> Result<Value, CapabilityError> {
        let query: KnowledgeBaseQuery = decode_input(input)?;
        if !CATEGORIES.contains(&query.category.as_str()) {
            return Err(CapabilityError::Validation(format!(
                "unknown category '{}'",
                query.category
            )));
        }
        self.faults.check("knowledge base")?;

        let results = Self::search(&query);
        Ok(serde_json::json!({
            "found": !results.is_empty(),
            "query": query.query,
            "category": query.category,
            "total_found": results.len(),
            "results": serde_json::to_value(&results)
                .map_err(|e| CapabilityError::Validation(e.to_string()))?,
        }))
    }
}
