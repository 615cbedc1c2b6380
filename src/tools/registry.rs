//! 能力注册表与授权表
//!
//! 所有能力实现 Capability trait（name / description / 参数 schema / execute），由 CapabilityRegistry
//! 按名注册与查找；CapabilityGrants 是「智能体 → 允许调用的能力」的静态有序映射，ToolInvoker
//! 在真正调用前以它做失败关闭检查。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::error::CapabilityError;
use crate::core::state::AgentKind;

/// 能力 trait：名称、描述、参数 schema、异步执行（输入输出均为 JSON）
#[async_trait]
pub trait Capability: Send + Sync {
    /// 能力名称（授权表与调用记录中使用）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 输入参数 JSON Schema；默认不限参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, input: Value) -> Result<Value, CapabilityError>;
}

/// 将 JSON 输入解码为类型化参数，失败即 Validation 错误
pub fn decode_input<T: DeserializeOwned>(input: Value) -> Result<T, CapabilityError> {
    serde_json::from_value(input).map_err(|e| CapabilityError::Validation(e.to_string()))
}

/// 由 schemars 生成类型化参数的 JSON Schema
pub fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}

/// 能力注册表：按名称存储 Arc<dyn Capability>
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: impl Capability + 'static) {
        let name = capability.name().to_string();
        self.capabilities.insert(name, Arc::new(capability));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// 按名称排序
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    /// 返回 (name, description) 列表，用于拼入角色指令
    pub fn descriptions(&self) -> Vec<(String, String)> {
        let mut list: Vec<(String, String)> = self
            .capabilities
            .iter()
            .map(|(name, c)| (name.clone(), c.description().to_string()))
            .collect();
        list.sort();
        list
    }

    /// 全部能力的 schema（name / description / parameters）
    pub fn to_schema_json(&self) -> String {
        let mut entries: Vec<(&String, &Arc<dyn Capability>)> = self.capabilities.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let list: Vec<Value> = entries
            .into_iter()
            .map(|(name, c)| {
                serde_json::json!({
                    "name": name,
                    "description": c.description(),
                    "parameters": c.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&list).unwrap_or_else(|_| "[]".to_string())
    }
}

/// 智能体 → 允许调用的能力名
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityGrants {
    grants: BTreeMap<AgentKind, Vec<String>>,
}

impl CapabilityGrants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, agent: AgentKind, capabilities: &[&str]) -> Self {
        let entry = self.grants.entry(agent).or_default();
        for c in capabilities {
            if !entry.iter().any(|e| e == c) {
                entry.push(c.to_string());
            }
        }
        self
    }

    /// 支持工单场景的默认授权
    pub fn support_defaults() -> Self {
        Self::new()
            .grant(AgentKind::Triage, &["database_query"])
            .grant(
                AgentKind::Billing,
                &["database_query", "payment_gateway", "email_sender"],
            )
            .grant(
                AgentKind::Technical,
                &["database_query", "knowledge_base", "email_sender"],
            )
            .grant(AgentKind::Account, &["database_query", "email_sender"])
            .grant(
                AgentKind::Escalation,
                &[
                    "database_query",
                    "payment_gateway",
                    "knowledge_base",
                    "email_sender",
                ],
            )
    }

    pub fn allows(&self, agent: AgentKind, capability: &str) -> bool {
        self.grants
            .get(&agent)
            .is_some_and(|caps| caps.iter().any(|c| c == capability))
    }

    pub fn granted(&self, agent: AgentKind) -> &[String] {
        self.grants.get(&agent).map(Vec::as_slice).unwrap_or(&[])
    }
}
