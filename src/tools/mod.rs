//! 能力层：注册表与授权、重试策略、调用器，以及数据库 / 支付 / 邮件 / 知识库的内存实现

pub mod database;
pub mod email;
pub mod faults;
pub mod invoker;
pub mod knowledge_base;
pub mod payment;
pub mod registry;
pub mod retry;

pub use database::DatabaseTool;
pub use email::EmailTool;
pub use faults::FaultPlan;
pub use invoker::{record_call, ToolInvoker, ToolOutput};
pub use knowledge_base::KnowledgeBaseTool;
pub use payment::PaymentTool;
pub use registry::{decode_input, schema_of, Capability, CapabilityGrants, CapabilityRegistry};
pub use retry::RetryPolicy;

/// 注册全部内存能力
pub fn default_registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(DatabaseTool::new());
    registry.register(PaymentTool::new());
    registry.register(EmailTool::new());
    registry.register(KnowledgeBaseTool::new());
    registry
}
