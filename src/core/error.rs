//! 错误分类
//!
//! 分层的错误类型：能力实现（CapabilityError）→ 调用层（ToolError）→ 节点（AgentError）
//! → 状态合并（StateError）→ 工单派发（DispatchError）。节点级错误在工作流内部被吸收，
//! 不会以原始错误的形式越过工作流边界。

use thiserror::Error;

use crate::llm::LlmError;

/// 能力实现自身报告的失败（只区分「输入不合法」与「基础设施暂时不可用」）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("transient failure: {0}")]
    Transient(String),
}

/// ToolInvoker 对调用方暴露的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    /// 输入不合法，不重试
    #[error("Validation error in {capability}: {message}")]
    Validation { capability: String, message: String },

    /// 基础设施类失败；重试耗尽后以永久错误的形式返回，附带尝试次数
    #[error("Transient error in {capability} after {attempts} attempt(s): {message}")]
    Transient {
        capability: String,
        message: String,
        attempts: u32,
    },

    /// 调用方无权调用该能力（或能力未注册），在真正调用前即失败关闭
    #[error("Capability '{capability}' is not registered for agent '{agent}'")]
    CapabilityNotRegistered { agent: String, capability: String },
}

impl ToolError {
    pub fn capability(&self) -> &str {
        match self {
            ToolError::Validation { capability, .. }
            | ToolError::Transient { capability, .. }
            | ToolError::CapabilityNotRegistered { capability, .. } => capability,
        }
    }

    /// 指标与日志中使用的错误类别标签
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Validation { .. } => "validation_error",
            ToolError::Transient { .. } => "transient_error",
            ToolError::CapabilityNotRegistered { .. } => "capability_not_registered",
        }
    }

    /// 实际发生的调用次数（未注册时为 0）
    pub fn attempts(&self) -> u32 {
        match self {
            ToolError::Validation { .. } => 1,
            ToolError::Transient { attempts, .. } => *attempts,
            ToolError::CapabilityNotRegistered { .. } => 0,
        }
    }
}

/// 单个专家节点决策周期中的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 模型回复不符合字段协议
    #[error("Parse error: {0}")]
    Parse(String),

    /// 必需能力调用失败
    #[error("Required capability failed: {0}")]
    Tool(#[from] ToolError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// 未分类的意外错误（节点 panic、状态合并违规等）
    #[error("Workflow fatal error: {0}")]
    WorkflowFatal(String),
}

impl AgentError {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Parse(_) => "parse_error",
            AgentError::Tool(e) => e.kind(),
            AgentError::Llm(_) => "llm_error",
            AgentError::WorkflowFatal(_) => "workflow_fatal_error",
        }
    }
}

/// 违反 AgentState 的一次性写入 / 只追加约束
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("routing decision already set")]
    RoutingAlreadySet,

    #[error("resolution already settled as {0}")]
    ResolutionAlreadySettled(String),

    #[error("resolution can only move to a terminal status, got {0}")]
    NonTerminalResolution(String),
}

/// 工单录入校验失败
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid ticket field '{field}': {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// 工单派发层错误：任何情况下都带回关联 ID
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("ticket rejected ({correlation_id}): {source}")]
    Rejected {
        correlation_id: String,
        #[source]
        source: ValidationError,
    },

    #[error("ticket cancelled ({correlation_id})")]
    Cancelled { correlation_id: String },

    #[error("ticket timed out after {after_ms}ms ({correlation_id})")]
    TimedOut { correlation_id: String, after_ms: u64 },

    #[error("ticket task aborted ({correlation_id}): {message}")]
    Aborted {
        correlation_id: String,
        message: String,
    },
}

impl DispatchError {
    pub fn correlation_id(&self) -> &str {
        match self {
            DispatchError::Rejected { correlation_id, .. }
            | DispatchError::Cancelled { correlation_id }
            | DispatchError::TimedOut { correlation_id, .. }
            | DispatchError::Aborted { correlation_id, .. } => correlation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_kinds() {
        let err = ToolError::Transient {
            capability: "payment_gateway".into(),
            message: "gateway unavailable".into(),
            attempts: 3,
        };
        assert_eq!(err.kind(), "transient_error");
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.capability(), "payment_gateway");

        let denied = ToolError::CapabilityNotRegistered {
            agent: "technical".into(),
            capability: "payment_gateway".into(),
        };
        assert_eq!(denied.attempts(), 0);
        assert_eq!(AgentError::from(denied).kind(), "capability_not_registered");
    }

    #[test]
    fn test_dispatch_error_keeps_correlation_id() {
        let err = DispatchError::TimedOut {
            correlation_id: "CID-0011223344556677".into(),
            after_ms: 30_000,
        };
        assert_eq!(err.correlation_id(), "CID-0011223344556677");
        assert!(err.to_string().contains("30000ms"));
    }
}
