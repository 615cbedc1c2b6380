//! 能力调用器
//!
//! 持有 CapabilityRegistry、CapabilityGrants 与 RetryPolicy。invoke 先做授权检查（失败关闭），
//! 再调用能力；只有 Transient 错误按指数退避重试，重试耗尽后以带尝试次数的 Transient 返回。
//! 每次 invoke 在调用方节点 span 下开一个调用 span，并输出结构化审计日志（JSON）。

use std::sync::Arc;

use serde_json::Value;
use tracing::Instrument;

use crate::core::error::{CapabilityError, ToolError};
use crate::core::state::{AgentKind, ToolCallRecord};
use crate::observability::metrics::{TOOL_ATTEMPTS, TOOL_CALLS, TOOL_DURATION, TOOL_ERRORS};
use crate::observability::{ScopedSpan, SpanStatus};
use crate::tools::{CapabilityGrants, CapabilityRegistry, RetryPolicy};

/// 成功调用的输出与实际尝试次数
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub value: Value,
    pub attempts: u32,
}

#[derive(Clone)]
pub struct ToolInvoker {
    registry: Arc<CapabilityRegistry>,
    grants: Arc<CapabilityGrants>,
    policy: RetryPolicy,
}

impl ToolInvoker {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        grants: Arc<CapabilityGrants>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            grants,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn grants(&self) -> &Arc<CapabilityGrants> {
        &self.grants
    }

    /// 以 agent 身份调用 capability；parent 为调用方节点 span
    pub async fn invoke(
        &self,
        agent: AgentKind,
        parent: &ScopedSpan,
        capability: &str,
        input: Value,
    ) -> Result<ToolOutput, ToolError> {
        let mut span = parent.child(format!("tool.{capability}"));
        span.set_attribute("agent", agent);
        span.set_attribute("capability", capability);

        let result = self.run(agent, &span, capability, input.clone()).await;

        let (status, attempts) = match &result {
            Ok(out) => ("success", out.attempts),
            Err(e) => ("error", e.attempts()),
        };
        span.set_attribute("attempts", attempts);
        span.record_metric(&TOOL_CALLS, &[("tool", capability), ("status", status)], 1.0);
        span.record_metric(&TOOL_DURATION, &[("tool", capability)], span.elapsed_secs());

        let audit = serde_json::json!({
            "event": "tool_audit",
            "agent": agent.as_str(),
            "tool": capability,
            "ok": result.is_ok(),
            "attempts": attempts,
            "duration_ms": (span.elapsed_secs() * 1000.0) as u64,
            "args_preview": args_preview(&input),
        });

        match &result {
            Ok(_) => {
                tracing::info!(parent: span.tracing_span(), audit = %audit, "tool");
                span.finish(SpanStatus::Ok);
            }
            Err(e) => {
                span.set_attribute("error_type", e.kind());
                span.record_metric(
                    &TOOL_ERRORS,
                    &[("tool", capability), ("error_type", e.kind())],
                    1.0,
                );
                tracing::warn!(parent: span.tracing_span(), audit = %audit, error = %e, "tool");
                span.finish(SpanStatus::Error);
            }
        }
        result
    }

    async fn run(
        &self,
        agent: AgentKind,
        span: &ScopedSpan,
        capability: &str,
        input: Value,
    ) -> Result<ToolOutput, ToolError> {
        let not_registered = || ToolError::CapabilityNotRegistered {
            agent: agent.as_str().to_string(),
            capability: capability.to_string(),
        };
        if !self.grants.allows(agent, capability) {
            return Err(not_registered());
        }
        let Some(target) = self.registry.get(capability) else {
            return Err(not_registered());
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = target
                .execute(input.clone())
                .instrument(span.tracing_span().clone())
                .await;

            let label = match &outcome {
                Ok(_) => "success",
                Err(CapabilityError::Validation(_)) => "validation_error",
                Err(CapabilityError::Transient(_)) => "transient_error",
            };
            span.record_metric(&TOOL_ATTEMPTS, &[("tool", capability), ("outcome", label)], 1.0);

            match outcome {
                Ok(value) => {
                    return Ok(ToolOutput {
                        value,
                        attempts: attempt,
                    })
                }
                Err(CapabilityError::Validation(message)) => {
                    return Err(ToolError::Validation {
                        capability: capability.to_string(),
                        message,
                    })
                }
                Err(CapabilityError::Transient(message)) => {
                    if attempt >= self.policy.max_attempts {
                        return Err(ToolError::Transient {
                            capability: capability.to_string(),
                            message,
                            attempts: attempt,
                        });
                    }
                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        parent: span.tracing_span(),
                        tool = capability,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Transient capability failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// 将一次调用结果转为交互记录中的 ToolCallRecord
pub fn record_call(
    capability: &str,
    input: Value,
    result: &Result<ToolOutput, ToolError>,
    required: bool,
) -> ToolCallRecord {
    match result {
        Ok(out) => ToolCallRecord {
            capability: capability.to_string(),
            input,
            output: Some(out.value.clone()),
            error: None,
            error_kind: None,
            attempts: out.attempts,
            required,
        },
        Err(e) => ToolCallRecord {
            capability: capability.to_string(),
            input,
            output: None,
            error: Some(e.to_string()),
            error_kind: Some(e.kind().to_string()),
            attempts: e.attempts(),
            required,
        },
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
