//! 工单监管：每张工单一个 tokio 任务
//!
//! 录入时校验请求并分配关联 ID 与工单 ID；Semaphore 限制同时执行的工单数。
//! 每张工单持有监管 token 的子 token，取消或超时时丢弃工作流 future，未结束的 span 记为 cancelled。
//! 无论哪种结局，调用方都能拿到关联 ID。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::WorkflowSection;
use crate::core::error::DispatchError;
use crate::core::state::{AgentState, TicketRequest};
use crate::observability::{short_hex, ObservabilityBus};
use crate::workflow::{TicketOutcome, WorkflowGraph};

/// 已派发工单的句柄
pub struct TicketHandle {
    ticket_id: String,
    correlation_id: String,
    cancel: CancellationToken,
    join: JoinHandle<Result<TicketOutcome, DispatchError>>,
}

impl TicketHandle {
    pub fn ticket_id(&self) -> &str {
        &self.ticket_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// 取消单张工单
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn outcome(self) -> Result<TicketOutcome, DispatchError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(DispatchError::Aborted {
                correlation_id: self.correlation_id,
                message: e.to_string(),
            }),
        }
    }
}

pub struct TicketSupervisor {
    graph: Arc<WorkflowGraph>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    timeout: Duration,
}

impl TicketSupervisor {
    pub fn new(graph: Arc<WorkflowGraph>, config: &WorkflowSection) -> Self {
        Self {
            graph,
            permits: Arc::new(Semaphore::new(config.max_concurrent_tickets.max(1))),
            cancel: CancellationToken::new(),
            timeout: Duration::from_secs(config.ticket_timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn bus(&self) -> &ObservabilityBus {
        self.graph.bus()
    }

    /// 校验并派发一张工单；必须在 tokio 运行时内调用
    pub fn submit(&self, request: TicketRequest) -> Result<TicketHandle, DispatchError> {
        let ctx = self.graph.bus().begin_request();
        let ticket_id = format!("T-{}", &short_hex()[..8]);
        let dispatch = tracing::info_span!(
            "dispatch",
            correlation_id = %ctx.correlation_id,
            trace_id = %ctx.trace_id,
            span_id = %short_hex(),
            ticket_id = %ticket_id,
        );

        if let Err(e) = request.validate() {
            dispatch.in_scope(|| {
                tracing::warn!(field = e.field, reason = %e.reason, "Ticket rejected at intake");
            });
            return Err(DispatchError::Rejected {
                correlation_id: ctx.correlation_id,
                source: e,
            });
        }

        let token = self.cancel.child_token();
        let graph = self.graph.clone();
        let permits = self.permits.clone();
        let timeout = self.timeout;
        let correlation_id = ctx.correlation_id.clone();
        let state = AgentState::new(ticket_id.clone(), correlation_id.clone(), &request);
        let task_token = token.clone();

        let task = async move {
            let cancelled = || DispatchError::Cancelled {
                correlation_id: ctx.correlation_id.clone(),
            };
            let _permit = tokio::select! {
                biased;
                _ = task_token.cancelled() => {
                    tracing::warn!("Ticket cancelled before it started");
                    return Err(cancelled());
                }
                permit = permits.acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(e) => {
                        return Err(DispatchError::Aborted {
                            correlation_id: ctx.correlation_id.clone(),
                            message: e.to_string(),
                        })
                    }
                },
            };

            tracing::info!(customer_id = %request.customer_id, "Ticket accepted");
            tokio::select! {
                biased;
                _ = task_token.cancelled() => {
                    tracing::warn!("Ticket cancelled, workflow dropped");
                    Err(cancelled())
                }
                finished = tokio::time::timeout(timeout, graph.run(&ctx, state)) => match finished {
                    Ok(outcome) => Ok(outcome),
                    Err(_) => {
                        tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Ticket timed out, workflow dropped");
                        Err(DispatchError::TimedOut {
                            correlation_id: ctx.correlation_id.clone(),
                            after_ms: timeout.as_millis() as u64,
                        })
                    }
                },
            }
        }
        .instrument(dispatch);

        Ok(TicketHandle {
            ticket_id,
            correlation_id,
            cancel: token,
            join: tokio::spawn(task),
        })
    }

    /// 派发并等待结果
    pub async fn process(&self, request: TicketRequest) -> Result<TicketOutcome, DispatchError> {
        self.submit(request)?.outcome().await
    }

    /// 取消所有在途工单
    pub fn shutdown(&self) {
        tracing::info!("Ticket supervisor shutting down");
        self.cancel.cancel();
    }
}
