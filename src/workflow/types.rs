//! 工作流类型：阶段、转移与工单结果

use std::fmt;

use serde::Serialize;

use crate::core::state::{
    AgentInteraction, AgentKind, AgentState, Metadata, Resolution, Routing,
};

/// 工作流阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Start,
    Triage,
    Billing,
    Technical,
    Account,
    Escalation,
    Done,
}

impl Stage {
    pub fn of(kind: AgentKind) -> Stage {
        match kind {
            AgentKind::Triage => Stage::Triage,
            AgentKind::Billing => Stage::Billing,
            AgentKind::Technical => Stage::Technical,
            AgentKind::Account => Stage::Account,
            AgentKind::Escalation => Stage::Escalation,
        }
    }

    /// 该阶段执行的节点；START / DONE 没有节点
    pub fn agent(&self) -> Option<AgentKind> {
        match self {
            Stage::Triage => Some(AgentKind::Triage),
            Stage::Billing => Some(AgentKind::Billing),
            Stage::Technical => Some(AgentKind::Technical),
            Stage::Account => Some(AgentKind::Account),
            Stage::Escalation => Some(AgentKind::Escalation),
            Stage::Start | Stage::Done => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "START",
            Stage::Triage => "TRIAGE",
            Stage::Billing => "BILLING",
            Stage::Technical => "TECHNICAL",
            Stage::Account => "ACCOUNT",
            Stage::Escalation => "ESCALATION",
            Stage::Done => "DONE",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 转移原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    Start,
    /// 按分诊结果进入专家节点
    Routed,
    /// 分诊标签无法映射（或缺失）
    UnmappedRoute,
    /// 工单已失败
    Failure,
    /// 节点显式请求升级
    EscalationRequested,
    /// critical 且置信度低于阈值
    CriticalLowConfidence,
    Completed,
}

impl TransitionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionReason::Start => "start",
            TransitionReason::Routed => "routed",
            TransitionReason::UnmappedRoute => "unmapped_route",
            TransitionReason::Failure => "failure",
            TransitionReason::EscalationRequested => "escalation_requested",
            TransitionReason::CriticalLowConfidence => "critical_low_confidence",
            TransitionReason::Completed => "completed",
        }
    }
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: Stage,
    pub to: Stage,
    pub reason: TransitionReason,
}

/// 返回给调用方的工单结果
#[derive(Debug, Clone, Serialize)]
pub struct TicketOutcome {
    pub ticket_id: String,
    pub correlation_id: String,
    pub routing: Option<Routing>,
    pub agent_interactions: Vec<AgentInteraction>,
    pub resolution: Resolution,
    pub metadata: Metadata,
    pub execution_path: Vec<Stage>,
    pub transitions: Vec<Transition>,
}

impl TicketOutcome {
    pub fn new(state: AgentState, transitions: Vec<Transition>) -> Self {
        let mut execution_path = vec![Stage::Start];
        execution_path.extend(transitions.iter().map(|t| t.to));
        Self {
            ticket_id: state.ticket_id().to_string(),
            correlation_id: state.correlation_id().to_string(),
            routing: state.routing().cloned(),
            agent_interactions: state.agent_interactions().to_vec(),
            resolution: state.resolution().clone(),
            metadata: state.metadata().clone(),
            execution_path,
            transitions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_agent_roundtrip() {
        for kind in AgentKind::ALL {
            assert_eq!(Stage::of(kind).agent(), Some(kind));
        }
        assert_eq!(Stage::Done.agent(), None);
    }

    #[test]
    fn test_outcome_execution_path() {
        let req = crate::core::state::TicketRequest::new("C12345", "Hi", "Question");
        let state = AgentState::new("T-1", "CID-1", &req);
        let transitions = vec![
            Transition {
                from: Stage::Start,
                to: Stage::Triage,
                reason: TransitionReason::Start,
            },
            Transition {
                from: Stage::Triage,
                to: Stage::Done,
                reason: TransitionReason::Completed,
            },
        ];
        let outcome = TicketOutcome::new(state, transitions);
        assert_eq!(
            outcome.execution_path,
            vec![Stage::Start, Stage::Triage, Stage::Done]
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["execution_path"][1], "TRIAGE");
        assert_eq!(json["transitions"][0]["reason"], "start");
    }
}
