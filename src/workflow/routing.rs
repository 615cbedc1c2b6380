//! 条件边：分诊后的正常路由与升级判定
//!
//! 升级判定在每个节点之后独立于正常边求值，命中即进入 ESCALATION。
//! 多个条件同时成立时，记录的原因按 失败 → 显式请求 → critical 低置信度 的顺序取第一个。

use crate::core::state::{AgentState, ResolutionStatus, Urgency};
use crate::workflow::types::{Stage, TransitionReason};

/// 分诊之后的正常边；未映射或缺失的路由进入升级，不视为错误
pub fn route_after_triage(state: &AgentState) -> (Stage, TransitionReason) {
    match state.routing().and_then(|r| r.assigned_agent) {
        Some(kind) => (Stage::of(kind), TransitionReason::Routed),
        None => (Stage::Escalation, TransitionReason::UnmappedRoute),
    }
}

/// 升级判定：返回第一个成立的触发原因
pub fn escalation_trigger(state: &AgentState, threshold: f64) -> Option<TransitionReason> {
    if state.resolution().status == ResolutionStatus::Failed {
        return Some(TransitionReason::Failure);
    }
    if state.last_interaction().is_some_and(|i| i.escalate) {
        return Some(TransitionReason::EscalationRequested);
    }
    if let Some(routing) = state.routing() {
        if routing.urgency == Urgency::Critical && routing.confidence_score < threshold {
            return Some(TransitionReason::CriticalLowConfidence);
        }
    }
    None
}

/// 节点之后的下一阶段。升级节点之后总是 DONE，升级节点最多执行一次。
pub fn next_stage(current: Stage, state: &AgentState, threshold: f64) -> (Stage, TransitionReason) {
    if matches!(current, Stage::Escalation | Stage::Done) {
        return (Stage::Done, TransitionReason::Completed);
    }
    if let Some(reason) = escalation_trigger(state, threshold) {
        return (Stage::Escalation, reason);
    }
    match current {
        Stage::Start => (Stage::Triage, TransitionReason::Start),
        Stage::Triage => route_after_triage(state),
        _ => (Stage::Done, TransitionReason::Completed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::AgentError;
    use crate::core::state::{AgentKind, NodeUpdate, Routing, TicketRequest};

    fn state() -> AgentState {
        let req = TicketRequest::new("C12345", "Charged twice", "Please refund");
        AgentState::new("T-1", "CID-1", &req)
    }

    fn triaged(agent: Option<AgentKind>, urgency: Urgency, confidence: f64) -> AgentState {
        let mut s = state();
        let mut update = NodeUpdate::new(AgentKind::Triage, "route");
        update.routing = Some(Routing {
            assigned_agent: agent,
            requested_route: "x".into(),
            urgency,
            confidence_score: confidence,
            reasoning: String::new(),
        });
        s.merge(update).unwrap();
        s
    }

    #[test]
    fn test_start_goes_to_triage() {
        assert_eq!(
            next_stage(Stage::Start, &state(), 0.5),
            (Stage::Triage, TransitionReason::Start)
        );
    }

    #[test]
    fn test_routed_and_unmapped() {
        let s = triaged(Some(AgentKind::Billing), Urgency::Medium, 0.9);
        assert_eq!(
            next_stage(Stage::Triage, &s, 0.5),
            (Stage::Billing, TransitionReason::Routed)
        );
        let s = triaged(None, Urgency::Medium, 0.4);
        assert_eq!(
            next_stage(Stage::Triage, &s, 0.5),
            (Stage::Escalation, TransitionReason::UnmappedRoute)
        );
    }

    #[test]
    fn test_critical_low_confidence_overrides_route() {
        let s = triaged(Some(AgentKind::Technical), Urgency::Critical, 0.3);
        assert_eq!(
            next_stage(Stage::Triage, &s, 0.5),
            (Stage::Escalation, TransitionReason::CriticalLowConfidence)
        );
        let s = triaged(Some(AgentKind::Technical), Urgency::Critical, 0.5);
        assert_eq!(next_stage(Stage::Triage, &s, 0.5).0, Stage::Technical);
    }

    #[test]
    fn test_failure_takes_priority() {
        let mut s = triaged(Some(AgentKind::Billing), Urgency::Critical, 0.1);
        let mut update = NodeUpdate::new(AgentKind::Billing, "resolve");
        update.escalate = true;
        s.merge(update.fail(AgentError::Parse("bad".into()))).unwrap();
        assert_eq!(escalation_trigger(&s, 0.5), Some(TransitionReason::Failure));
        assert_eq!(
            next_stage(Stage::Billing, &s, 0.5),
            (Stage::Escalation, TransitionReason::Failure)
        );
    }

    #[test]
    fn test_escalation_always_done() {
        let mut s = state();
        s.merge(NodeUpdate::new(AgentKind::Escalation, "escalate").fail(AgentError::Parse("x".into())))
            .unwrap();
        assert_eq!(
            next_stage(Stage::Escalation, &s, 0.5),
            (Stage::Done, TransitionReason::Completed)
        );
    }
}
