//! ScopedSpan：RAII 形式的 span
//!
//! 每个 ScopedSpan 对应一个 tracing span（携带 correlation_id / trace_id / span_id / ticket_id
//! 字段），关闭时写入 TelemetryJournal。调用 `finish` 记为 ok / error；未调用 `finish`
//! 就被释放（panic、提前返回、future 被取消）时记为 cancelled。
//!
//! 层级：工作流一个根 span，每个节点一个子 span，每次能力 / 模型调用一个孙 span。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::observability::journal::{MetricSample, SpanLevel, SpanRecord, SpanStatus, TelemetryJournal};
use crate::observability::metrics::{MetricDef, Metrics};
use crate::observability::{short_hex, CorrelationContext};

pub struct ScopedSpan {
    name: String,
    level: SpanLevel,
    span_id: String,
    parent_span_id: Option<String>,
    correlation_id: String,
    trace_id: String,
    ticket_id: String,
    attributes: BTreeMap<String, String>,
    started: Instant,
    span: tracing::Span,
    closed: bool,
    metrics: Arc<Metrics>,
    journal: Arc<TelemetryJournal>,
}

impl ScopedSpan {
    pub(crate) fn root(
        ctx: &CorrelationContext,
        ticket_id: &str,
        name: &str,
        metrics: Arc<Metrics>,
        journal: Arc<TelemetryJournal>,
    ) -> Self {
        let span_id = short_hex();
        let span = tracing::info_span!(
            "workflow",
            operation = %name,
            correlation_id = %ctx.correlation_id,
            trace_id = %ctx.trace_id,
            span_id = %span_id,
            ticket_id = %ticket_id,
            status = tracing::field::Empty,
        );
        Self {
            name: name.to_string(),
            level: SpanLevel::Root,
            span_id,
            parent_span_id: None,
            correlation_id: ctx.correlation_id.clone(),
            trace_id: ctx.trace_id.clone(),
            ticket_id: ticket_id.to_string(),
            attributes: BTreeMap::new(),
            started: Instant::now(),
            span,
            closed: false,
            metrics,
            journal,
        }
    }

    /// 创建下一层 span：根 → 节点 → 调用
    pub fn child(&self, name: impl Into<String>) -> ScopedSpan {
        let name = name.into();
        let span_id = short_hex();
        let level = match self.level {
            SpanLevel::Root => SpanLevel::Node,
            SpanLevel::Node | SpanLevel::Call => SpanLevel::Call,
        };
        let span = match level {
            SpanLevel::Node => tracing::info_span!(
                parent: &self.span,
                "node",
                operation = %name,
                correlation_id = %self.correlation_id,
                trace_id = %self.trace_id,
                span_id = %span_id,
                ticket_id = %self.ticket_id,
                status = tracing::field::Empty,
            ),
            _ => tracing::info_span!(
                parent: &self.span,
                "call",
                operation = %name,
                correlation_id = %self.correlation_id,
                trace_id = %self.trace_id,
                span_id = %span_id,
                ticket_id = %self.ticket_id,
                status = tracing::field::Empty,
            ),
        };
        ScopedSpan {
            name,
            level,
            span_id,
            parent_span_id: Some(self.span_id.clone()),
            correlation_id: self.correlation_id.clone(),
            trace_id: self.trace_id.clone(),
            ticket_id: self.ticket_id.clone(),
            attributes: BTreeMap::new(),
            started: Instant::now(),
            span,
            closed: false,
            metrics: self.metrics.clone(),
            journal: self.journal.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> SpanLevel {
        self.level
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn ticket_id(&self) -> &str {
        &self.ticket_id
    }

    /// 底层 tracing span，用于 `.instrument(...)` 或 `in_scope`
    pub fn tracing_span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl ToString) {
        self.attributes.insert(key.into(), value.to_string());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// 记录一个带本 span 关联 ID 的指标样本
    pub fn record_metric(&self, def: &MetricDef, labels: &[(&str, &str)], value: f64) {
        self.metrics.record(def, labels, value);
        self.journal.record_sample(MetricSample {
            name: def.name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            value,
            correlation_id: self.correlation_id.clone(),
        });
    }

    pub fn finish(mut self, status: SpanStatus) {
        self.close(status);
    }

    fn close(&mut self, status: SpanStatus) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.span.record("status", status.as_str());
        if status == SpanStatus::Cancelled {
            tracing::warn!(parent: &self.span, operation = %self.name, "Span closed without finishing");
        }
        self.journal.record_span(SpanRecord {
            name: self.name.clone(),
            level: self.level,
            span_id: self.span_id.clone(),
            parent_span_id: self.parent_span_id.clone(),
            correlation_id: self.correlation_id.clone(),
            trace_id: self.trace_id.clone(),
            ticket_id: self.ticket_id.clone(),
            status,
            duration_ms: self.started.elapsed().as_secs_f64() * 1000.0,
            attributes: std::mem::take(&mut self.attributes),
        });
    }
}

impl Drop for ScopedSpan {
    fn drop(&mut self) {
        self.close(SpanStatus::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use crate::observability::journal::{SpanLevel, SpanStatus};
    use crate::observability::ObservabilityBus;

    #[test]
    fn test_hierarchy_and_statuses() {
        let bus = ObservabilityBus::new();
        let ctx = bus.begin_request();
        let root = bus.scoped_span(&ctx, "T-1", "workflow.execute");
        let node = root.child("triage");
        let mut call = node.child("database_query");
        call.set_attribute("attempts", 1);
        call.finish(SpanStatus::Error);
        node.finish(SpanStatus::Ok);
        drop(root);

        let spans = bus.journal().spans(&ctx.correlation_id);
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].level, SpanLevel::Call);
        assert_eq!(spans[0].status, SpanStatus::Error);
        assert_eq!(spans[0].attributes["attempts"], "1");
        assert_eq!(spans[1].level, SpanLevel::Node);
        assert_eq!(spans[0].parent_span_id.as_deref(), Some(spans[1].span_id.as_str()));
        assert_eq!(spans[2].level, SpanLevel::Root);
        assert_eq!(spans[2].status, SpanStatus::Cancelled);
        assert!(spans.iter().all(|s| s.trace_id == ctx.trace_id));
    }

    #[test]
    fn test_metric_samples_carry_correlation_id() {
        let bus = ObservabilityBus::new();
        let ctx = bus.begin_request();
        let root = bus.scoped_span(&ctx, "T-1", "workflow.execute");
        root.record_metric(&crate::observability::metrics::ESCALATIONS, &[("reason", "failure")], 1.0);
        root.finish(SpanStatus::Ok);

        let samples = bus.journal().samples(&ctx.correlation_id);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].correlation_id, ctx.correlation_id);
        assert_eq!(bus.metrics().total("escalations_total"), 1.0);
    }
}
