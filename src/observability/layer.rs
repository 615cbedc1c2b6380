//! CorrelationLayer：tracing-subscriber 层，记录每条日志事件及其所在 span 链上的关联 ID
//!
//! span 创建时把字段存入 span extensions；事件发生时自内向外查找 correlation_id / trace_id /
//! span_id / ticket_id，连同消息与字段一起追加到共享的事件列表。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// 一条被捕获的日志事件
#[derive(Debug, Clone, Serialize)]
pub struct CapturedEvent {
    pub level: String,
    pub target: String,
    pub message: String,
    pub correlation_id: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub ticket_id: Option<String>,
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct FieldMap(BTreeMap<String, String>);

impl Visit for FieldMap {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0
            .insert(field.name().to_string(), format!("{:?}", value));
    }
}

#[derive(Debug, Clone, Default)]
pub struct CorrelationLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CorrelationLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已捕获事件的快照
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn events_for(&self, correlation_id: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.correlation_id.as_deref() == Some(correlation_id))
            .collect()
    }
}

impl<S> Layer<S> for CorrelationLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = FieldMap::default();
        attrs.record(&mut fields);
        span.extensions_mut().insert(fields);
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut ext = span.extensions_mut();
        if let Some(fields) = ext.get_mut::<FieldMap>() {
            values.record(fields);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut fields = FieldMap::default();
        event.record(&mut fields);
        let message = fields.0.remove("message").unwrap_or_default();

        let mut found: BTreeMap<&'static str, String> = BTreeMap::new();
        if let Some(scope) = ctx.event_scope(event) {
            // 自内向外：最内层 span 的 span_id 优先
            for span in scope {
                let ext = span.extensions();
                let Some(span_fields) = ext.get::<FieldMap>() else {
                    continue;
                };
                for key in ["correlation_id", "trace_id", "span_id", "ticket_id"] {
                    if !found.contains_key(key) {
                        if let Some(v) = span_fields.0.get(key) {
                            found.insert(key, v.clone());
                        }
                    }
                }
            }
        }

        let captured = CapturedEvent {
            level: event.metadata().level().to_string(),
            target: event.metadata().target().to_string(),
            message,
            correlation_id: found.remove("correlation_id"),
            trace_id: found.remove("trace_id"),
            span_id: found.remove("span_id"),
            ticket_id: found.remove("ticket_id"),
            fields: fields.0,
        };
        if let Ok(mut events) = self.events.lock() {
            events.push(captured);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::prelude::*;

    #[test]
    fn test_event_inherits_correlation_from_span_scope() {
        let layer = CorrelationLayer::new();
        let subscriber = tracing_subscriber::registry().with(layer.clone());
        tracing::subscriber::with_default(subscriber, || {
            let outer = tracing::info_span!("workflow", correlation_id = %"CID-1", span_id = %"aa");
            let _g = outer.enter();
            let inner = tracing::info_span!("node", span_id = %"bb");
            inner.in_scope(|| tracing::info!(agent = "triage", "routing decided"));
            tracing::info!("outside node");
        });
        tracing::info!("no subscriber");

        let events = layer.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "routing decided");
        assert_eq!(events[0].correlation_id.as_deref(), Some("CID-1"));
        assert_eq!(events[0].span_id.as_deref(), Some("bb"));
        assert_eq!(events[0].fields["agent"], "triage");
        assert_eq!(events[1].span_id.as_deref(), Some("aa"));
        assert_eq!(layer.events_for("CID-1").len(), 2);
    }
}
