//! 可观测性：关联 ID、span 层级、指标与结构化日志
//!
//! - `ObservabilityBus`：每个请求分配 CorrelationContext，创建根 span，持有共享的指标与日志簿
//! - `ScopedSpan`：RAII span，关闭时写入 TelemetryJournal
//! - `Metrics`：计数器 / 直方图，Prometheus 文本输出
//! - `CorrelationLayer`：记录日志事件及其关联 ID
//! - `init`：安装 tracing-subscriber（EnvFilter + pretty / json 输出）

pub mod journal;
pub mod layer;
pub mod metrics;
pub mod span;

use std::sync::Arc;

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use journal::{MetricSample, DEFAULT_JOURNAL_CAPACITY, SpanLevel, SpanRecord, SpanStatus, TelemetryJournal};
pub use layer::{CapturedEvent, CorrelationLayer};
pub use metrics::{MetricDef, MetricKind, Metrics};
pub use span::ScopedSpan;

use crate::config::ObservabilitySection;

/// 一个请求的关联标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    /// "CID-" + 16 位十六进制
    pub correlation_id: String,
    /// 32 位十六进制
    pub trace_id: String,
}

impl CorrelationContext {
    /// 沿用已分配的关联 ID，为本次执行开新的 trace
    pub fn for_correlation(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            trace_id: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

pub(crate) fn short_hex() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

/// 可观测性总线：可廉价 Clone，所有工单共享同一组 Metrics 与 TelemetryJournal
#[derive(Debug, Clone, Default)]
pub struct ObservabilityBus {
    metrics: Arc<Metrics>,
    journal: Arc<TelemetryJournal>,
}

impl ObservabilityBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 日志簿最多保留 capacity 张工单的 span 与样本；指标计数不受影响
    pub fn with_journal_capacity(capacity: usize) -> Self {
        Self {
            metrics: Arc::new(Metrics::default()),
            journal: Arc::new(TelemetryJournal::with_capacity(capacity)),
        }
    }

    pub fn begin_request(&self) -> CorrelationContext {
        CorrelationContext {
            correlation_id: format!("CID-{}", short_hex()),
            trace_id: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// 创建一次工作流执行的根 span
    pub fn scoped_span(&self, ctx: &CorrelationContext, ticket_id: &str, name: &str) -> ScopedSpan {
        ScopedSpan::root(
            ctx,
            ticket_id,
            name,
            self.metrics.clone(),
            self.journal.clone(),
        )
    }

    /// 不属于任何 span 的指标（如派发阶段的拒绝）
    pub fn record_metric(
        &self,
        correlation_id: &str,
        def: &MetricDef,
        labels: &[(&str, &str)],
        value: f64,
    ) {
        self.metrics.record(def, labels, value);
        self.journal.record_sample(MetricSample {
            name: def.name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            value,
            correlation_id: correlation_id.to_string(),
        });
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn journal(&self) -> &Arc<TelemetryJournal> {
        &self.journal
    }
}

/// 安装全局 tracing subscriber。RUST_LOG 优先于配置中的 log_level。
/// json 格式输出当前 span 链字段，使每行日志带上 correlation_id / trace_id / span_id / ticket_id。
pub fn init(section: &ObservabilitySection) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(section.log_level.as_str()));

    let json = section.log_format.eq_ignore_ascii_case("json");
    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
    });
    let pretty_layer = (!json).then(|| fmt::layer().with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
}
