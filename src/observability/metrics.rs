//! 指标注册表：计数器与直方图，按标签分序列，输出 Prometheus 文本格式
//!
//! 所有工单共享同一个 Metrics（Arc），内部以 Mutex 保护。

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Histogram,
}

impl MetricKind {
    fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Histogram => "histogram",
        }
    }
}

/// 指标定义：名称、类型与说明
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDef {
    pub name: &'static str,
    pub kind: MetricKind,
    pub help: &'static str,
}

impl MetricDef {
    pub const fn counter(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            help,
        }
    }

    pub const fn histogram(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Histogram,
            help,
        }
    }
}

// 智能体
pub const AGENT_INVOCATIONS: MetricDef =
    MetricDef::counter("agent_invocation_count", "Agent node executions by outcome");
pub const AGENT_DECISION_LATENCY: MetricDef = MetricDef::histogram(
    "agent_decision_latency_seconds",
    "Wall-clock time of one agent decision cycle",
);
pub const AGENT_ERRORS: MetricDef =
    MetricDef::counter("agent_error_count", "Agent node failures by error type");

// 能力调用
pub const TOOL_CALLS: MetricDef =
    MetricDef::counter("tool_call_count", "Capability invocations by final outcome");
pub const TOOL_ATTEMPTS: MetricDef = MetricDef::counter(
    "tool_call_attempts_total",
    "Individual capability attempts including retries",
);
pub const TOOL_DURATION: MetricDef = MetricDef::histogram(
    "tool_call_duration_seconds",
    "Capability invocation time including backoff",
);
pub const TOOL_ERRORS: MetricDef =
    MetricDef::counter("tool_error_count", "Capability invocation failures by error type");

// 模型
pub const LLM_TOKENS: MetricDef =
    MetricDef::counter("llm_tokens_used", "Model tokens consumed by direction");
pub const LLM_COST: MetricDef =
    MetricDef::counter("llm_api_cost_dollars", "Estimated model spend per agent in USD");
pub const LLM_LATENCY: MetricDef =
    MetricDef::histogram("llm_request_duration_seconds", "Model request time per agent");

// 工单 / 工作流
pub const TICKETS_PROCESSED: MetricDef =
    MetricDef::counter("tickets_processed_total", "Tickets that reached a terminal outcome");
pub const TICKET_RESOLUTION_TIME: MetricDef = MetricDef::histogram(
    "ticket_resolution_time_seconds",
    "End-to-end workflow time per ticket",
);
pub const WORKFLOW_FAILURES: MetricDef = MetricDef::counter(
    "workflow_failures_total",
    "Failures absorbed by the workflow, by agent and error type",
);
pub const ESCALATIONS: MetricDef =
    MetricDef::counter("escalations_total", "Transitions into the escalation node by trigger");

const DEFAULT_BUCKETS: [f64; 12] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

type LabelSet = Vec<(String, String)>;

#[derive(Debug, Clone)]
enum SeriesValue {
    Counter(f64),
    Histogram {
        /// 每个桶的非累计计数
        buckets: Vec<u64>,
        sum: f64,
        count: u64,
    },
}

#[derive(Debug)]
struct Family {
    def: MetricDef,
    series: BTreeMap<LabelSet, SeriesValue>,
}

/// 线程安全的指标注册表
#[derive(Debug, Default)]
pub struct Metrics {
    families: Mutex<BTreeMap<&'static str, Family>>,
}

fn label_set(labels: &[(&str, &str)]) -> LabelSet {
    let mut set: LabelSet = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    set.sort();
    set
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 计数器累加 value；直方图记录一次观测值
    pub fn record(&self, def: &MetricDef, labels: &[(&str, &str)], value: f64) {
        let Ok(mut families) = self.families.lock() else {
            tracing::warn!(metric = def.name, "Metrics registry poisoned, sample dropped");
            return;
        };
        let family = families.entry(def.name).or_insert_with(|| Family {
            def: *def,
            series: BTreeMap::new(),
        });
        let entry = family
            .series
            .entry(label_set(labels))
            .or_insert_with(|| match def.kind {
                MetricKind::Counter => SeriesValue::Counter(0.0),
                MetricKind::Histogram => SeriesValue::Histogram {
                    buckets: vec![0; DEFAULT_BUCKETS.len()],
                    sum: 0.0,
                    count: 0,
                },
            });
        match entry {
            SeriesValue::Counter(total) => *total += value,
            SeriesValue::Histogram {
                buckets,
                sum,
                count,
            } => {
                if let Some(idx) = DEFAULT_BUCKETS.iter().position(|b| value <= *b) {
                    buckets[idx] += 1;
                }
                *sum += value;
                *count += 1;
            }
        }
    }

    /// 计数器当前值（不存在为 0）
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        match self.lookup(name, labels) {
            Some(SeriesValue::Counter(v)) => v,
            _ => 0.0,
        }
    }

    /// 直方图观测次数（不存在为 0）
    pub fn histogram_count(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        match self.lookup(name, labels) {
            Some(SeriesValue::Histogram { count, .. }) => count,
            _ => 0,
        }
    }

    /// 某指标所有序列之和（计数器为累计值，直方图为观测次数）
    pub fn total(&self, name: &str) -> f64 {
        let Ok(families) = self.families.lock() else {
            return 0.0;
        };
        families
            .get(name)
            .map(|f| {
                f.series
                    .values()
                    .map(|v| match v {
                        SeriesValue::Counter(c) => *c,
                        SeriesValue::Histogram { count, .. } => *count as f64,
                    })
                    .sum()
            })
            .unwrap_or(0.0)
    }

    fn lookup(&self, name: &str, labels: &[(&str, &str)]) -> Option<SeriesValue> {
        let families = self.families.lock().ok()?;
        families
            .get(name)?
            .series
            .get(&label_set(labels))
            .cloned()
    }

    /// Prometheus 文本暴露格式
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        let Ok(families) = self.families.lock() else {
            return out;
        };
        for family in families.values() {
            let name = family.def.name;
            let _ = writeln!(out, "# HELP {} {}", name, family.def.help);
            let _ = writeln!(out, "# TYPE {} {}", name, family.def.kind.as_str());
            for (labels, value) in &family.series {
                match value {
                    SeriesValue::Counter(v) => {
                        let _ = writeln!(out, "{}{} {}", name, render_labels(labels, None), v);
                    }
                    SeriesValue::Histogram {
                        buckets,
                        sum,
                        count,
                    } => {
                        let mut cumulative = 0;
                        for (bound, n) in DEFAULT_BUCKETS.iter().zip(buckets) {
                            cumulative += n;
                            let le = bound.to_string();
                            let _ = writeln!(
                                out,
                                "{}_bucket{} {}",
                                name,
                                render_labels(labels, Some(&le)),
                                cumulative
                            );
                        }
                        let _ = writeln!(
                            out,
                            "{}_bucket{} {}",
                            name,
                            render_labels(labels, Some("+Inf")),
                            count
                        );
                        let _ = writeln!(out, "{}_sum{} {}", name, render_labels(labels, None), sum);
                        let _ = writeln!(
                            out,
                            "{}_count{} {}",
                            name,
                            render_labels(labels, None),
                            count
                        );
                    }
                }
            }
        }
        out
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn render_labels(labels: &LabelSet, le: Option<&str>) -> String {
    let mut parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect();
    if let Some(le) = le {
        parts.push(format!("le=\"{}\"", le));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_accumulates_per_label_set() {
        let m = Metrics::new();
        m.record(&TOOL_CALLS, &[("tool", "database_query"), ("status", "success")], 1.0);
        m.record(&TOOL_CALLS, &[("status", "success"), ("tool", "database_query")], 1.0);
        m.record(&TOOL_CALLS, &[("tool", "database_query"), ("status", "error")], 1.0);
        assert_eq!(
            m.counter_value(
                "tool_call_count",
                &[("tool", "database_query"), ("status", "success")]
            ),
            2.0
        );
        assert_eq!(m.total("tool_call_count"), 3.0);
    }

    #[test]
    fn test_render_prometheus_histogram() {
        let m = Metrics::new();
        m.record(&AGENT_DECISION_LATENCY, &[("agent", "triage")], 0.02);
        m.record(&AGENT_DECISION_LATENCY, &[("agent", "triage")], 3.0);
        let text = m.render_prometheus();
        assert!(text.contains("# TYPE agent_decision_latency_seconds histogram"));
        assert!(text.contains("agent_decision_latency_seconds_bucket{agent=\"triage\",le=\"0.025\"} 1"));
        assert!(text.contains("agent_decision_latency_seconds_bucket{agent=\"triage\",le=\"+Inf\"} 2"));
        assert!(text.contains("agent_decision_latency_seconds_count{agent=\"triage\"} 2"));
        assert_eq!(m.histogram_count("agent_decision_latency_seconds", &[("agent", "triage")]), 2);
    }

    #[test]
    fn test_label_values_are_escaped() {
        let m = Metrics::new();
        m.record(&ESCALATIONS, &[("reason", "say \"hi\"")], 1.0);
        assert!(m
            .render_prometheus()
            .contains("escalations_total{reason=\"say \\\"hi\\\"\"} 1"));
    }
}
