//! 遥测日志簿：按关联 ID 记录已关闭的 span 与指标样本，用于审计与测试

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanLevel {
    /// 一次工作流执行
    Root,
    /// 一个节点执行
    Node,
    /// 一次能力 / 模型调用
    Call,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    Error,
    /// 未调用 finish 即被释放（panic、提前返回、future 被取消）
    Cancelled,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Ok => "ok",
            SpanStatus::Error => "error",
            SpanStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    pub name: String,
    pub level: SpanLevel,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub correlation_id: String,
    pub trace_id: String,
    pub ticket_id: String,
    pub status: SpanStatus,
    pub duration_ms: f64,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
    pub correlation_id: String,
}

#[derive(Debug, Default)]
struct Trail {
    spans: Vec<SpanRecord>,
    samples: Vec<MetricSample>,
}

#[derive(Debug, Default)]
struct Trails {
    by_id: HashMap<String, Trail>,
    /// 关联 ID 按首次出现排序，超出容量时从队首淘汰
    order: VecDeque<String>,
}

/// 默认保留的关联 ID 数
pub const DEFAULT_JOURNAL_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct TelemetryJournal {
    trails: Mutex<Trails>,
    capacity: usize,
}

impl Default for TelemetryJournal {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_JOURNAL_CAPACITY)
    }
}

impl TelemetryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最多保留 capacity 个关联 ID 的记录，最早出现的先被淘汰
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            trails: Mutex::new(Trails::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn with_trail(&self, correlation_id: &str, f: impl FnOnce(&mut Trail)) {
        let Ok(mut trails) = self.trails.lock() else {
            return;
        };
        if !trails.by_id.contains_key(correlation_id) {
            trails.order.push_back(correlation_id.to_string());
            while trails.order.len() > self.capacity {
                if let Some(evicted) = trails.order.pop_front() {
                    trails.by_id.remove(&evicted);
                    tracing::debug!(correlation_id = %evicted, "Telemetry trail evicted");
                }
            }
        }
        f(trails.by_id.entry(correlation_id.to_string()).or_default());
    }

    pub fn record_span(&self, record: SpanRecord) {
        let cid = record.correlation_id.clone();
        self.with_trail(&cid, |trail| trail.spans.push(record));
    }

    pub fn record_sample(&self, sample: MetricSample) {
        let cid = sample.correlation_id.clone();
        self.with_trail(&cid, |trail| trail.samples.push(sample));
    }

    /// 按关闭顺序返回该关联 ID 的全部 span
    pub fn spans(&self, correlation_id: &str) -> Vec<SpanRecord> {
        self.trails
            .lock()
            .ok()
            .and_then(|t| t.by_id.get(correlation_id).map(|trail| trail.spans.clone()))
            .unwrap_or_default()
    }

    pub fn samples(&self, correlation_id: &str) -> Vec<MetricSample> {
        self.trails
            .lock()
            .ok()
            .and_then(|t| t.by_id.get(correlation_id).map(|trail| trail.samples.clone()))
            .unwrap_or_default()
    }

    pub fn correlation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .trails
            .lock()
            .map(|t| t.by_id.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.trails.lock().map(|t| t.by_id.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取出并移除某个关联 ID 的记录
    pub fn take(&self, correlation_id: &str) -> (Vec<SpanRecord>, Vec<MetricSample>) {
        let Ok(mut trails) = self.trails.lock() else {
            return Default::default();
        };
        trails.order.retain(|id| id != correlation_id);
        trails
            .by_id
            .remove(correlation_id)
            .map(|trail| (trail.spans, trail.samples))
            .unwrap_or_default()
    }
}
