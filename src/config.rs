//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DESK__*` 覆盖（双下划线表示嵌套，如 `DESK__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::tools::RetryPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub retry: RetrySection,
    pub workflow: WorkflowSection,
    pub observability: ObservabilitySection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "deskflow".to_string(),
        }
    }
}

/// [llm] 段：后端选择、超时、重试与计价
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：mock / openai
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
    /// 限流 / 超时后的额外重试次数
    pub max_retries: u32,
    pub pricing: PricingSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "mock-support-model".to_string(),
            base_url: None,
            timeout_secs: 60,
            max_retries: 2,
            pricing: PricingSection::default(),
        }
    }
}

/// [llm.pricing] 段：每百万 token 的美元价格
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PricingSection {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl Default for PricingSection {
    fn default() -> Self {
        Self {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
        }
    }
}

/// [retry] 段：能力调用的指数退避参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 2_000,
        }
    }
}

impl RetrySection {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            self.multiplier,
        )
        .with_max_delay(Duration::from_millis(self.max_delay_ms))
    }
}

/// [workflow] 段：单票超时、并发上限、升级阈值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    pub ticket_timeout_secs: u64,
    pub max_concurrent_tickets: usize,
    /// critical 工单的置信度低于该值时强制升级
    pub escalation_confidence_threshold: f64,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            ticket_timeout_secs: 120,
            max_concurrent_tickets: 16,
            escalation_confidence_threshold: 0.5,
        }
    }
}

/// [observability] 段：日志级别与格式（pretty / json）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilitySection {
    pub log_level: String,
    pub log_format: String,
    /// 遥测日志簿保留的工单数
    pub journal_capacity: usize,
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            journal_capacity: crate::observability::DEFAULT_JOURNAL_CAPACITY,
        }
    }
}

/// 从 config 目录加载配置，环境变量 DESK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DESK__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DESK")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
