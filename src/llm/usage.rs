//! Token 估算与成本计算

use crate::config::PricingSection;

/// 粗略估算：约 4 个字符一个 token，至少为 1
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64 / 4).max(1)
}

/// 按每百万 token 单价计算请求成本（美元）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl CostModel {
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1_000_000.0) * self.input_per_mtok
            + (completion_tokens as f64 / 1_000_000.0) * self.output_per_mtok
    }
}

impl Default for CostModel {
    fn default() -> Self {
        PricingSection::default().into()
    }
}

impl From<PricingSection> for CostModel {
    fn from(p: PricingSection) -> Self {
        Self {
            input_per_mtok: p.input_per_mtok,
            output_per_mtok: p.output_per_mtok,
        }
    }
}
