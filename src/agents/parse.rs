//! 模型回复协议解析
//!
//! 分诊：ROUTE / URGENCY / CONFIDENCE 必填，REASONING 可选；字段以换行或 `|` 分隔，标签不区分大小写。
//! 专家：自由文本 + 零或多行 `ACTION: <DIRECTIVE>`。

use std::sync::OnceLock;

use regex::Regex;

use crate::core::error::AgentError;
use crate::core::state::{AgentKind, Urgency};

#[derive(Debug, Clone, PartialEq)]
pub struct TriageDecision {
    pub route_label: String,
    pub assigned_agent: Option<AgentKind>,
    pub urgency: Urgency,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    ProcessRefund,
    SendEmail,
    Escalate,
}

impl Directive {
    fn parse(raw: &str) -> Option<Directive> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PROCESS_REFUND" => Some(Directive::ProcessRefund),
            "SEND_EMAIL" => Some(Directive::SendEmail),
            "ESCALATE" => Some(Directive::Escalate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpecialistReply {
    /// 去掉指令行后的解决方案文本
    pub text: String,
    /// 按出现顺序去重
    pub directives: Vec<Directive>,
}

impl SpecialistReply {
    pub fn has(&self, directive: Directive) -> bool {
        self.directives.contains(&directive)
    }
}

fn field_regex(label: &str) -> Option<Regex> {
    // 标签只认行首或 `|` 之后；值截止到 `|` 或行尾
    Regex::new(&format!(r"(?im)(?:^|\|)\s*{label}\s*:\s*([^|\n]*)")).ok()
}

struct Patterns {
    route: Regex,
    urgency: Regex,
    confidence: Regex,
    reasoning: Regex,
    action: Regex,
}

fn patterns() -> Result<&'static Patterns, AgentError> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                route: field_regex("ROUTE")?,
                urgency: field_regex("URGENCY")?,
                confidence: field_regex("CONFIDENCE")?,
                reasoning: Regex::new(r"(?im)(?:^|\|)\s*REASONING\s*:\s*([^\n]*)").ok()?,
                action: Regex::new(r"(?i)^\s*ACTION\s*:\s*(.*?)\s*$").ok()?,
            })
        })
        .as_ref()
        .ok_or_else(|| AgentError::WorkflowFatal("response protocol patterns failed to compile".into()))
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn parse_triage(text: &str) -> Result<TriageDecision, AgentError> {
    let p = patterns()?;

    let route_label = capture(&p.route, text)
        .ok_or_else(|| AgentError::Parse("missing ROUTE field".into()))?;
    let urgency_raw = capture(&p.urgency, text)
        .ok_or_else(|| AgentError::Parse("missing URGENCY field".into()))?;
    let confidence_raw = capture(&p.confidence, text)
        .ok_or_else(|| AgentError::Parse("missing CONFIDENCE field".into()))?;

    let urgency = Urgency::parse(&urgency_raw)
        .ok_or_else(|| AgentError::Parse(format!("unknown urgency '{urgency_raw}'")))?;
    let confidence: f64 = confidence_raw
        .parse()
        .map_err(|_| AgentError::Parse(format!("confidence '{confidence_raw}' is not a number")))?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(AgentError::Parse(format!(
            "confidence {confidence} outside [0, 1]"
        )));
    }

    let reasoning = capture(&p.reasoning, text)
        .map(|r| r.trim_end_matches('|').trim().to_string())
        .unwrap_or_default();

    Ok(TriageDecision {
        assigned_agent: AgentKind::from_route_label(&route_label),
        route_label,
        urgency,
        confidence,
        reasoning,
    })
}

pub fn parse_specialist(text: &str) -> Result<SpecialistReply, AgentError> {
    let re = &patterns()?.action;
    let mut directives = Vec::new();
    let mut body = Vec::new();

    for line in text.lines() {
        match re.captures(line).and_then(|c| c.get(1)) {
            Some(m) => {
                let directive = Directive::parse(m.as_str()).ok_or_else(|| {
                    AgentError::Parse(format!("unknown directive '{}'", m.as_str()))
                })?;
                if !directives.contains(&directive) {
                    directives.push(directive);
                }
            }
            None => body.push(line),
        }
    }

    let text = body.join("\n").trim().to_string();
    if text.is_empty() {
        return Err(AgentError::Parse("empty resolution text".into()));
    }
    Ok(SpecialistReply { text, directives })
}
