//! Deskflow - 支持工单多智能体编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、工单状态与增量合并、工单监管（每票一个任务）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock），重试与计价
//! - **tools**: 能力注册表、授权表、重试调用器，以及数据库 / 支付 / 邮件 / 知识库
//! - **agents**: 分诊、账单、技术、账户、升级五个节点与回复协议解析
//! - **workflow**: 阶段与条件边、工作流图、构建器
//! - **observability**: 关联 ID、span 层级、指标、结构化日志

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod tools;
pub mod workflow;

pub use crate::core::{TicketRequest, TicketSupervisor};
pub use workflow::{TicketOutcome, WorkflowBuilder, WorkflowGraph};
