//! Deskflow 演示入口
//!
//! 加载配置、初始化日志，处理一张工单，输出结果 JSON 与 Prometheus 指标文本。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use deskflow::config::load_config;
use deskflow::{observability, TicketRequest, TicketSupervisor, WorkflowBuilder};

/// 通过多智能体工作流处理一张支持工单
#[derive(Parser)]
#[command(name = "deskflow", about = "Support ticket multi-agent workflow demo")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "C12345")]
    customer: String,

    #[arg(long, default_value = "Charged twice this month")]
    subject: String,

    #[arg(
        long,
        default_value = "I was charged twice for my Pro subscription. Please refund the duplicate payment."
    )]
    body: String,

    #[arg(long)]
    email: Option<String>,

    /// 客户自选的分类提示
    #[arg(long)]
    category: Option<String>,

    /// 不输出指标
    #[arg(long)]
    no_metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.clone()).context("Failed to load configuration")?;
    observability::init(&config.observability).context("Failed to install tracing subscriber")?;

    let graph = Arc::new(WorkflowBuilder::from_config(&config).build());
    let supervisor = TicketSupervisor::new(graph.clone(), &config.workflow);

    let mut request = TicketRequest::new(cli.customer, cli.subject, cli.body);
    if let Some(email) = cli.email {
        request = request.with_email(email);
    }
    if let Some(hint) = cli.category {
        request = request.with_category_hint(hint);
    }

    let outcome = supervisor
        .process(request)
        .await
        .context("Ticket processing failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&outcome).context("Failed to serialise outcome")?
    );
    if !cli.no_metrics {
        println!("\n{}", graph.bus().metrics().render_prometheus());
    }
    Ok(())
}
