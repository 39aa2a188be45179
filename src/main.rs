//! Hive 命令行
//!
//! 用法：hive [--config FILE] [--no-stream] [--groups a,b] <prompt…>
//! 回复文本流式写到 stdout，日志写 stderr；Ctrl+C 取消当前会话。

use std::path::PathBuf;

use anyhow::{bail, Context};
use hive::config::load_config;
use hive::core::ShutdownManager;
use hive::stream::WriterSink;
use hive::{ChatRequest, Dispatcher};

struct CliArgs {
    config: Option<PathBuf>,
    stream: bool,
    groups: Option<Vec<String>>,
    prompt: String,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut config = None;
    let mut stream = true;
    let mut groups = None;
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(args.next().context("--config needs a file")?)),
            "--no-stream" => stream = false,
            "--groups" => {
                let list = args.next().context("--groups needs a comma separated list")?;
                groups = Some(list.split(',').map(|g| g.trim().to_string()).filter(|g| !g.is_empty()).collect());
            }
            _ => words.push(arg),
        }
    }
    if words.is_empty() {
        bail!("usage: hive [--config FILE] [--no-stream] [--groups a,b] <prompt…>");
    }
    Ok(CliArgs {
        config,
        stream,
        groups,
        prompt: words.join(" "),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let args = parse_args()?;
    let cfg = load_config(args.config).context("Failed to load config")?;
    let dispatcher = Dispatcher::from_config(cfg).context("Failed to create llm provider")?;

    let shutdown = ShutdownManager::new();
    shutdown.install_signal_handlers();

    let req = ChatRequest {
        tool_groups: args.groups,
        stream: Some(args.stream),
        ..ChatRequest::user(args.prompt)
    };
    let mut sink = WriterSink::new(tokio::io::stdout());
    let report = dispatcher
        .chat_stream(req, &mut sink, shutdown.session_token())
        .await?;

    let (prompt_tokens, completion_tokens, total_tokens) = dispatcher.llm().token_usage();
    tracing::info!(
        session_id = %report.session_id,
        turns = report.turns,
        prompt_tokens,
        completion_tokens,
        total_tokens,
        "session finished"
    );
    report.into_result()?;
    Ok(())
}
