//! Hive HTTP 服务
//!
//! 启动: cargo run --bin hive-web --features web
//! 监听地址取 [server] bind，默认 127.0.0.1:8080

use anyhow::Context;
use hive::config::load_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    hive::server::serve(cfg).await
}
