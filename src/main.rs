mod config;
mod errors;
mod logging;
mod mcp;
mod project;
mod runner;
mod security;
mod server;
mod tools;

#[cfg(test)]
mod testing;

use crate::config::Config;
use anyhow::Context;
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let mut config_path = PathBuf::from("moat.toml");
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() { eprintln!("--config requires a path"); std::process::exit(2); }
                config_path = PathBuf::from(&args[i]);
            }
            other => {
                eprintln!("unknown argument: {other}");
                std::process::exit(2);
            }
        }
        i += 1;
    }

    let cfg = Config::load(&config_path).with_context(|| format!("loading config {}", config_path.display()))?;
    cfg.validate().context("validating config")?;

    let addr = format!("{}:{}", cfg.server.bind_addr, cfg.server.port);

    let registry = mcp::registry::ToolRegistry::new(&cfg).context("initializing tools")?;

    info!(
        addr = %addr,
        base_path = %cfg.server.base_path,
        registry = %cfg.registry.system_config.display(),
        sessions = %cfg.sessions.root.display(),
        tools = ?registry.list_names(),
        "moat ready"
    );

    server::serve(cfg, registry).await
}
