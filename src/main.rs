// src/main.rs

//! The main entry point for the placementd control plane.

use anyhow::Result;
use placementd::config::Config;
use placementd::server;
use std::env;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    // Handle the --version flag.
    if args.contains(&"--version".to_string()) {
        println!("placementd version {VERSION}");
        return Ok(());
    }

    // An optional positional argument names the configuration file.
    let config = match args.get(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .compact()
        .with_ansi(true)
        .init();

    info!("placementd {VERSION} starting.");
    server::run(config).await
}
