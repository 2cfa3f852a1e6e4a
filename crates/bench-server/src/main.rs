//! bench-server CLI
//!
//! Serve the worker and test management API.

use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use bench_server::{router, spawn_dispatcher, AppState, LogNotifier, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_usage() {
    println!("bench-server");
    println!();
    println!("Usage:");
    println!("  bench-server [config.toml]");
    println!();
    println!("Without a config file every setting takes its default.");
    println!("RUST_LOG overrides the configured log filter.");
}

fn load_config(args: &[String]) -> anyhow::Result<Option<ServerConfig>> {
    match args.first().map(String::as_str) {
        None => Ok(Some(ServerConfig::default())),
        Some("help" | "--help" | "-h") => {
            print_usage();
            Ok(None)
        }
        Some(path) => {
            let config = ServerConfig::load(Path::new(path))
                .with_context(|| format!("loading config from {path}"))?;
            Ok(Some(config))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(config) = load_config(&args)? else {
        return Ok(());
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (notifications, _dispatcher) = spawn_dispatcher(Arc::new(LogNotifier));

    let bind = config.bind.clone();
    let state = Arc::new(AppState::new(config, Some(notifications)));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(address = %bind, "listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
