// src/main.rs
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use matlab_mcp::config::{Cli, TransportKind};
use matlab_mcp::dispatcher::Dispatcher;
use matlab_mcp::engine::MatlabEngine;
use matlab_mcp::transport::{http, stdio};

#[tokio::main]
async fn main() -> Result<()> {
    // clap handles --help/-h and exits 0 before we get here.
    let cli = Cli::parse();

    // stdout carries protocol frames on the stdio transport, so every log
    // line goes to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let engine = Arc::new(MatlabEngine::new(cli.matlab_path.clone()));
    let dispatcher = Arc::new(Dispatcher::new(engine));

    // Startup failures (e.g. port already bound) propagate out as a
    // non-zero exit.
    match cli.transport() {
        TransportKind::Http => http::run_http_server(dispatcher, cli.port).await,
        TransportKind::Stdio => stdio::run_stdio_server(dispatcher).await,
    }
}
