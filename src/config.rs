// src/config.rs
use clap::Parser;

// Startup configuration. Exactly one transport is selected per process:
// HTTP when any of the flags/envs below ask for it, stdio otherwise.
#[derive(Parser, Debug)]
#[command(
    name = "matlab-mcp",
    version,
    about = "MCP server exposing MATLAB code execution over stdio or HTTP"
)]
pub struct Cli {
    /// Serve JSON-RPC over HTTP instead of the stdio pipe
    #[arg(long)]
    pub http: bool,

    /// Alias for --http, kept for SSE-era launch configurations
    #[arg(long)]
    pub sse: bool,

    /// Port for the HTTP transport
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Path to the MATLAB executable (resolved via PATH when bare)
    #[arg(long, env = "MATLAB_PATH", default_value = "matlab")]
    pub matlab_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http,
}

impl Cli {
    pub fn transport(&self) -> TransportKind {
        if self.http || self.sse || env_flag("USE_HTTP") || env_flag("USE_SSE") {
            TransportKind::Http
        } else {
            TransportKind::Stdio
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "true").unwrap_or(false)
}
