//!
//! techmarket server binary
//! -------------------------
//! Command-line entry point for starting the techmarket HTTP API. Supports
//! configuration via CLI flags and environment variables; flags win.

use anyhow::Result;
use std::env;

use techmarket::identity::{TokenService, DEFAULT_TOKEN_TTL_SECS};

fn parse_port_env(name: &str) -> Option<u16> {
    match env::var(name) {
        Ok(val) => val.parse::<u16>().ok(),
        Err(_) => None,
    }
}

fn parse_port_arg(args: &[String], flag: &str) -> Option<u16> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return args[i + 1].parse::<u16>().ok();
        }
        i += 1;
    }
    None
}

fn parse_string_arg(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag {
            if i + 1 < args.len() {
                return Some(args[i + 1].clone());
            }
            return None;
        }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber with env filter if provided
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!(
            "TechMarket API server\n\nUSAGE:\n  techmarket_server [--http-port N] [--db-folder PATH]\n\nOPTIONS:\n  --http-port N       HTTP API port (env: TECHMARKET_HTTP_PORT, default 4000)\n  --db-folder PATH    Data root folder (env: TECHMARKET_DB_FOLDER, default data/techmarket)\n\nENVIRONMENT:\n  TECHMARKET_JWT_SECRET       Token signing secret (required for register/login)\n  TECHMARKET_TOKEN_TTL_SECS   Token lifetime in seconds (default {} = 7 days)\n",
            DEFAULT_TOKEN_TTL_SECS
        );
        return Ok(());
    }

    let default_http: u16 = 4000;
    let default_root: &str = "data/techmarket";

    let env_http = parse_port_env("TECHMARKET_HTTP_PORT");
    let env_root = env::var("TECHMARKET_DB_FOLDER").ok();

    // CLI arguments override environment
    let arg_http = parse_port_arg(&args, "--http-port");
    let arg_root = parse_string_arg(&args, "--db-folder");

    let http_port = arg_http.or(env_http).unwrap_or(default_http);
    let db_root = arg_root.or(env_root).unwrap_or_else(|| default_root.to_string());

    let tokens = TokenService::from_env();

    println!("TechMarket API starting: http={}, db_root={}", http_port, db_root);
    tracing::info!("Using port: http={}, db_root={}", http_port, db_root);

    techmarket::server::run_with_port(http_port, &db_root, tokens).await
}
