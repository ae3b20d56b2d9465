use anyhow::Result;
use jsonl_pg::{config, engine::Engine, server::serve};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

/// Starts the server.
///
/// 1. Parses `--data` and `--listen`
/// 2. Initialises logging (`RUST_LOG`, default `info`)
/// 3. Opens the data directory and loads table schemas
/// 4. Accepts PostgreSQL clients
///
/// ```bash
/// cargo run -- --data ./dbdata --listen 127.0.0.1:5432
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let matches = config::cli().get_matches();
    let cfg = config::ServerConfig::from_matches(&matches);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let engine = Arc::new(Engine::open(&cfg.data_dir)?);

    serve(engine, &cfg.listen).await
}
