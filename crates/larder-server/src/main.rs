use std::path::PathBuf;

use clap::Parser;

use larder_server::config::ServerConfig;
use larder_server::service;

#[derive(Parser, Debug)]
#[command(name = "larder-server", about = "Event hub and API for shared household lists")]
struct Args {
    /// Listen address (overrides the config file).
    #[arg(long)]
    listen: Option<String>,

    /// Path to config.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Allowed CORS origin (repeatable); pass "*" to allow any.
    #[arg(long = "allow-origin", default_value = "http://localhost:3000")]
    allow_origins: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "larder_server=info,liblarder=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    service::run(config, args.allow_origins).await
}
