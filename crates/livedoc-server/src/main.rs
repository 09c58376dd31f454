//! # livedoc server
//!
//! Pushes document changes to the browsers viewing them.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! livedoc
//!
//! # Run with custom config
//! livedoc --config /path/to/livedoc.toml
//!
//! # Run with environment variables
//! LIVEDOC_PORT=8080 LIVEDOC_CONTENT__ROOT=/srv/docs livedoc
//! ```

mod config;
mod handlers;
mod metrics;
mod watcher;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// livedoc - live document update server
#[derive(Parser, Debug)]
#[command(name = "livedoc")]
#[command(version, about = "Pushes document changes to open browser sessions", long_about = None)]
struct Args {
    /// Configuration file (defaults to the first of livedoc.toml,
    /// /etc/livedoc/livedoc.toml, ~/.config/livedoc/livedoc.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livedoc=debug,livedoc_core=info,livedoc_transport=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load(args.config.as_deref())?;

    tracing::info!("Starting livedoc server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_config_argument() {
        assert!(Args::try_parse_from(["livedoc"]).unwrap().config.is_none());
        assert_eq!(
            Args::try_parse_from(["livedoc", "--config", "/etc/livedoc.toml"])
                .unwrap()
                .config,
            Some(PathBuf::from("/etc/livedoc.toml"))
        );
        assert_eq!(
            Args::try_parse_from(["livedoc", "--config=/srv/livedoc.toml"])
                .unwrap()
                .config,
            Some(PathBuf::from("/srv/livedoc.toml"))
        );
        assert_eq!(
            Args::try_parse_from(["livedoc", "-c", "local.toml"]).unwrap().config,
            Some(PathBuf::from("local.toml"))
        );
        assert!(Args::try_parse_from(["livedoc", "--config"]).is_err());
        assert!(Args::try_parse_from(["livedoc", "--verbose"]).is_err());
    }
}
