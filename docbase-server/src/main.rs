use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use docbase_server::{
    config::{Config, StorageConfig},
    server::run_with_config_until_ctrl_c,
};
use tracing::debug;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[clap(version, about = "Versioned document store with an HTTP API")]
struct Cli {
    /// Path to config file
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Path to the document database, overrides the storage section of the config
    #[clap(short, long)]
    path: Option<PathBuf>,
    /// Address to listen on, overrides the http section of the config
    ///
    /// A bare `:port` listens on all interfaces.
    #[clap(short, long, value_parser = parse_listen)]
    listen: Option<SocketAddr>,
}

fn parse_listen(s: &str) -> Result<SocketAddr> {
    if let Some(port) = s.strip_prefix(':') {
        let port: u16 = port.parse().context("invalid port")?;
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
    }
    s.parse().context("invalid listen address")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Cli::parse();

    let mut config = if let Some(path) = args.config {
        debug!("loading config from {:?}", path);
        Config::load(path).await?
    } else {
        debug!("using default config");
        Config::default()
    };

    if let Some(path) = args.path {
        config.storage = StorageConfig::Persistent { path: Some(path) };
    }
    if let Some(addr) = args.listen {
        config.http.bind_addr = Some(addr.ip());
        config.http.port = addr.port();
    }

    run_with_config_until_ctrl_c(config).await
}
