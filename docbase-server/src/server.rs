//! The main server which wires the storage engine into the HTTP API.

use std::net::SocketAddr;

use anyhow::Result;
use tracing::info;

use crate::{
    config::Config, http::HttpServer, service::Service, state::AppState, store::SharedEngine,
};

/// Spawn the server and run until the `Ctrl-C` signal is received, then shutdown.
pub async fn run_with_config_until_ctrl_c(config: Config) -> Result<()> {
    let engine = config.storage.open()?;
    let server = Server::spawn(config, engine).await?;
    tokio::signal::ctrl_c().await?;
    info!("shutdown");
    server.shutdown().await?;
    Ok(())
}

/// The docbase server.
#[derive(Debug)]
pub struct Server {
    http_server: HttpServer,
}

impl Server {
    /// Spawn the server on top of `engine`.
    ///
    /// The storage section of `config` is ignored, the engine is expected to be opened already.
    pub async fn spawn(config: Config, engine: SharedEngine) -> Result<Self> {
        let state = AppState {
            service: Service::new(engine),
            request_timeout: config.request_timeout,
        };
        let http_server = HttpServer::spawn(config.http, state).await?;
        Ok(Self { http_server })
    }

    /// The bound address of the HTTP API.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_server.http_addr()
    }

    /// Cancel the server tasks and wait for all tasks to complete.
    pub async fn shutdown(self) -> Result<()> {
        self.http_server.shutdown().await
    }

    /// Wait for all tasks to complete.
    ///
    /// This will run forever unless the HTTP server fails, or [`Self::shutdown`] is called.
    pub async fn run_until_error(self) -> Result<()> {
        self.http_server.run_until_done().await
    }

    /// Spawn a server suitable for testing.
    ///
    /// The server listens on a random localhost port and keeps its documents in memory. Returns
    /// the server handle and the base [`url::Url`] of the HTTP API.
    #[cfg(test)]
    pub async fn spawn_for_tests() -> Result<(Self, url::Url)> {
        use std::net::{IpAddr, Ipv4Addr};

        let mut config = Config::default();
        config.http.port = 0;
        config.http.bind_addr = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));

        let server = Self::spawn(config, crate::store::in_memory()).await?;
        let http_url = format!("http://{}", server.http_addr()).parse()?;
        Ok((server, http_url))
    }
}
