//! HTTP server part of docbase-server

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::Result;
use axum::{
    extract::ConnectInfo,
    http::Method,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, task::JoinSet};
use tower_http::{
    cors::{self, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, span, warn, Level};

mod archives;
mod documents;
mod error;
mod json;

use crate::state::AppState;

/// Config for the HTTP server
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpConfig {
    /// Port to bind to
    pub port: u16,
    /// Optionally set a custom bind address (will use 0.0.0.0 if unset)
    pub bind_addr: Option<IpAddr>,
}

impl HttpConfig {
    /// The socket address to listen on.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(
            self.bind_addr.unwrap_or(Ipv4Addr::UNSPECIFIED.into()),
            self.port,
        )
    }
}

/// The HTTP server part of docbase-server
#[derive(Debug)]
pub struct HttpServer {
    tasks: JoinSet<std::io::Result<()>>,
    http_addr: SocketAddr,
}

impl HttpServer {
    /// Spawn the server
    pub async fn spawn(config: HttpConfig, state: AppState) -> Result<HttpServer> {
        let app = create_app(state);

        let mut tasks = JoinSet::new();

        let bind_addr = config.socket_addr();
        let listener = TcpListener::bind(bind_addr).await?.into_std()?;
        let http_addr = listener.local_addr()?;
        let fut = axum_server::from_tcp(listener)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>());
        info!("HTTP server listening on {http_addr}");
        tasks.spawn(fut);

        Ok(HttpServer { tasks, http_addr })
    }

    /// Get the bound address of the HTTP socket.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Shutdown the server and wait for all tasks to complete.
    pub async fn shutdown(mut self) -> Result<()> {
        // TODO: Graceful shutdown through axum_server::Handle so in-flight writes can finish.
        self.tasks.abort_all();
        self.run_until_done().await?;
        Ok(())
    }

    /// Wait for all tasks to complete.
    ///
    /// Runs forever unless tasks fail.
    pub async fn run_until_done(mut self) -> Result<()> {
        let mut final_res: anyhow::Result<()> = Ok(());
        while let Some(res) = self.tasks.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Err(err) if err.is_cancelled() => {}
                Ok(Err(err)) => {
                    warn!(?err, "task failed");
                    final_res = Err(anyhow::Error::from(err));
                }
                Err(err) => {
                    warn!(?err, "task panicked");
                    final_res = Err(err.into());
                }
            }
        }
        final_res
    }
}

pub(crate) fn create_app(state: AppState) -> Router {
    // configure cors middleware
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        // allow requests from any origin
        .allow_origin(cors::Any);

    // configure tracing middleware
    let trace = TraceLayer::new_for_http().make_span_with(|request: &http::Request<_>| {
        let src = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|conn_info| conn_info.0.to_string())
            .unwrap_or_default();
        span!(
            Level::DEBUG,
            "http_request",
            method = ?request.method(),
            uri = ?request.uri(),
            %src,
        )
    });

    // configure routes
    let router = Router::new()
        .route(
            "/api/v1/{collection}/{id}/{key}/revisions",
            get(documents::revisions),
        )
        .route(
            "/api/v1/{collection}/{id}/{key}",
            get(documents::get)
                .post(documents::put)
                .put(documents::put)
                .delete(documents::delete),
        )
        .route(
            "/api/v1/{collection}/{id}",
            get(archives::documents)
                .post(archives::create)
                .delete(archives::delete),
        )
        .route("/api/v1/{collection}", get(archives::list))
        .route("/healthcheck", get(|| async { "OK" }))
        .route(
            "/",
            get(|| async { concat!("docbase-server v", env!("CARGO_PKG_VERSION")) }),
        )
        .with_state(state);

    // configure app
    router.layer(cors).layer(trace)
}
