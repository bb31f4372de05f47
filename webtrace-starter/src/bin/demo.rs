//! A small axum server traced by the starter.
//!
//! Point it at a collector with `OTEL_TRACES_EXPORTER=otlp` or print spans with
//! `OTEL_TRACES_EXPORTER=logging`.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use axum::Router;
use axum::extract::ConnectInfo;
use axum::extract::MatchedPath;
use axum::extract::Path;
use axum::extract::Request;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::get;
use clap::Parser;
use webtrace_starter::Configuration;
use webtrace_starter::http::ConnectionInfo;
use webtrace_starter::http::HttpRouteSource;
use webtrace_starter::http::record_route;

/// Serves a few routes with HTTP server telemetry.
#[derive(Parser, Debug)]
#[command(version)]
struct Opt {
    /// Telemetry configuration file.
    #[arg(short, long = "config", env = "WEBTRACE_CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:3000", env = "WEBTRACE_LISTEN")]
    listen: SocketAddr,

    /// Prints the configuration schema.
    #[arg(long)]
    schema: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    if opt.schema {
        let schema = Configuration::schema();
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let telemetry = match &opt.config_path {
        Some(path) => webtrace_starter::init_from_file(path)?,
        None => webtrace_starter::init(&Configuration::default().with_env_overrides()?)?,
    };

    let listener = tokio::net::TcpListener::bind(opt.listen)
        .await
        .with_context(|| format!("could not listen on {}", opt.listen))?;
    let local_address = listener.local_addr()?;

    let app = Router::new()
        .route("/", get(|| async { "hello" }))
        .route("/users/{id}", get(user))
        .route("/fail", get(fail))
        .route_layer(middleware::from_fn(matched_route))
        .layer(telemetry.http_server_layer())
        .layer(middleware::from_fn_with_state(local_address, connection_info));

    tracing::info!(address = %local_address, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    drop(telemetry);
    Ok(())
}

async fn user(Path(id): Path<u64>) -> String {
    format!("user {id}")
}

async fn fail() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "failed on purpose")
}

async fn matched_route(request: Request, next: Next) -> Response {
    if let Some(path) = request.extensions().get::<MatchedPath>() {
        record_route(&request, HttpRouteSource::Router, path.as_str());
    }
    next.run(request).await
}

async fn connection_info(
    State(server_address): State<SocketAddr>,
    ConnectInfo(peer_address): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    request.extensions_mut().insert(ConnectionInfo {
        peer_address: Some(peer_address),
        server_address: Some(server_address),
        tls: false,
    });
    next.run(request).await
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "could not listen for shutdown signal");
    }
}
