use std::net::{Ipv6Addr, SocketAddr};

use axum::{routing::get, Router as AxumRouter};
use log::info;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub mod config;
pub mod context;
mod gateway;
mod http;
pub mod logging;

use context::ServerContext;

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 8080;

type Router = AxumRouter<ServerContext>;

/// Starts the watchparty server.
pub async fn run_server(context: ServerContext, port: u16) {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/watch-party", get(gateway::watch_party_handler))
        .route("/chat", get(gateway::chat_handler))
        .route("/health", get(http::health))
        .route("/public-rooms", get(http::public_rooms))
        .with_state(context.clone())
        .layer(cors);

    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();
    let listener = TcpListener::bind(&addr).await.expect("listens on address");

    info!("Listening on port {port}");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(context))
        .await
        .expect("server runs");
}

/// Resolves on ctrl-c; live sessions are closed with a normal status
/// before the accept loop stops.
async fn shutdown_signal(context: ServerContext) {
    let _ = tokio::signal::ctrl_c().await;

    info!("Shutdown requested, closing live sessions...");
    context.collab.shutdown();
}
