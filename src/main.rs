//! Gatekeeper HTTP entrypoint.
//!
//! Boots in a fixed order: `.env`, tracing, configuration (a validation
//! failure exits non-zero before anything listens), application state,
//! background sweepers, then the axum server with signal-driven graceful
//! shutdown.

use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use tower_http::cors;

use gatekeeper::config::Config;
use gatekeeper::handlers;
use gatekeeper::shutdown::Shutdown;
use gatekeeper::state::AppState;
use gatekeeper::telemetry::Telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::from_env().inspect_err(|e| {
        tracing::error!(error = %e, "configuration is invalid");
    })?;
    let addr = SocketAddr::new(config.host, config.port);

    let state = AppState::try_new(config).await?;

    let shutdown = Shutdown::try_new()?;
    state.spawn_sweepers(shutdown.token());

    let router = handlers::routes(state)
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_headers(cors::Any),
        );

    tracing::info!("starting gatekeeper at http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let token = shutdown.token();
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { token.cancelled().await })
    .await?;

    tracing::info!("gatekeeper stopped");
    Ok(())
}
