use std::time::Duration;

use axum::{routing::get, Router};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use periscope_relay::{
    activity::ActivityStore,
    auth::TokenVerifier,
    cli::{Cli, Commands},
    config::Config,
    state::Relay,
    ws::{self, AppState},
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    if let Some(Commands::Who { url, token }) = cli.command {
        if let Err(e) = periscope_relay::cli::run_who_client(url, token).await {
            error!("{}", e);
            std::process::exit(1);
        }
        return;
    }

    let config = Config::from_env();
    info!("starting Periscope relay on port {}", config.port);

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus metrics recorder");

    let activity = ActivityStore::connect(config.redis_url.as_deref()).await;
    if activity.is_enabled() {
        info!("activity persistence enabled");
    }

    let state = AppState {
        relay: Relay::new(Duration::from_millis(config.pending_timeout_ms)),
        verifier: TokenVerifier::new(&config.jwt_secret),
        activity,
    };

    let app = Router::new()
        .merge(ws::router(state))
        .route(
            "/metrics",
            get(move || {
                let handle = metrics_handle.clone();
                async move { handle.render() }
            }),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind listen address");

    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
