use std::process::ExitCode;

use roomsync::bootstrap::app_context::AppContext;
use roomsync::bootstrap::config::Config;
use roomsync::{gateway, presentation::http::health};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(cfg.log_level.clone()))
        .init();

    tracing::info!(?cfg, "server_starting");

    let ctx = match AppContext::build(cfg.clone()).await {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "redis_unreachable_at_startup");
            return ExitCode::from(2);
        }
    };

    let fanout_table = ctx.table.clone();
    let fanout_stream = ctx.room_stream.clone();
    let fanout_origins = ctx.origins.clone();
    let fanout_metrics = ctx.metrics.clone();
    let read_block_ms = cfg.read_block.as_millis() as u64;
    tokio::spawn(async move {
        roomsync::application::services::subscription::run_fanout_loop(
            fanout_table,
            fanout_stream,
            fanout_origins,
            fanout_metrics,
            read_block_ms,
        )
        .await;
    });

    let app = axum::Router::new()
        .merge(health::routes(ctx.clone()))
        .merge(gateway::routes(ctx.gateway_state()));

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", cfg.port)).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, "bind_failed");
            return ExitCode::from(1);
        }
    };

    tracing::info!(port = cfg.port, "server_listening");
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("server_shutting_down");
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "server_error");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
