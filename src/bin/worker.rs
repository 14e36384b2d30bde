use std::process::ExitCode;

use roomsync::bootstrap::app_context::AppContext;
use roomsync::bootstrap::config::Config;
use roomsync::worker::Compactor;

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

    tracing::info!(?cfg, "worker_starting");

    let ctx = match AppContext::build(cfg.clone()).await {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "redis_unreachable_at_startup");
            return ExitCode::from(2);
        }
    };

    let consumer = format!("worker-{}", uuid::Uuid::new_v4());
    let compactor = std::sync::Arc::new(Compactor::new(
        ctx.api.clone(),
        ctx.storage.clone(),
        ctx.room_stream.clone(),
        ctx.worker_queue.clone(),
        ctx.metrics.clone(),
        consumer,
        cfg.redis_min_message_lifetime,
    ));

    let reclaim_compactor = compactor.clone();
    let reclaim_handle = tokio::spawn(async move {
        reclaim_compactor
            .run_reclaim_loop(cfg.redis_worker_timeout, cfg.redis_worker_timeout)
            .await;
    });

    let block_ms = cfg.worker_block.as_millis() as u64;
    tokio::select! {
        _ = compactor.run_forever(block_ms) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("worker_shutting_down");
        }
    }
    reclaim_handle.abort();

    ExitCode::SUCCESS
}
