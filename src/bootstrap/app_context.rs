//! Composition root: wires the configured adapters into the services both
//! binaries depend on.

use std::sync::Arc;

use crate::application::ports::auth::AuthCheck;
use crate::application::ports::metrics::{LoggingMetricsSink, MetricsSink};
use crate::application::ports::storage::Storage;
use crate::application::ports::streams::{RoomStream, WorkerQueue};
use crate::application::services::api_client::ApiClient;
use crate::application::services::subscription::{OriginRegistry, SubscriptionTable};
use crate::bootstrap::config::Config;
use crate::infrastructure::auth::{allow_all::AllowAllAuthCheck, jwt::JwtAuthCheck};
use crate::infrastructure::redis::connection::RedisConn;
use crate::infrastructure::redis::room_stream::RedisRoomStream;
use crate::infrastructure::redis::worker_queue::RedisWorkerQueue;
use crate::infrastructure::storage;

/// Capacity of the in-process origin-echo registry: bounds how many
/// unclaimed publish correlations can accumulate before the oldest is
/// evicted (`application::services::subscription::OriginRegistry`).
const ORIGIN_REGISTRY_CAPACITY: usize = 4096;

#[derive(Clone)]
pub struct AppContext {
    pub cfg: Config,
    pub api: Arc<ApiClient>,
    pub storage: Arc<dyn Storage>,
    pub room_stream: Arc<dyn RoomStream>,
    pub worker_queue: Arc<dyn WorkerQueue>,
    pub table: Arc<SubscriptionTable>,
    pub origins: Arc<OriginRegistry>,
    pub auth: Arc<dyn AuthCheck>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl AppContext {
    pub async fn build(cfg: Config) -> anyhow::Result<Self> {
        let redis_conn = RedisConn::connect(&cfg.redis_url, cfg.redis_prefix.clone()).await?;
        let room_stream: Arc<dyn RoomStream> = Arc::new(RedisRoomStream::new(redis_conn.clone()));
        let worker_queue: Arc<dyn WorkerQueue> = Arc::new(RedisWorkerQueue::new(redis_conn));
        worker_queue.ensure_group().await?;

        let storage = storage::build(&cfg).await?;
        let api = Arc::new(ApiClient::new(
            storage.clone(),
            room_stream.clone(),
            worker_queue.clone(),
            cfg.redis_min_message_lifetime,
        ));

        let auth: Arc<dyn AuthCheck> = match &cfg.auth_public_key_pem {
            Some(pem) => Arc::new(JwtAuthCheck::from_public_key_pem(pem.as_bytes())?),
            None => {
                if cfg.is_production {
                    anyhow::bail!("AUTH_PUBLIC_KEY must be set in production");
                }
                tracing::warn!("AUTH_PUBLIC_KEY unset; accepting every connection (dev only)");
                Arc::new(AllowAllAuthCheck)
            }
        };

        Ok(Self {
            cfg,
            api,
            storage,
            room_stream,
            worker_queue,
            table: Arc::new(SubscriptionTable::new()),
            origins: Arc::new(OriginRegistry::new(ORIGIN_REGISTRY_CAPACITY)),
            auth,
            metrics: Arc::new(LoggingMetricsSink),
        })
    }

    pub fn gateway_state(&self) -> crate::gateway::GatewayState {
        crate::gateway::GatewayState {
            api: self.api.clone(),
            table: self.table.clone(),
            origins: self.origins.clone(),
            auth: self.auth.clone(),
            metrics: self.metrics.clone(),
            outbound_buffer_size: self.cfg.outbound_buffer_size,
            ping_interval: self.cfg.ping_interval,
        }
    }
}
