use std::env;
use std::fmt;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub redis_prefix: String,
    pub storage_driver: String,
    pub log_level: String,
    pub auth_public_key_pem: Option<String>,

    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    pub s3_use_path_style: bool,

    /// Δ in invariant 1/2/3 (`spec.md` §8): how long a freshly-enqueued
    /// compaction task waits before a worker may act on it, so a burst of
    /// updates coalesces into a single compaction.
    pub redis_min_message_lifetime: Duration,
    /// `XAUTOCLAIM` idle threshold; must exceed `redis_min_message_lifetime`
    /// plus twice the expected storage round-trip, or a live worker's task
    /// gets stolen out from under it.
    pub redis_worker_timeout: Duration,

    pub outbound_buffer_size: usize,
    pub ping_interval: Duration,
    pub read_block: Duration,
    pub worker_block: Duration,

    pub is_production: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080);
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let redis_prefix = env::var("REDIS_PREFIX").unwrap_or_else(|_| "y".into());
        let storage_driver = env::var("STORAGE").unwrap_or_else(|_| "memory".into());
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
        let auth_public_key_pem = env::var("AUTH_PUBLIC_KEY").ok();

        let s3_bucket = env::var("S3_BUCKET").ok();
        let s3_region = env::var("S3_REGION").ok();
        let s3_endpoint = env::var("S3_ENDPOINT").ok();
        let s3_access_key = env::var("S3_ACCESS_KEY").ok();
        let s3_secret_key = env::var("S3_SECRET_KEY").ok();
        let s3_use_path_style = env::var("S3_USE_PATH_STYLE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(false);

        let redis_min_message_lifetime = Duration::from_millis(
            env::var("REDIS_MIN_MESSAGE_LIFETIME_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3_000),
        );
        let redis_worker_timeout = Duration::from_millis(
            env::var("REDIS_WORKER_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(15_000),
        );
        let outbound_buffer_size = env::var("OUTBOUND_BUFFER_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256);
        let ping_interval = Duration::from_secs(
            env::var("PING_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        );
        let read_block = Duration::from_millis(
            env::var("READ_BLOCK_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1_000),
        );
        let worker_block = Duration::from_millis(
            env::var("WORKER_BLOCK_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2_000),
        );

        let is_production = matches!(
            env::var("RUST_ENV").ok().as_deref(),
            Some("production") | Some("prod")
        );

        if is_production {
            if auth_public_key_pem.is_none() {
                anyhow::bail!("AUTH_PUBLIC_KEY must be set in production");
            }
            if storage_driver == "memory" {
                anyhow::bail!("STORAGE=memory is a test-only driver, not valid in production");
            }
            if redis_worker_timeout <= redis_min_message_lifetime {
                anyhow::bail!(
                    "REDIS_WORKER_TIMEOUT_MS must exceed REDIS_MIN_MESSAGE_LIFETIME_MS, or a live worker's claim can be stolen"
                );
            }
        }

        Ok(Self {
            port,
            redis_url,
            redis_prefix,
            storage_driver,
            log_level,
            auth_public_key_pem,
            s3_bucket,
            s3_region,
            s3_endpoint,
            s3_access_key,
            s3_secret_key,
            s3_use_path_style,
            redis_min_message_lifetime,
            redis_worker_timeout,
            outbound_buffer_size,
            ping_interval,
            read_block,
            worker_block,
            is_production,
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("redis_url", &self.redis_url)
            .field("redis_prefix", &self.redis_prefix)
            .field("storage_driver", &self.storage_driver)
            .field("log_level", &self.log_level)
            .field("auth_public_key_pem", &self.auth_public_key_pem.is_some())
            .field("s3_bucket", &self.s3_bucket)
            .field("s3_region", &self.s3_region)
            .field("s3_endpoint", &self.s3_endpoint)
            .field("s3_access_key", &self.s3_access_key.is_some())
            .field("s3_secret_key", &self.s3_secret_key.is_some())
            .field("s3_use_path_style", &self.s3_use_path_style)
            .field("redis_min_message_lifetime", &self.redis_min_message_lifetime)
            .field("redis_worker_timeout", &self.redis_worker_timeout)
            .field("outbound_buffer_size", &self.outbound_buffer_size)
            .field("ping_interval", &self.ping_interval)
            .field("read_block", &self.read_block)
            .field("worker_block", &self.worker_block)
            .field("is_production", &self.is_production)
            .finish()
    }
}
