use std::sync::Arc;
use std::time::Duration;

use crate::application::ports::auth::AuthCheck;
use crate::application::ports::metrics::MetricsSink;
use crate::application::services::api_client::ApiClient;
use crate::application::services::subscription::{OriginRegistry, SubscriptionTable};

/// Everything an incoming WebSocket session needs; cloned (cheaply, via
/// `Arc`s) into each connection's task.
#[derive(Clone)]
pub struct GatewayState {
    pub api: Arc<ApiClient>,
    pub table: Arc<SubscriptionTable>,
    pub origins: Arc<OriginRegistry>,
    pub auth: Arc<dyn AuthCheck>,
    pub metrics: Arc<dyn MetricsSink>,
    pub outbound_buffer_size: usize,
    pub ping_interval: Duration,
}
