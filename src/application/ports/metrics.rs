//! Metrics sink (`spec.md` §9): a small injected interface every layer
//! pushes counters through, breaking the gateway -> subscription -> API
//! client -> storage -> metrics cycle the source's event-emitter style
//! would otherwise create.

#[derive(Debug, Clone, Copy)]
pub enum MetricEvent {
    SessionOpened,
    SessionClosed { code: u16 },
    UpdatePublished,
    UpdateDelivered,
    WorkerTaskClaimed,
    WorkerCompactionCompleted,
    WorkerCompactionFailed,
}

pub trait MetricsSink: Send + Sync {
    fn record(&self, event: MetricEvent);
}

/// Default sink: counters surface through `tracing` rather than a
/// dedicated metrics feature (out of scope per `spec.md`'s Non-goals, but
/// the ambient logging stack is carried regardless).
pub struct LoggingMetricsSink;

impl MetricsSink for LoggingMetricsSink {
    fn record(&self, event: MetricEvent) {
        tracing::debug!(?event, "metric");
    }
}
