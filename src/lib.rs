// Module layout (Clean Architecture style)
// - bootstrap: configuration and startup
// - infrastructure: Redis/storage/auth adapters
// - gateway: WebSocket session handling
// - worker: compaction loop
// - presentation: HTTP handlers and routing
// - application: cross-cutting policies and domain services
// - domain: core models
// - protocol: wire codec
// - crdt: merge/diff boundary over the CRDT engine

pub mod application;
pub mod bootstrap;
pub mod crdt;
pub mod domain;
pub mod gateway;
pub mod infrastructure;
pub mod presentation;
pub mod protocol;
pub mod worker;
