pub mod connection;
pub mod memory;
pub mod room_stream;
pub mod worker_queue;
