//! WebSocket infrastructure for job progress streams.
//!
//! Provides connection tracking, heartbeat pings, and the per-job stream
//! served after the HTTP upgrade.

mod heartbeat;
pub mod job_stream;
pub mod manager;

pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
