//! Per-job progress fan-out.
//!
//! - [`ProgressBroadcaster`]: one bounded `tokio::sync::broadcast` channel per
//!   job plus the folded progress snapshot new subscribers catch up from.
//! - [`Subscription`]: a single observer's ordered view of one job.

pub mod broadcaster;

pub use broadcaster::{ProgressBroadcaster, Subscription};
