//! Progress/Stats Aggregator
//!
//! Snapshots are derived from target statuses and the execution log on
//! demand; nothing on the engine's hot path is locked to compute them.

mod aggregator;
mod hub;

pub use aggregator::{StatsAggregator, StatsSnapshot};
pub use hub::StatsHub;
