//! Account Pool and Quota Guard

mod pool;
mod quota;

pub use pool::{AccountPool, PoolError};
pub use quota::QuotaGuard;
