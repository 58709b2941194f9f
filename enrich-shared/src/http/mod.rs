//! HTTP client substrate: bounded connection pooling.

pub mod pool;

pub use pool::{ConnectionPool, PoolHandle, PoolLimits};
