//! Market-data ingestion: one duplex connection per shard (`connection`),
//! multiplexed into a pool with consistent-hash subscription sharding
//! (`pool`).

pub mod connection;
pub mod pool;

pub use connection::{StreamConnection, StreamConnectionConfig, SubscribeError};
pub use pool::StreamPool;
