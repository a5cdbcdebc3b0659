//! Cache store, matching and streaming writes

pub mod matcher;
mod store;
mod stream;

pub use store::{CacheStore, StoreStats, spawn_prune_task};
pub use stream::CacheWriteStream;
