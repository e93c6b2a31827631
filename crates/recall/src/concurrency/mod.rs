//! Concurrency guards
//!
//! Per-conversation locks with stale-holder recovery, and the bounded LRU
//! cache used for record batches and fact mirrors.

pub mod cache;
pub mod locks;

pub use cache::BoundedCache;
pub use locks::{ConversationLock, LockGuard, LockHolder, LockManager, SweepReport};
