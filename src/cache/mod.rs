//! Session-owned caches
//!
//! - [`FeedStore`]: per-feed job lists with fan-out patching
//! - [`DetailCache`]: time-boxed, coalesced full-detail fetches

mod detail;
mod feed_store;

pub use detail::{DetailCache, DetailCacheConfig};
pub use feed_store::{FeedPosition, FeedStore};
