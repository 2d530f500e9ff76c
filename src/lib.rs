//! marketplace-sync - feed cache and negotiation engine for a jobs marketplace
//!
//! Keeps a set of cached job feeds consistent while the viewer performs
//! optimistic writes and the backend pushes change notifications over two
//! independent, possibly duplicating channels.
//!
//! # Architecture
//!
//! - **Feed store**: per-feed job lists, every copy of a job patched together
//! - **Sequencer**: latest request wins per feed, identical fetches debounced
//! - **Reconciler**: idempotent merge of push events, temporary id adoption
//! - **Mutation pipeline**: optimistic effect, remote write, confirm or roll back
//! - **Negotiation**: who may act on a bid and what they may do
//! - **Detail cache**: time-boxed, coalesced full job fetches
//!
//! # Example
//!
//! ```rust,ignore
//! use marketplace_sync::{FeedFilters, FeedKey, RestBackend, SyncConfig, SyncEngine};
//!
//! let backend = Arc::new(RestBackend::new(&config.backend)?);
//! let engine = SyncEngine::with_system_clock(SyncConfig::default(), backend);
//! engine.switch_viewer("worker-1".into());
//!
//! engine.refresh_feed(FeedKey::HOME_ALL, FeedFilters::new()).await?;
//! let feed = engine.use_feed(FeedKey::HOME_ALL);
//! ```

// Entity model
pub mod model;

// Turn derivation and action validation
pub mod negotiation;

// Feed store and detail cache
pub mod cache;

// Sequencing, normalization and reconciliation of push events
pub mod sync;

// Optimistic mutations
pub mod mutation;

// Backend contract and HTTP implementation
pub mod client;

// Presentation-facing facade
pub mod engine;

// Configuration
pub mod config;

// Time source
pub mod clock;

// Error types
pub mod error;

// Re-export model types
pub use model::{
    Bid, BidId, BidPatch, BidStatus, FeedCacheEntry, FeedFilters, FeedKey, FeedKind, FeedMode,
    FeedPage, FeedQuery, Hydration, Job, JobId, JobPatch, JobStatus, NegotiationTurn, Role, UserId,
};

// Re-export engine types
pub use engine::{FetchStatus, SyncEngine};
pub use mutation::{MutationIntent, MutationReceipt};
pub use negotiation::{derive_turn, NegotiationAction, Turn, TurnActor};
pub use sync::{ChangeEvent, ChangeOp, Reconciled};

// Re-export client types
pub use client::Backend;
#[cfg(feature = "client")]
pub use client::RestBackend;

// Re-export config types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackendConfig, Config, SyncConfig};

// Re-export error types
pub use error::{ErrorCategory, Result, SyncError};
