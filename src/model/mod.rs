//! Entity model: jobs, bids, negotiation turns and feeds

mod bid;
mod feed;
mod ids;
mod job;

pub use bid::{Bid, BidPatch, BidStatus, NegotiationTurn, Role, TurnPatch};
pub use feed::{FeedCacheEntry, FeedFilters, FeedKey, FeedKind, FeedMode, FeedPage, FeedQuery};
pub use ids::{BidId, JobId, UserId, TEMP_ID_PREFIX};
pub use job::{BidPlacement, Coordinates, Hydration, Job, JobPatch, JobStatus, Review};
