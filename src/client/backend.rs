//! Backend collaborator contract
//!
//! The backend is authoritative; this crate only caches what it returns.
//! Compound transactions (accept, reject, hide, archive) are single opaque
//! procedure calls whose atomicity lives server-side.

use crate::error::Result;
use crate::model::{Bid, BidId, FeedPage, FeedQuery, Job, JobId, UserId};
use async_trait::async_trait;

/// Named server-side procedures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Procedure {
    /// Sets the accepted bid, moves the job in progress, rejects siblings
    AcceptBid,
    RejectBid,
    HideJobForViewer,
    ArchiveChat,
}

impl Procedure {
    pub fn name(&self) -> &'static str {
        match self {
            Procedure::AcceptBid => "accept_bid",
            Procedure::RejectBid => "reject_bid",
            Procedure::HideJobForViewer => "hide_job_for_viewer",
            Procedure::ArchiveChat => "archive_chat",
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// One feed page; jobs may come back without bids
    async fn fetch_feed(&self, query: &FeedQuery) -> Result<FeedPage>;

    /// Fully hydrated job including bids and reviews
    async fn fetch_job_detail(&self, job_id: &JobId) -> Result<Job>;

    /// Returns the canonical id
    async fn create_job(&self, job: &Job) -> Result<JobId>;

    async fn update_job(&self, job: &Job) -> Result<()>;

    /// Returns the canonical id
    async fn create_bid(&self, bid: &Bid) -> Result<BidId>;

    async fn update_bid(&self, bid: &Bid) -> Result<()>;

    async fn accept_bid(&self, job_id: &JobId, bid_id: &BidId) -> Result<()>;

    async fn reject_bid(&self, job_id: &JobId, bid_id: &BidId) -> Result<()>;

    async fn hide_job(&self, viewer_id: &UserId, job_id: &JobId) -> Result<()>;

    async fn archive_chat(&self, job_id: &JobId) -> Result<()>;
}
