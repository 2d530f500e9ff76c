//! User intents accepted by the mutation pipeline

use crate::model::{BidId, Coordinates, JobId, JobStatus, UserId};
use serde::{Deserialize, Serialize};

/// Fields of a job the poster fills in
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub poster_id: UserId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    pub budget: u64,
}

/// Editable job fields; `None` leaves a field as it is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub budget: Option<u64>,
    pub status: Option<JobStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MutationIntent {
    CreateJob(NewJob),
    UpdateJob {
        job_id: JobId,
        changes: JobChanges,
    },
    PlaceBid {
        job_id: JobId,
        worker_id: UserId,
        amount: u64,
        #[serde(default)]
        message: String,
    },
    /// Append a counter-offer to the ledger
    Counter {
        job_id: JobId,
        bid_id: BidId,
        actor: UserId,
        amount: u64,
    },
    AcceptBid {
        job_id: JobId,
        bid_id: BidId,
        actor: UserId,
    },
    /// Reject by the poster, withdraw by the worker
    RejectBid {
        job_id: JobId,
        bid_id: BidId,
        actor: UserId,
    },
    HideJob {
        viewer_id: UserId,
        job_id: JobId,
    },
    ArchiveChat {
        job_id: JobId,
    },
}

impl MutationIntent {
    pub fn name(&self) -> &'static str {
        match self {
            MutationIntent::CreateJob(_) => "create_job",
            MutationIntent::UpdateJob { .. } => "update_job",
            MutationIntent::PlaceBid { .. } => "place_bid",
            MutationIntent::Counter { .. } => "counter",
            MutationIntent::AcceptBid { .. } => "accept_bid",
            MutationIntent::RejectBid { .. } => "reject_bid",
            MutationIntent::HideJob { .. } => "hide_job",
            MutationIntent::ArchiveChat { .. } => "archive_chat",
        }
    }
}
