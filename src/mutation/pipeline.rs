//! Optimistic mutation executor
//!
//! apply optimistic effect → await remote → confirm or roll back
//!
//! Effects are applied synchronously before the first suspension point, so
//! readers see the change immediately. A change event for the same logical
//! mutation may be reconciled while the remote call is outstanding; the
//! temporary id is then already gone and confirmation finds nothing to do.
//! Rollback only reverts what still shows the optimistic value, so a push
//! that landed in the meantime is kept.

use crate::cache::FeedStore;
use crate::client::Backend;
use crate::clock::Clock;
use crate::error::Result;
use crate::model::{Bid, BidId, BidStatus, Job, JobId, JobStatus, TEMP_ID_PREFIX};
use crate::mutation::intent::MutationIntent;
use crate::mutation::plan::{prepare, CacheEffect, Confirmation, MutationPlan, RemoteCall};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a successful mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationReceipt {
    /// A new entity was confirmed under `id`
    Created { temp_id: String, id: String },
    Applied,
}

pub struct MutationPipeline {
    store: Arc<FeedStore>,
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
    last_temp: AtomicU64,
}

impl MutationPipeline {
    pub fn new(store: Arc<FeedStore>, backend: Arc<dyn Backend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            backend,
            clock,
            last_temp: AtomicU64::new(0),
        }
    }

    /// `temp_` plus the local clock, bumped so consecutive ids never collide
    fn next_temp_id(&self) -> String {
        let now = self.clock.now_millis();
        let previous = self
            .last_temp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        format!("{}{}", TEMP_ID_PREFIX, now.max(previous + 1))
    }

    pub async fn mutate(&self, intent: MutationIntent) -> Result<MutationReceipt> {
        let temp_id = self.next_temp_id();
        let plan = prepare(&intent, &self.store, self.clock.now(), &temp_id)?;

        for effect in &plan.effects {
            self.apply(effect);
        }
        debug!(intent = intent.name(), effects = plan.effects.len(), "Optimistic effect applied");

        match self.call(&plan.remote).await {
            Ok(canonical) => Ok(self.confirm(&plan, canonical)),
            Err(e) => {
                warn!(intent = intent.name(), error = %e, "Remote write failed, rolling back");
                for effect in &plan.undo {
                    self.apply(effect);
                }
                Err(e)
            }
        }
    }

    async fn call(&self, remote: &RemoteCall) -> Result<Option<String>> {
        match remote {
            RemoteCall::CreateJob(job) => self
                .backend
                .create_job(job)
                .await
                .map(|id| Some(id.to_string())),
            RemoteCall::UpdateJob(job) => self.backend.update_job(job).await.map(|_| None),
            RemoteCall::CreateBid(bid) => self
                .backend
                .create_bid(bid)
                .await
                .map(|id| Some(id.to_string())),
            RemoteCall::UpdateBid(bid) => self.backend.update_bid(bid).await.map(|_| None),
            RemoteCall::AcceptBid { job_id, bid_id } => {
                self.backend.accept_bid(job_id, bid_id).await.map(|_| None)
            }
            RemoteCall::RejectBid { job_id, bid_id } => {
                self.backend.reject_bid(job_id, bid_id).await.map(|_| None)
            }
            RemoteCall::HideJob { viewer_id, job_id } => {
                self.backend.hide_job(viewer_id, job_id).await.map(|_| None)
            }
            RemoteCall::ArchiveChat { job_id } => {
                self.backend.archive_chat(job_id).await.map(|_| None)
            }
        }
    }

    fn confirm(&self, plan: &MutationPlan, canonical: Option<String>) -> MutationReceipt {
        let (confirmation, Some(id)) = (&plan.confirm, canonical) else {
            return MutationReceipt::Applied;
        };
        match confirmation {
            Confirmation::Acknowledge => MutationReceipt::Applied,
            Confirmation::JobId { temp_id } => {
                let touched = self.store.rename_job(temp_id, &JobId::new(id.clone()));
                if touched == 0 {
                    debug!(temp_id = %temp_id, job_id = %id, "Job already reconciled from push");
                }
                info!(job_id = %id, "Job created");
                MutationReceipt::Created {
                    temp_id: temp_id.to_string(),
                    id,
                }
            }
            Confirmation::BidId { job_id, temp_id } => {
                let still_pending = self
                    .store
                    .find_job(|j| &j.id == job_id && j.find_bid(temp_id).is_some())
                    .is_some();
                if still_pending {
                    self.store.rename_bid(job_id, temp_id, &BidId::new(id.clone()));
                } else {
                    debug!(temp_id = %temp_id, bid_id = %id, "Bid already reconciled from push");
                }
                info!(job_id = %job_id, bid_id = %id, "Bid placed");
                MutationReceipt::Created {
                    temp_id: temp_id.to_string(),
                    id,
                }
            }
        }
    }

    /// Execute one cache effect against the store
    pub fn apply(&self, effect: &CacheEffect) {
        match effect {
            CacheEffect::InsertJob { feeds, job } => {
                for key in feeds {
                    self.store.insert_job(*key, 0, job.clone());
                }
            }
            CacheEffect::RemoveJob { job_id, feeds: None } => {
                self.store.remove_job(job_id);
                self.store.forget_detail(job_id);
            }
            CacheEffect::RemoveJob {
                job_id,
                feeds: Some(feeds),
            } => {
                self.store.remove_job_where(job_id, |key| feeds.contains(&key));
            }
            CacheEffect::RestoreJob { positions, job } => {
                self.store.restore_job(positions, job);
            }
            CacheEffect::SetFields { job_id, fields } => {
                self.store.patch_all(job_id, |job| fields.write_to(job));
            }
            CacheEffect::RevertFields {
                job_id,
                expected,
                prior,
            } => {
                self.store.patch_all(job_id, |job| prior.revert_on(job, expected));
            }
            CacheEffect::PutBid { job_id, bid } => {
                self.store.patch_all(job_id, |job| match job.find_bid_mut(&bid.id) {
                    Some(existing) => *existing = bid.clone(),
                    None => {
                        job.place_bid(bid.clone());
                    }
                });
            }
            CacheEffect::RevertBid {
                job_id,
                expected,
                prior,
            } => {
                self.store.patch_all(job_id, |job| {
                    if let Some(current) = job.find_bid_mut(&prior.id) {
                        current.revert_to(prior, expected);
                    }
                });
            }
            CacheEffect::RemoveBid { job_id, bid_id } => {
                self.store.patch_all(job_id, |job| {
                    job.remove_bid(bid_id);
                });
            }
            CacheEffect::AcceptBid { job_id, bid_id } => {
                self.store.patch_all(job_id, |job| job.apply_acceptance(bid_id));
            }
            CacheEffect::RestoreBids {
                job_id,
                accepted,
                status,
                accepted_bid_id,
                bids,
            } => {
                self.store.patch_all(job_id, |job| {
                    undo_acceptance(job, accepted, *status, accepted_bid_id, bids)
                });
            }
        }
    }
}

/// Reverse `apply_acceptance(accepted)` on a copy that still shows it.
///
/// A copy whose accepted bid a push has since changed is left alone; so is
/// any bid whose status no longer matches what the cascade set.
fn undo_acceptance(
    job: &mut Job,
    accepted: &BidId,
    status: JobStatus,
    accepted_bid_id: &Option<BidId>,
    bids: &[Bid],
) {
    if job.accepted_bid_id.as_ref() != Some(accepted) {
        return;
    }
    let cascaded_status = if status == JobStatus::Open {
        JobStatus::InProgress
    } else {
        status
    };
    if job.status == cascaded_status {
        job.status = status;
    }
    job.accepted_bid_id = accepted_bid_id.clone();

    for prior in bids {
        let cascaded = if &prior.id == accepted {
            BidStatus::Accepted
        } else if matches!(prior.status, BidStatus::Pending | BidStatus::Accepted) {
            BidStatus::Rejected
        } else {
            prior.status
        };
        if let Some(current) = job.find_bid_mut(&prior.id) {
            if current.status == cascaded {
                current.status = prior.status;
            }
        }
    }
}
