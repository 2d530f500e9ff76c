//! Change event reconciler
//!
//! Applies normalized [`ChangeEvent`]s to the [`FeedStore`]. Every apply is
//! idempotent: the same event applied twice leaves the cache as applying it
//! once does, so duplicates from the two push channels are harmless.
//!
//! Job placement on INSERT:
//!
//! - already cached: merged into every copy
//! - a temporary job with the same poster, title and budget: adopts the id
//! - otherwise: prepended to `POSTER` when the viewer posted it, and to
//!   `HOME:ALL` while it is open (only feeds that are already cached)

use crate::cache::FeedStore;
use crate::clock::Clock;
use crate::error::Result;
use crate::model::{BidPatch, BidPlacement, BidStatus, FeedKey, JobId, JobPatch, JobStatus};
use crate::sync::event::{ChangeEvent, ChangeOp};
use std::sync::Arc;
use tracing::{debug, warn};

/// What an apply did to the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// Merged into this many cached copies
    Merged(usize),
    /// Placed into this many feeds that did not hold it
    Inserted(usize),
    /// A temporary entity adopted the canonical id
    Substituted { temp_id: String },
    /// Removed from this many cached copies
    Removed(usize),
    /// Nothing cached is affected
    Ignored,
}

pub struct Reconciler {
    store: Arc<FeedStore>,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    pub fn new(store: Arc<FeedStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn apply(&self, event: &ChangeEvent) -> Result<Reconciled> {
        let outcome = match event {
            ChangeEvent::Job { op, payload } => match op {
                ChangeOp::Insert => self.upsert_job(payload, true)?,
                ChangeOp::Update => self.upsert_job(payload, false)?,
                ChangeOp::Delete => self.delete_job(&payload.id),
            },
            ChangeEvent::Bid { op, payload } => match op {
                ChangeOp::Insert | ChangeOp::Update => self.upsert_bid(*op, payload),
                ChangeOp::Delete => self.delete_bid(payload),
            },
        };
        debug!(event = %event, outcome = ?outcome, "Reconciled change event");
        Ok(outcome)
    }

    fn upsert_job(&self, patch: &JobPatch, place: bool) -> Result<Reconciled> {
        let now = self.clock.now();

        if self.store.contains_job(&patch.id) {
            let merged = self.store.patch_all(&patch.id, |job| job.merge(patch, now));
            return Ok(Reconciled::Merged(merged));
        }

        // Partial updates for unseen jobs cannot be materialized
        let incoming = match patch.to_job(now) {
            Ok(job) => job,
            Err(e) if place => return Err(e),
            Err(_) => {
                debug!(job_id = %patch.id, "Update for uncached job ignored");
                return Ok(Reconciled::Ignored);
            }
        };

        if !patch.id.is_temporary() {
            let optimistic = self
                .store
                .find_job(|j| j.id.is_temporary() && j.matches_content(&incoming));
            if let Some(temp) = optimistic {
                self.store.rename_job(&temp.id, &patch.id);
                self.store.patch_all(&patch.id, |job| job.merge(patch, now));
                return Ok(Reconciled::Substituted {
                    temp_id: temp.id.to_string(),
                });
            }
        }

        if !place {
            return Ok(Reconciled::Ignored);
        }

        let mut inserted = 0;
        if self.store.viewer().as_ref() == Some(&incoming.poster_id)
            && self.store.insert_job(FeedKey::POSTER, 0, incoming.clone())
        {
            inserted += 1;
        }
        if incoming.status == JobStatus::Open
            && self.store.insert_job(FeedKey::HOME_ALL, 0, incoming)
        {
            inserted += 1;
        }
        Ok(if inserted > 0 {
            Reconciled::Inserted(inserted)
        } else {
            Reconciled::Ignored
        })
    }

    fn delete_job(&self, job_id: &JobId) -> Reconciled {
        let mut removed = self.store.remove_job(job_id).len();
        if self.store.forget_detail(job_id).is_some() {
            removed += 1;
        }
        Reconciled::Removed(removed)
    }

    fn owning_job(&self, patch: &BidPatch) -> Option<JobId> {
        patch
            .job_id
            .clone()
            .filter(|id| !id.as_str().is_empty())
            .or_else(|| self.store.find_bid_owner(&patch.id))
    }

    /// Only an INSERT adds to a partial job's summary count; an UPDATE names
    /// a bid the count already includes.
    fn upsert_bid(&self, op: ChangeOp, patch: &BidPatch) -> Reconciled {
        let Some(job_id) = self.owning_job(patch) else {
            debug!(bid_id = %patch.id, "Bid event for unknown job ignored");
            return Reconciled::Ignored;
        };
        let now = self.clock.now();

        let mut merged = 0;
        let mut substituted: Option<String> = None;
        self.store.patch_all(&job_id, |job| {
            let placement = match job.find_bid_mut(&patch.id) {
                Some(existing) => {
                    existing.merge(patch);
                    BidPlacement::Merged
                }
                None => {
                    let mut patch = patch.clone();
                    patch.job_id = Some(job.id.clone());
                    match patch.to_bid(&job.poster_id, now) {
                        Ok(bid) if op == ChangeOp::Insert => job.place_bid(bid),
                        Ok(bid) => job.place_known_bid(bid),
                        Err(e) => {
                            warn!(job_id = %job.id, bid_id = %patch.id, error = %e, "Unusable bid payload");
                            return;
                        }
                    }
                }
            };
            if let BidPlacement::Substituted { temp_id } = placement {
                substituted = Some(temp_id.to_string());
            }

            // The backend cascades an acceptance; mirror it on whatever bids are held
            let accepted = job
                .find_bid(&patch.id)
                .map(|b| b.status == BidStatus::Accepted)
                .unwrap_or(false);
            if accepted {
                if job.status != JobStatus::Open && job.status != JobStatus::InProgress {
                    warn!(job_id = %job.id, status = ?job.status, "Bid accepted on a closed job");
                }
                job.apply_acceptance(&patch.id);
            }
            merged += 1;
        });

        match substituted {
            Some(temp_id) => Reconciled::Substituted { temp_id },
            None if merged > 0 => Reconciled::Merged(merged),
            None => Reconciled::Ignored,
        }
    }

    fn delete_bid(&self, patch: &BidPatch) -> Reconciled {
        let Some(job_id) = self.owning_job(patch) else {
            return Reconciled::Ignored;
        };
        let mut removed = 0;
        self.store.patch_all(&job_id, |job| {
            if job.remove_bid(&patch.id).is_some() {
                removed += 1;
            }
        });
        Reconciled::Removed(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{Bid, Job};
    use chrono::Utc;

    fn job(id: &str) -> Job {
        JobPatch {
            id: id.into(),
            poster_id: Some("poster".into()),
            title: Some("Paint shed".into()),
            budget: Some(300),
            ..Default::default()
        }
        .to_job(Utc::now())
        .unwrap()
    }

    fn setup() -> (Arc<FeedStore>, Reconciler) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(10_000));
        let store = Arc::new(FeedStore::new(clock.clone()));
        (store.clone(), Reconciler::new(store, clock))
    }

    #[test]
    fn test_job_insert_goes_to_posters_own_feed() {
        let (store, reconciler) = setup();
        store.set_viewer(Some("poster".into()));
        store.write(FeedKey::POSTER, vec![], false, 0);
        store.write(FeedKey::HOME_ALL, vec![], false, 0);

        let event = ChangeEvent::job(ChangeOp::Insert, JobPatch::from(&job("j1")));
        assert_eq!(reconciler.apply(&event).unwrap(), Reconciled::Inserted(2));
        assert_eq!(reconciler.apply(&event).unwrap(), Reconciled::Merged(2));
    }

    #[test]
    fn test_update_for_uncached_job_is_ignored() {
        let (_store, reconciler) = setup();
        let event = ChangeEvent::job(
            ChangeOp::Update,
            JobPatch {
                id: "j404".into(),
                status: Some(JobStatus::Cancelled),
                ..Default::default()
            },
        );
        assert_eq!(reconciler.apply(&event).unwrap(), Reconciled::Ignored);
    }

    #[test]
    fn test_bid_delete_without_job_id_finds_owner() {
        let (store, reconciler) = setup();
        let mut j = job("j1");
        j.place_bid(Bid::new("b1".into(), "j1".into(), "poster".into(), "w1".into(), 250, "", Utc::now()));
        store.write(FeedKey::HOME_ALL, vec![j], false, 1);

        let event = ChangeEvent::bid(
            ChangeOp::Delete,
            BidPatch {
                id: "b1".into(),
                ..Default::default()
            },
        );
        assert_eq!(reconciler.apply(&event).unwrap(), Reconciled::Removed(1));
        assert!(store.read(FeedKey::HOME_ALL).unwrap().jobs[0].bids.is_empty());
    }
}
