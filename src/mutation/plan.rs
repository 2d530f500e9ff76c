//! Mutation planning
//!
//! [`prepare`] turns an intent into a [`MutationPlan`]: the optimistic cache
//! effects, their inverse, the remote call, and how a successful
//! response is confirmed. Planning only reads the cache; the pipeline
//! executes the plan.

use crate::cache::{FeedPosition, FeedStore};
use crate::error::{Result, SyncError};
use crate::model::{
    Bid, BidId, BidStatus, Coordinates, FeedKey, Hydration, Job, JobId, JobStatus, Role, UserId,
};
use crate::mutation::intent::{JobChanges, MutationIntent, NewJob};
use crate::negotiation::{validate_action, validate_counter, NegotiationAction};
use chrono::{DateTime, Utc};

/// Scalar job fields, restored as a unit
#[derive(Debug, Clone, PartialEq)]
pub struct JobFields {
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: String,
    pub coordinates: Option<Coordinates>,
    pub budget: u64,
    pub status: JobStatus,
}

impl JobFields {
    fn with_changes(&self, changes: &JobChanges) -> Self {
        Self {
            title: changes.title.clone().unwrap_or_else(|| self.title.clone()),
            description: changes
                .description
                .clone()
                .unwrap_or_else(|| self.description.clone()),
            category: changes.category.clone().unwrap_or_else(|| self.category.clone()),
            location: changes.location.clone().unwrap_or_else(|| self.location.clone()),
            coordinates: changes.coordinates.or(self.coordinates),
            budget: changes.budget.unwrap_or(self.budget),
            status: changes.status.unwrap_or(self.status),
        }
    }

    /// Put `self` back on `job`, field by field, where `job` still holds `expected`
    pub fn revert_on(&self, job: &mut Job, expected: &JobFields) {
        fn revert<T: PartialEq + Clone>(current: &mut T, expected: &T, prior: &T) {
            if current == expected {
                *current = prior.clone();
            }
        }
        revert(&mut job.title, &expected.title, &self.title);
        revert(&mut job.description, &expected.description, &self.description);
        revert(&mut job.category, &expected.category, &self.category);
        revert(&mut job.location, &expected.location, &self.location);
        revert(&mut job.coordinates, &expected.coordinates, &self.coordinates);
        revert(&mut job.budget, &expected.budget, &self.budget);
        revert(&mut job.status, &expected.status, &self.status);
    }

    pub fn write_to(&self, job: &mut Job) {
        job.title = self.title.clone();
        job.description = self.description.clone();
        job.category = self.category.clone();
        job.location = self.location.clone();
        job.coordinates = self.coordinates;
        job.budget = self.budget;
        job.status = self.status;
    }
}

impl From<&Job> for JobFields {
    fn from(job: &Job) -> Self {
        Self {
            title: job.title.clone(),
            description: job.description.clone(),
            category: job.category.clone(),
            location: job.location.clone(),
            coordinates: job.coordinates,
            budget: job.budget,
            status: job.status,
        }
    }
}

/// One synchronous change to the cache
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEffect {
    /// Prepend to each listed feed that is cached
    InsertJob { feeds: Vec<FeedKey>, job: Job },
    /// Remove from the listed feeds, or from everywhere when `None`
    RemoveJob {
        job_id: JobId,
        feeds: Option<Vec<FeedKey>>,
    },
    /// Reinsert at recorded positions
    RestoreJob {
        positions: Vec<FeedPosition>,
        job: Job,
    },
    SetFields { job_id: JobId, fields: JobFields },
    /// Restore `prior` on each field still holding the optimistic value
    RevertFields {
        job_id: JobId,
        expected: JobFields,
        prior: JobFields,
    },
    /// Replace the bid with the same id, or add it
    PutBid { job_id: JobId, bid: Bid },
    /// Restore `prior` on the parts of the bid that still match `expected`
    RevertBid {
        job_id: JobId,
        expected: Bid,
        prior: Bid,
    },
    RemoveBid { job_id: JobId, bid_id: BidId },
    AcceptBid { job_id: JobId, bid_id: BidId },
    /// Undo the cascade of accepting `accepted`, where a push has not moved it on
    RestoreBids {
        job_id: JobId,
        accepted: BidId,
        status: JobStatus,
        accepted_bid_id: Option<BidId>,
        bids: Vec<Bid>,
    },
}

/// The backend write behind an intent
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    CreateJob(Job),
    UpdateJob(Job),
    CreateBid(Bid),
    UpdateBid(Bid),
    AcceptBid { job_id: JobId, bid_id: BidId },
    RejectBid { job_id: JobId, bid_id: BidId },
    HideJob { viewer_id: UserId, job_id: JobId },
    ArchiveChat { job_id: JobId },
}

/// How a successful response is folded back into the cache
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    /// Nothing to substitute
    Acknowledge,
    JobId { temp_id: JobId },
    BidId { job_id: JobId, temp_id: BidId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationPlan {
    pub effects: Vec<CacheEffect>,
    /// Applied in order on remote failure
    pub undo: Vec<CacheEffect>,
    pub remote: RemoteCall,
    pub confirm: Confirmation,
}

impl MutationPlan {
    fn remote_only(remote: RemoteCall) -> Self {
        Self {
            effects: Vec::new(),
            undo: Vec::new(),
            remote,
            confirm: Confirmation::Acknowledge,
        }
    }
}

const HOME_FEEDS: [FeedKey; 2] = [FeedKey::HOME_RECOMMENDED, FeedKey::HOME_ALL];

/// Plan `intent` against the current cache.
///
/// `temp_id` is used for any entity the intent creates. Fails without side
/// effects when the intent is illegal in the cached state.
pub fn prepare(
    intent: &MutationIntent,
    store: &FeedStore,
    now: DateTime<Utc>,
    temp_id: &str,
) -> Result<MutationPlan> {
    match intent {
        MutationIntent::CreateJob(new_job) => plan_create_job(new_job, now, temp_id),
        MutationIntent::UpdateJob { job_id, changes } => {
            plan_update_job(&cached_job(store, job_id)?, changes)
        }
        MutationIntent::PlaceBid {
            job_id,
            worker_id,
            amount,
            message,
        } => {
            let job = cached_job(store, job_id)?;
            let worker_feed_missing_job = store
                .read(FeedKey::WORKER_APPLICATIONS)
                .map(|entry| !entry.contains(job_id))
                .unwrap_or(false);
            plan_place_bid(&job, worker_id, *amount, message, now, temp_id, worker_feed_missing_job)
        }
        MutationIntent::Counter {
            job_id,
            bid_id,
            actor,
            amount,
        } => {
            let job = cached_job(store, job_id)?;
            let bid = confirmed_bid(&job, bid_id)?;
            let role = role_on(&job, bid, actor)?;
            validate_counter(bid, role, *amount)?;

            let mut countered = bid.clone();
            countered.push_turn(role, *amount, now)?;
            Ok(MutationPlan {
                effects: vec![CacheEffect::PutBid {
                    job_id: job_id.clone(),
                    bid: countered.clone(),
                }],
                undo: vec![CacheEffect::RevertBid {
                    job_id: job_id.clone(),
                    expected: countered.clone(),
                    prior: bid.clone(),
                }],
                remote: RemoteCall::UpdateBid(countered),
                confirm: Confirmation::Acknowledge,
            })
        }
        MutationIntent::AcceptBid {
            job_id,
            bid_id,
            actor,
        } => {
            let job = cached_job(store, job_id)?;
            let bid = confirmed_bid(&job, bid_id)?;
            let role = role_on(&job, bid, actor)?;
            validate_action(bid, role, NegotiationAction::Accept)?;
            if job.status != JobStatus::Open {
                return Err(SyncError::IllegalAction(format!(
                    "job {} is {:?}, bids can only be accepted while open",
                    job.id, job.status
                )));
            }

            Ok(MutationPlan {
                effects: vec![CacheEffect::AcceptBid {
                    job_id: job_id.clone(),
                    bid_id: bid_id.clone(),
                }],
                undo: vec![CacheEffect::RestoreBids {
                    job_id: job_id.clone(),
                    accepted: bid_id.clone(),
                    status: job.status,
                    accepted_bid_id: job.accepted_bid_id.clone(),
                    bids: job.bids.clone(),
                }],
                remote: RemoteCall::AcceptBid {
                    job_id: job_id.clone(),
                    bid_id: bid_id.clone(),
                },
                confirm: Confirmation::Acknowledge,
            })
        }
        MutationIntent::RejectBid {
            job_id,
            bid_id,
            actor,
        } => {
            let job = cached_job(store, job_id)?;
            let bid = confirmed_bid(&job, bid_id)?;
            let role = role_on(&job, bid, actor)?;
            validate_action(bid, role, NegotiationAction::Reject)?;

            let mut rejected = bid.clone();
            rejected.status = BidStatus::Rejected;
            Ok(MutationPlan {
                effects: vec![CacheEffect::PutBid {
                    job_id: job_id.clone(),
                    bid: rejected.clone(),
                }],
                undo: vec![CacheEffect::RevertBid {
                    job_id: job_id.clone(),
                    expected: rejected,
                    prior: bid.clone(),
                }],
                remote: RemoteCall::RejectBid {
                    job_id: job_id.clone(),
                    bid_id: bid_id.clone(),
                },
                confirm: Confirmation::Acknowledge,
            })
        }
        MutationIntent::HideJob { viewer_id, job_id } => {
            let remote = RemoteCall::HideJob {
                viewer_id: viewer_id.clone(),
                job_id: job_id.clone(),
            };
            let mut positions = Vec::new();
            let mut hidden: Option<Job> = None;
            for key in HOME_FEEDS {
                let Some(entry) = store.read(key) else {
                    continue;
                };
                if let Some(index) = entry.jobs.iter().position(|j| &j.id == job_id) {
                    positions.push(FeedPosition { key, index });
                    if hidden.is_none() {
                        hidden = entry.jobs.into_iter().nth(index);
                    }
                }
            }
            let Some(job) = hidden else {
                return Ok(MutationPlan::remote_only(remote));
            };
            Ok(MutationPlan {
                effects: vec![CacheEffect::RemoveJob {
                    job_id: job_id.clone(),
                    feeds: Some(HOME_FEEDS.to_vec()),
                }],
                undo: vec![CacheEffect::RestoreJob { positions, job }],
                remote,
                confirm: Confirmation::Acknowledge,
            })
        }
        MutationIntent::ArchiveChat { job_id } => Ok(MutationPlan::remote_only(
            RemoteCall::ArchiveChat {
                job_id: job_id.clone(),
            },
        )),
    }
}

fn cached_job(store: &FeedStore, job_id: &JobId) -> Result<Job> {
    store
        .get_job(job_id)
        .ok_or_else(|| SyncError::NotFound(format!("job {} is not cached", job_id)))
}

fn confirmed_bid<'a>(job: &'a Job, bid_id: &BidId) -> Result<&'a Bid> {
    let bid = job
        .find_bid(bid_id)
        .ok_or_else(|| SyncError::NotFound(format!("bid {} on job {}", bid_id, job.id)))?;
    if bid.id.is_temporary() {
        return Err(SyncError::IllegalAction(format!(
            "bid {} is not confirmed yet",
            bid.id
        )));
    }
    Ok(bid)
}

fn role_on(job: &Job, bid: &Bid, actor: &UserId) -> Result<Role> {
    if &job.poster_id == actor {
        return Ok(Role::Poster);
    }
    bid.role_of(actor).ok_or_else(|| {
        SyncError::Unauthorized(format!("{} is not a party to bid {}", actor, bid.id))
    })
}

fn plan_create_job(new_job: &NewJob, now: DateTime<Utc>, temp_id: &str) -> Result<MutationPlan> {
    if new_job.title.trim().is_empty() {
        return Err(SyncError::Validation("job title is required".into()));
    }
    if new_job.poster_id.as_str().is_empty() {
        return Err(SyncError::Validation("job poster is required".into()));
    }

    let job = Job {
        id: JobId::new(temp_id),
        poster_id: new_job.poster_id.clone(),
        title: new_job.title.clone(),
        description: new_job.description.clone(),
        category: new_job.category.clone(),
        location: new_job.location.clone(),
        coordinates: new_job.coordinates,
        budget: new_job.budget,
        status: JobStatus::Open,
        accepted_bid_id: None,
        created_at: now,
        // Created locally, so the empty bid set is complete
        hydration: Hydration::Full,
        bids: Vec::new(),
        reviews: Vec::new(),
        bid_count: 0,
        action_required: 0,
    };

    Ok(MutationPlan {
        effects: vec![CacheEffect::InsertJob {
            feeds: vec![FeedKey::POSTER, FeedKey::HOME_ALL],
            job: job.clone(),
        }],
        undo: vec![CacheEffect::RemoveJob {
            job_id: job.id.clone(),
            feeds: None,
        }],
        confirm: Confirmation::JobId {
            temp_id: job.id.clone(),
        },
        remote: RemoteCall::CreateJob(job),
    })
}

fn plan_update_job(job: &Job, changes: &JobChanges) -> Result<MutationPlan> {
    if job.id.is_temporary() {
        return Err(SyncError::IllegalAction(format!(
            "job {} is not confirmed yet",
            job.id
        )));
    }
    if let Some(next) = changes.status {
        if !job.status.can_transition_to(next) {
            return Err(SyncError::IllegalAction(format!(
                "job {} cannot move from {:?} to {:?}",
                job.id, job.status, next
            )));
        }
    }

    let prior = JobFields::from(job);
    let next = prior.with_changes(changes);
    let mut updated = job.clone();
    next.write_to(&mut updated);

    Ok(MutationPlan {
        effects: vec![CacheEffect::SetFields {
            job_id: job.id.clone(),
            fields: next.clone(),
        }],
        undo: vec![CacheEffect::RevertFields {
            job_id: job.id.clone(),
            expected: next,
            prior,
        }],
        remote: RemoteCall::UpdateJob(updated),
        confirm: Confirmation::Acknowledge,
    })
}

fn plan_place_bid(
    job: &Job,
    worker_id: &UserId,
    amount: u64,
    message: &str,
    now: DateTime<Utc>,
    temp_id: &str,
    add_to_worker_feed: bool,
) -> Result<MutationPlan> {
    if job.status != JobStatus::Open {
        return Err(SyncError::IllegalAction(format!(
            "job {} is {:?} and takes no bids",
            job.id, job.status
        )));
    }
    if &job.poster_id == worker_id {
        return Err(SyncError::IllegalAction("posters cannot bid on their own job".into()));
    }
    if amount == 0 {
        return Err(SyncError::Validation("bid amount must be positive".into()));
    }
    let already_bidding = job
        .bids
        .iter()
        .any(|b| &b.worker_id == worker_id && b.status == BidStatus::Pending);
    if already_bidding {
        return Err(SyncError::IllegalAction(format!(
            "{} already has a pending bid on job {}",
            worker_id, job.id
        )));
    }

    let bid = Bid::new(
        BidId::new(temp_id),
        job.id.clone(),
        job.poster_id.clone(),
        worker_id.clone(),
        amount,
        message,
        now,
    );

    let mut effects = vec![CacheEffect::PutBid {
        job_id: job.id.clone(),
        bid: bid.clone(),
    }];
    let mut undo = vec![CacheEffect::RemoveBid {
        job_id: job.id.clone(),
        bid_id: bid.id.clone(),
    }];
    if add_to_worker_feed {
        let mut applied = job.clone();
        applied.place_bid(bid.clone());
        effects.push(CacheEffect::InsertJob {
            feeds: vec![FeedKey::WORKER_APPLICATIONS],
            job: applied,
        });
        undo.insert(
            0,
            CacheEffect::RemoveJob {
                job_id: job.id.clone(),
                feeds: Some(vec![FeedKey::WORKER_APPLICATIONS]),
            },
        );
    }

    Ok(MutationPlan {
        effects,
        undo,
        confirm: Confirmation::BidId {
            job_id: job.id.clone(),
            temp_id: bid.id.clone(),
        },
        remote: RemoteCall::CreateBid(bid),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::JobPatch;
    use std::sync::Arc;

    fn store_with_job() -> FeedStore {
        let store = FeedStore::new(Arc::new(ManualClock::new(0)));
        let mut job = JobPatch {
            id: "j1".into(),
            poster_id: Some("poster".into()),
            title: Some("Move sofa".into()),
            budget: Some(120),
            ..Default::default()
        }
        .to_job(Utc::now())
        .unwrap();
        job.place_bid(Bid::new("b1".into(), "j1".into(), "poster".into(), "w1".into(), 100, "", Utc::now()));
        store.write(FeedKey::HOME_ALL, vec![job], false, 1);
        store
    }

    #[test]
    fn test_illegal_status_edge_is_refused() {
        let store = store_with_job();
        store.patch_all(&"j1".into(), |j| j.status = JobStatus::Completed);

        let intent = MutationIntent::UpdateJob {
            job_id: "j1".into(),
            changes: JobChanges {
                status: Some(JobStatus::Open),
                ..Default::default()
            },
        };
        let err = prepare(&intent, &store, Utc::now(), "temp_1").unwrap_err();
        assert!(matches!(err, SyncError::IllegalAction(_)));
    }

    #[test]
    fn test_update_undo_restores_prior_fields() {
        let store = store_with_job();
        let intent = MutationIntent::UpdateJob {
            job_id: "j1".into(),
            changes: JobChanges {
                budget: Some(150),
                description: Some("Third floor".into()),
                ..Default::default()
            },
        };

        let plan = prepare(&intent, &store, Utc::now(), "temp_1").unwrap();
        match (&plan.effects[0], &plan.undo[0]) {
            (
                CacheEffect::SetFields { fields: next, .. },
                CacheEffect::RevertFields { expected, prior, .. },
            ) => {
                assert_eq!(next.budget, 150);
                assert_eq!(expected, next);
                assert_eq!(prior.budget, 120);
                assert_eq!(prior.description, "");
            }
            other => panic!("unexpected plan {:?}", other),
        }
    }

    #[test]
    fn test_stranger_cannot_counter() {
        let store = store_with_job();
        let intent = MutationIntent::Counter {
            job_id: "j1".into(),
            bid_id: "b1".into(),
            actor: "someone".into(),
            amount: 90,
        };
        let err = prepare(&intent, &store, Utc::now(), "temp_1").unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));
    }

    #[test]
    fn test_hide_records_home_positions() {
        let store = store_with_job();
        let intent = MutationIntent::HideJob {
            viewer_id: "w1".into(),
            job_id: "j1".into(),
        };
        let plan = prepare(&intent, &store, Utc::now(), "temp_1").unwrap();
        match &plan.undo[0] {
            CacheEffect::RestoreJob { positions, .. } => {
                assert_eq!(positions, &vec![FeedPosition { key: FeedKey::HOME_ALL, index: 0 }]);
            }
            other => panic!("unexpected undo {:?}", other),
        }
    }
}
