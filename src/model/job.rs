//! Jobs, their lifecycle and hydration state

use crate::error::{Result, SyncError};
use crate::model::bid::{Bid, BidPatch, BidStatus, Role};
use crate::model::ids::{BidId, JobId, UserId};
use crate::negotiation::derive_turn;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Job lifecycle status
///
/// `OPEN → IN_PROGRESS → COMPLETED`, plus `OPEN → CANCELLED` and
/// `IN_PROGRESS → OPEN` when an accepted bid is cancelled and refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    #[serde(alias = "open")]
    Open,
    #[serde(alias = "in_progress")]
    InProgress,
    #[serde(alias = "completed")]
    Completed,
    #[serde(alias = "cancelled")]
    Cancelled,
}

impl JobStatus {
    /// Whether the lifecycle has an edge from `self` to `next`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Open, InProgress) | (InProgress, Completed) | (Open, Cancelled) | (InProgress, Open)
        ) || *self == next
    }
}

/// Whether the bid set is known to be complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hydration {
    /// Loaded from a lightweight feed; bids may be missing
    #[default]
    Partial,
    /// Loaded from a detail fetch (or created locally); bids are complete
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    #[serde(alias = "latitude")]
    pub lat: f64,
    #[serde(alias = "longitude", alias = "lon")]
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    #[serde(alias = "reviewerId")]
    pub reviewer_id: UserId,
    #[serde(default, alias = "revieweeId")]
    pub reviewee_id: Option<UserId>,
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
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
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub accepted_bid_id: Option<BidId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub hydration: Hydration,
    #[serde(default)]
    pub bids: Vec<Bid>,
    #[serde(default)]
    pub reviews: Vec<Review>,
    /// Denormalized bid count shown in feed lists
    #[serde(default)]
    pub bid_count: u32,
    /// Pending bids waiting on the session viewer
    #[serde(default)]
    pub action_required: u32,
}

/// Outcome of placing a bid into a job's bid set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BidPlacement {
    /// Bid id was not present before
    Inserted,
    /// Bid id was present and got merged
    Merged,
    /// A temporary bid with the same content adopted this id
    Substituted { temp_id: BidId },
}

impl Job {
    pub fn find_bid(&self, bid_id: &BidId) -> Option<&Bid> {
        self.bids.iter().find(|b| &b.id == bid_id)
    }

    pub fn find_bid_mut(&mut self, bid_id: &BidId) -> Option<&mut Bid> {
        self.bids.iter_mut().find(|b| &b.id == bid_id)
    }

    pub fn is_fully_hydrated(&self) -> bool {
        self.hydration == Hydration::Full
    }

    /// Upsert a bid by id, adopting a matching temporary bid when there is one.
    ///
    /// A bid new to a partial job bumps its summary count.
    pub fn place_bid(&mut self, bid: Bid) -> BidPlacement {
        self.upsert_bid(bid, true)
    }

    /// Like [`Job::place_bid`] for a bid the summary count already includes
    pub fn place_known_bid(&mut self, bid: Bid) -> BidPlacement {
        self.upsert_bid(bid, false)
    }

    fn upsert_bid(&mut self, bid: Bid, counted: bool) -> BidPlacement {
        if let Some(existing) = self.find_bid_mut(&bid.id) {
            existing.merge(&BidPatch::from(&bid));
            return BidPlacement::Merged;
        }

        if !bid.id.is_temporary() {
            if let Some(temp) = self
                .bids
                .iter_mut()
                .find(|b| b.id.is_temporary() && b.matches_content(&bid))
            {
                let temp_id = std::mem::replace(&mut temp.id, bid.id.clone());
                temp.merge(&BidPatch::from(&bid));
                if self.accepted_bid_id.as_ref() == Some(&temp_id) {
                    self.accepted_bid_id = Some(bid.id.clone());
                }
                return BidPlacement::Substituted { temp_id };
            }
        }

        self.bids.push(bid);
        if counted && !self.is_fully_hydrated() {
            self.bid_count = self.bid_count.saturating_add(1);
        }
        BidPlacement::Inserted
    }

    /// Remove a bid; deleting the accepted bid reopens the job
    pub fn remove_bid(&mut self, bid_id: &BidId) -> Option<Bid> {
        let index = self.bids.iter().position(|b| &b.id == bid_id);
        let removed = index.map(|i| self.bids.remove(i));
        if removed.is_some() && !self.is_fully_hydrated() {
            self.bid_count = self.bid_count.saturating_sub(1);
        }

        if self.accepted_bid_id.as_ref() == Some(bid_id) {
            self.accepted_bid_id = None;
            self.status = JobStatus::Open;
        }
        removed
    }

    /// Apply an accepted bid: job goes in progress, every other pending or accepted bid is rejected
    pub fn apply_acceptance(&mut self, bid_id: &BidId) {
        self.accepted_bid_id = Some(bid_id.clone());
        if self.status == JobStatus::Open {
            self.status = JobStatus::InProgress;
        }
        for bid in &mut self.bids {
            if &bid.id == bid_id {
                bid.status = BidStatus::Accepted;
            } else if matches!(bid.status, BidStatus::Pending | BidStatus::Accepted) {
                bid.status = BidStatus::Rejected;
            }
        }
    }

    /// Recompute bid count and viewer action count
    pub fn refresh_counters(&mut self, viewer: Option<&UserId>) {
        if self.is_fully_hydrated() {
            self.bid_count = self.bids.len() as u32;
        } else {
            self.bid_count = self.bid_count.max(self.bids.len() as u32);
        }

        self.action_required = match viewer {
            Some(viewer) => self
                .bids
                .iter()
                .filter(|bid| match self.viewer_role(bid, viewer) {
                    Some(role) => derive_turn(bid).actor.is_role(role),
                    None => false,
                })
                .count() as u32,
            None => 0,
        };
    }

    fn viewer_role(&self, bid: &Bid, viewer: &UserId) -> Option<Role> {
        if &self.poster_id == viewer {
            Some(Role::Poster)
        } else if &bid.worker_id == viewer {
            Some(Role::Worker)
        } else {
            None
        }
    }

    /// Same logical job as a locally created optimistic one
    pub fn matches_content(&self, other: &Job) -> bool {
        self.poster_id == other.poster_id
            && self.title == other.title
            && self.budget == other.budget
    }

    /// Merge a change payload field by field.
    ///
    /// Absent or empty fields never overwrite what is held locally; present
    /// fields win. A fully hydrated payload replaces the confirmed bid set.
    pub fn merge(&mut self, patch: &JobPatch, now: DateTime<Utc>) {
        merge_text(&mut self.title, &patch.title);
        merge_text(&mut self.description, &patch.description);
        merge_text(&mut self.category, &patch.category);
        merge_text(&mut self.location, &patch.location);
        if let Some(poster_id) = patch.poster_id.as_ref().filter(|p| !p.as_str().is_empty()) {
            self.poster_id = poster_id.clone();
        }
        if let Some(coordinates) = patch.coordinates() {
            self.coordinates = Some(coordinates);
        }
        if let Some(budget) = patch.budget {
            self.budget = budget;
        }
        if let Some(status) = patch.status {
            if !self.status.can_transition_to(status) {
                tracing::warn!(
                    job_id = %self.id,
                    from = ?self.status,
                    to = ?status,
                    "Backend moved job along an edge outside the lifecycle"
                );
            }
            self.status = status;
        }
        if let Some(accepted) = &patch.accepted_bid_id {
            self.accepted_bid_id = accepted.clone();
        }
        if let Some(created_at) = patch.created_at {
            self.created_at = created_at;
        }

        let full = patch.hydration == Some(Hydration::Full);
        if let Some(incoming) = patch.bids.as_ref().filter(|b| full || !b.is_empty()) {
            if full {
                // Confirmed bids missing from a complete set are gone; pending optimistic ones stay
                self.bids.retain(|local| {
                    local.id.is_temporary() || incoming.iter().any(|b| b.id == local.id)
                });
            }
            for bid_patch in incoming {
                match self.find_bid_mut(&bid_patch.id) {
                    Some(existing) => existing.merge(bid_patch),
                    None => {
                        let mut patch = bid_patch.clone();
                        if patch.job_id.is_none() {
                            patch.job_id = Some(self.id.clone());
                        }
                        match patch.to_bid(&self.poster_id, now) {
                            Ok(bid) => {
                                self.place_known_bid(bid);
                            }
                            Err(e) => {
                                tracing::warn!(job_id = %self.id, error = %e, "Skipping unusable bid in job payload");
                            }
                        }
                    }
                }
            }
        }
        if let Some(reviews) = patch.reviews.as_ref().filter(|r| full || !r.is_empty()) {
            self.reviews = reviews.clone();
        }
        if full {
            self.hydration = Hydration::Full;
        } else if let Some(count) = patch.bid_count {
            if !self.is_fully_hydrated() {
                self.bid_count = count;
            }
        }
    }
}

fn merge_text(local: &mut String, incoming: &Option<String>) {
    if let Some(value) = incoming.as_ref().filter(|v| !v.is_empty()) {
        *local = value.clone();
    }
}

/// Present-but-null deserializes to `Some(None)`, absent to `None`
fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Full-or-partial job snapshot from a change notification or fetch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPatch {
    pub id: JobId,
    #[serde(default, alias = "posterId")]
    pub poster_id: Option<UserId>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default, alias = "latitude", skip_serializing)]
    pub lat: Option<f64>,
    #[serde(default, alias = "longitude", skip_serializing)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub budget: Option<u64>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default, alias = "acceptedBidId", deserialize_with = "double_option")]
    pub accepted_bid_id: Option<Option<BidId>>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub bids: Option<Vec<BidPatch>>,
    #[serde(default)]
    pub reviews: Option<Vec<Review>>,
    #[serde(default, alias = "bidCount", alias = "bids_count")]
    pub bid_count: Option<u32>,
    /// Set by the detail fetch; change payloads never claim completeness
    #[serde(skip)]
    pub hydration: Option<Hydration>,
}

impl JobPatch {
    /// Coordinates from either a nested object or flat columns
    pub fn coordinates(&self) -> Option<Coordinates> {
        self.coordinates.or(match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
            _ => None,
        })
    }

    /// Build a complete job, defaulting what the payload left out
    pub fn to_job(&self, now: DateTime<Utc>) -> Result<Job> {
        let poster_id = self
            .poster_id
            .clone()
            .filter(|p| !p.as_str().is_empty())
            .ok_or_else(|| SyncError::MalformedPayload(format!("job {} has no poster_id", self.id)))?;

        let mut job = Job {
            id: self.id.clone(),
            poster_id,
            title: String::new(),
            description: String::new(),
            category: String::new(),
            location: String::new(),
            coordinates: None,
            budget: 0,
            status: JobStatus::Open,
            accepted_bid_id: None,
            created_at: self.created_at.unwrap_or(now),
            hydration: Hydration::Partial,
            bids: Vec::new(),
            reviews: Vec::new(),
            bid_count: 0,
            action_required: 0,
        };
        job.merge(self, now);
        Ok(job)
    }
}

impl From<&Job> for JobPatch {
    fn from(job: &Job) -> Self {
        let full = job.is_fully_hydrated();
        Self {
            id: job.id.clone(),
            poster_id: Some(job.poster_id.clone()),
            title: Some(job.title.clone()),
            description: Some(job.description.clone()),
            category: Some(job.category.clone()),
            location: Some(job.location.clone()),
            coordinates: job.coordinates,
            lat: None,
            lng: None,
            budget: Some(job.budget),
            status: Some(job.status),
            accepted_bid_id: Some(job.accepted_bid_id.clone()),
            created_at: Some(job.created_at),
            bids: if full || !job.bids.is_empty() {
                Some(job.bids.iter().map(BidPatch::from).collect())
            } else {
                None
            },
            reviews: if full || !job.reviews.is_empty() {
                Some(job.reviews.clone())
            } else {
                None
            },
            bid_count: if full { None } else { Some(job.bid_count) },
            hydration: if full { Some(Hydration::Full) } else { None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn job() -> Job {
        JobPatch {
            id: "j1".into(),
            poster_id: Some("poster".into()),
            title: Some("Fix fence".into()),
            budget: Some(800),
            ..Default::default()
        }
        .to_job(at(0))
        .unwrap()
    }

    fn bid(id: &str, worker: &str, amount: u64) -> Bid {
        Bid::new(id.into(), "j1".into(), "poster".into(), worker.into(), amount, "", at(1))
    }

    #[test]
    fn test_lifecycle_edges() {
        assert!(JobStatus::Open.can_transition_to(JobStatus::InProgress));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Open));
        assert!(JobStatus::Open.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Open));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::InProgress));
    }

    #[test]
    fn test_terse_update_keeps_richer_fields() {
        let mut job = job();
        job.description = "Back garden, 12m".into();
        job.hydration = Hydration::Full;
        job.place_bid(bid("b1", "w1", 500));

        let ping = JobPatch {
            id: "j1".into(),
            description: Some(String::new()),
            bids: Some(vec![]),
            status: Some(JobStatus::Open),
            ..Default::default()
        };
        job.merge(&ping, at(5));

        assert_eq!(job.description, "Back garden, 12m");
        assert_eq!(job.bids.len(), 1);
        assert_eq!(job.hydration, Hydration::Full);
    }

    #[test]
    fn test_explicit_null_clears_accepted_bid() {
        let patch: JobPatch =
            serde_json::from_str(r#"{"id":"j1","accepted_bid_id":null,"status":"open"}"#).unwrap();
        assert_eq!(patch.accepted_bid_id, Some(None));

        let absent: JobPatch = serde_json::from_str(r#"{"id":"j1"}"#).unwrap();
        assert_eq!(absent.accepted_bid_id, None);
    }

    #[test]
    fn test_temporary_bid_adopts_canonical_id() {
        let mut job = job();
        job.place_bid(bid("temp_1", "w1", 500));

        let placement = job.place_bid(bid("b123", "w1", 500));

        assert_eq!(placement, BidPlacement::Substituted { temp_id: "temp_1".into() });
        assert_eq!(job.bids.len(), 1);
        assert_eq!(job.bids[0].id, BidId::from("b123"));
    }

    #[test]
    fn test_removing_accepted_bid_reopens_job() {
        let mut job = job();
        job.place_bid(bid("b1", "w1", 500));
        job.apply_acceptance(&"b1".into());
        assert_eq!(job.status, JobStatus::InProgress);

        job.remove_bid(&"b1".into());
        assert_eq!(job.status, JobStatus::Open);
        assert_eq!(job.accepted_bid_id, None);
    }

    #[test]
    fn test_action_required_counts_viewer_turns() {
        let mut job = job();
        job.hydration = Hydration::Full;
        job.place_bid(bid("b1", "w1", 500));
        let mut countered = bid("b2", "w2", 600);
        countered.push_turn(Role::Poster, 550, at(2)).unwrap();
        job.place_bid(countered);

        job.refresh_counters(Some(&"poster".into()));
        assert_eq!(job.bid_count, 2);
        assert_eq!(job.action_required, 1);

        job.refresh_counters(Some(&"w2".into()));
        assert_eq!(job.action_required, 1);
    }

    #[test]
    fn test_full_payload_drops_deleted_bids_but_keeps_optimistic() {
        let mut job = job();
        job.place_bid(bid("b1", "w1", 500));
        job.place_bid(bid("temp_9", "w9", 900));

        let detail = JobPatch {
            id: "j1".into(),
            bids: Some(vec![BidPatch::from(&bid("b2", "w2", 650))]),
            hydration: Some(Hydration::Full),
            ..Default::default()
        };
        job.merge(&detail, at(3));

        let ids: Vec<&str> = job.bids.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["temp_9", "b2"]);
        assert!(job.is_fully_hydrated());
    }
}
