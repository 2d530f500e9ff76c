//! Bids and their negotiation ledger

use crate::error::{Result, SyncError};
use crate::model::ids::{BidId, JobId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of a bid proposed an amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[serde(alias = "worker")]
    Worker,
    #[serde(alias = "poster")]
    Poster,
}

impl Role {
    pub fn other(&self) -> Role {
        match self {
            Role::Worker => Role::Poster,
            Role::Poster => Role::Worker,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Worker => "WORKER",
            Role::Poster => "POSTER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BidStatus {
    #[default]
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "accepted")]
    Accepted,
    #[serde(alias = "rejected")]
    Rejected,
}

impl BidStatus {
    /// Accepted and rejected bids take no further ledger entries
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BidStatus::Pending)
    }
}

/// One proposed amount in a negotiation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationTurn {
    pub amount: u64,
    #[serde(alias = "proposedBy")]
    pub proposed_by: Role,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub job_id: JobId,
    pub poster_id: UserId,
    pub worker_id: UserId,
    /// Always equals the last ledger entry's amount
    pub amount: u64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: BidStatus,
    pub created_at: DateTime<Utc>,
    /// Ordered ledger, first entry always proposed by the worker
    #[serde(default)]
    pub negotiation: Vec<NegotiationTurn>,
}

impl Bid {
    /// A fresh bid with its opening worker proposal
    pub fn new(
        id: BidId,
        job_id: JobId,
        poster_id: UserId,
        worker_id: UserId,
        amount: u64,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_id,
            poster_id,
            worker_id,
            amount,
            message: message.into(),
            status: BidStatus::Pending,
            created_at: at,
            negotiation: vec![NegotiationTurn {
                amount,
                proposed_by: Role::Worker,
                timestamp: at,
            }],
        }
    }

    pub fn last_turn(&self) -> Option<&NegotiationTurn> {
        self.negotiation.last()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The role `user` plays on this bid, if any
    pub fn role_of(&self, user: &UserId) -> Option<Role> {
        if &self.worker_id == user {
            Some(Role::Worker)
        } else if &self.poster_id == user {
            Some(Role::Poster)
        } else {
            None
        }
    }

    /// Append a counter-offer; status is unchanged
    pub fn push_turn(&mut self, role: Role, amount: u64, at: DateTime<Utc>) -> Result<()> {
        if self.is_terminal() {
            return Err(SyncError::IllegalAction(format!(
                "bid {} is {:?}, no further offers",
                self.id, self.status
            )));
        }
        self.negotiation.push(NegotiationTurn {
            amount,
            proposed_by: role,
            timestamp: at,
        });
        self.amount = amount;
        Ok(())
    }

    /// Restore ledger invariants on data from the wire.
    ///
    /// An empty ledger gets the opening worker turn; the bid amount follows
    /// the last entry.
    pub fn normalize(&mut self) {
        if self.negotiation.is_empty() {
            self.negotiation.push(NegotiationTurn {
                amount: self.amount,
                proposed_by: Role::Worker,
                timestamp: self.created_at,
            });
        }
        if let Some(last) = self.negotiation.last() {
            self.amount = last.amount;
        }
    }

    /// Undo an optimistic edit on the parts that still show it.
    ///
    /// Ledger and status revert independently; a status moved on by a push
    /// is kept.
    pub fn revert_to(&mut self, prior: &Bid, expected: &Bid) {
        if self.negotiation == expected.negotiation {
            self.negotiation = prior.negotiation.clone();
            self.amount = prior.amount;
        }
        if self.status == expected.status {
            self.status = prior.status;
        }
    }

    /// Same logical bid as a locally created optimistic one
    pub fn matches_content(&self, other: &Bid) -> bool {
        self.job_id == other.job_id
            && self.worker_id == other.worker_id
            && self.amount == other.amount
    }

    /// Merge a change payload: present, non-empty fields win
    pub fn merge(&mut self, patch: &BidPatch) {
        if let Some(job_id) = non_empty_id(&patch.job_id) {
            self.job_id = job_id.clone();
        }
        if let Some(poster_id) = non_empty_id(&patch.poster_id) {
            self.poster_id = poster_id.clone();
        }
        if let Some(worker_id) = non_empty_id(&patch.worker_id) {
            self.worker_id = worker_id.clone();
        }
        if let Some(message) = patch.message.as_ref().filter(|m| !m.is_empty()) {
            self.message = message.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(created_at) = patch.created_at {
            self.created_at = created_at;
        }
        match patch.negotiation.as_ref().filter(|turns| !turns.is_empty()) {
            Some(turns) => {
                self.negotiation = turns.iter().map(|t| t.resolve(self.created_at)).collect();
                self.normalize();
            }
            None => {
                if let Some(amount) = patch.amount {
                    // Only the opening proposal can be re-priced without a ledger
                    if self.negotiation.len() <= 1 {
                        self.amount = amount;
                        if let Some(opening) = self.negotiation.first_mut() {
                            opening.amount = amount;
                        }
                    }
                }
                self.normalize();
            }
        }
    }
}

fn non_empty_id<T: AsRef<str>>(value: &Option<T>) -> Option<&T> {
    value.as_ref().filter(|v| !v.as_ref().is_empty())
}

/// Ledger entry as carried by change payloads; the timestamp may be missing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnPatch {
    pub amount: u64,
    #[serde(alias = "proposedBy")]
    pub proposed_by: Role,
    #[serde(default, alias = "created_at")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TurnPatch {
    fn resolve(&self, fallback: DateTime<Utc>) -> NegotiationTurn {
        NegotiationTurn {
            amount: self.amount,
            proposed_by: self.proposed_by,
            timestamp: self.timestamp.unwrap_or(fallback),
        }
    }
}

/// Full-or-partial bid snapshot from a change notification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BidPatch {
    pub id: BidId,
    #[serde(default, alias = "jobId")]
    pub job_id: Option<JobId>,
    #[serde(default, alias = "posterId")]
    pub poster_id: Option<UserId>,
    #[serde(default, alias = "workerId")]
    pub worker_id: Option<UserId>,
    #[serde(default)]
    pub amount: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<BidStatus>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        alias = "negotiation_history",
        alias = "negotiationHistory"
    )]
    pub negotiation: Option<Vec<TurnPatch>>,
}

impl BidPatch {
    /// Build a complete bid, defaulting what the payload left out.
    ///
    /// `now` stands in for a missing creation time; `fallback_poster` for a
    /// missing poster id (the owning job's poster).
    pub fn to_bid(&self, fallback_poster: &UserId, now: DateTime<Utc>) -> Result<Bid> {
        let job_id = non_empty_id(&self.job_id)
            .cloned()
            .ok_or_else(|| SyncError::MalformedPayload(format!("bid {} has no job_id", self.id)))?;
        let worker_id = non_empty_id(&self.worker_id)
            .cloned()
            .ok_or_else(|| SyncError::MalformedPayload(format!("bid {} has no worker_id", self.id)))?;
        let created_at = self.created_at.unwrap_or(now);
        let negotiation: Vec<NegotiationTurn> = self
            .negotiation
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|t| t.resolve(created_at))
            .collect();
        let amount = match (self.amount, negotiation.last()) {
            (_, Some(last)) => last.amount,
            (Some(amount), None) => amount,
            (None, None) => {
                return Err(SyncError::MalformedPayload(format!(
                    "bid {} has neither amount nor negotiation",
                    self.id
                )))
            }
        };

        let mut bid = Bid {
            id: self.id.clone(),
            job_id,
            poster_id: non_empty_id(&self.poster_id)
                .cloned()
                .unwrap_or_else(|| fallback_poster.clone()),
            worker_id,
            amount,
            message: self.message.clone().unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            created_at,
            negotiation,
        };
        bid.normalize();
        Ok(bid)
    }
}

impl From<&Bid> for BidPatch {
    fn from(bid: &Bid) -> Self {
        Self {
            id: bid.id.clone(),
            job_id: Some(bid.job_id.clone()),
            poster_id: Some(bid.poster_id.clone()),
            worker_id: Some(bid.worker_id.clone()),
            amount: Some(bid.amount),
            message: Some(bid.message.clone()),
            status: Some(bid.status),
            created_at: Some(bid.created_at),
            negotiation: Some(
                bid.negotiation
                    .iter()
                    .map(|t| TurnPatch {
                        amount: t.amount,
                        proposed_by: t.proposed_by,
                        timestamp: Some(t.timestamp),
                    })
                    .collect(),
            ),
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

    fn bid() -> Bid {
        Bid::new("b1".into(), "j1".into(), "poster".into(), "worker".into(), 500, "hi", at(0))
    }

    #[test]
    fn test_new_bid_opens_with_worker_turn() {
        let bid = bid();
        assert_eq!(bid.negotiation.len(), 1);
        assert_eq!(bid.negotiation[0].proposed_by, Role::Worker);
        assert_eq!(bid.amount, 500);
    }

    #[test]
    fn test_push_turn_tracks_amount_and_refuses_terminal() {
        let mut bid = bid();
        bid.push_turn(Role::Poster, 400, at(1)).unwrap();
        assert_eq!(bid.amount, 400);

        bid.status = BidStatus::Rejected;
        assert!(matches!(
            bid.push_turn(Role::Worker, 450, at(2)),
            Err(SyncError::IllegalAction(_))
        ));
        assert_eq!(bid.negotiation.len(), 2);
    }

    #[test]
    fn test_merge_keeps_ledger_when_payload_omits_it() {
        let mut bid = bid();
        bid.push_turn(Role::Poster, 400, at(1)).unwrap();

        bid.merge(&BidPatch {
            id: "b1".into(),
            status: Some(BidStatus::Pending),
            message: Some(String::new()),
            ..Default::default()
        });

        assert_eq!(bid.negotiation.len(), 2);
        assert_eq!(bid.message, "hi");
        assert_eq!(bid.amount, 400);
    }

    #[test]
    fn test_patch_without_ledger_gets_opening_turn() {
        let patch = BidPatch {
            id: "b9".into(),
            job_id: Some("j1".into()),
            worker_id: Some("w".into()),
            amount: Some(300),
            ..Default::default()
        };
        let bid = patch.to_bid(&"poster".into(), at(10)).unwrap();
        assert_eq!(bid.poster_id, UserId::from("poster"));
        assert_eq!(bid.created_at, at(10));
        assert_eq!(bid.negotiation[0].amount, 300);
        assert_eq!(bid.negotiation[0].proposed_by, Role::Worker);
    }

    #[test]
    fn test_patch_without_job_is_malformed() {
        let patch = BidPatch {
            id: "b9".into(),
            worker_id: Some("w".into()),
            amount: Some(300),
            ..Default::default()
        };
        assert!(matches!(
            patch.to_bid(&"p".into(), at(0)),
            Err(SyncError::MalformedPayload(_))
        ));
    }
}
