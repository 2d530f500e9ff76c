//! Normalized change events
//!
//! Both push channels are converted into [`ChangeEvent`] before they reach
//! the reconciler, so it has a single input contract.

use crate::model::{BidPatch, JobPatch};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Job,
    Bid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeOp {
    #[serde(alias = "insert")]
    Insert,
    #[serde(alias = "update")]
    Update,
    #[serde(alias = "delete")]
    Delete,
}

impl ChangeOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Some(ChangeOp::Insert),
            "UPDATE" => Some(ChangeOp::Update),
            "DELETE" => Some(ChangeOp::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeEvent {
    Job { op: ChangeOp, payload: JobPatch },
    Bid { op: ChangeOp, payload: BidPatch },
}

impl ChangeEvent {
    pub fn job(op: ChangeOp, payload: JobPatch) -> Self {
        ChangeEvent::Job { op, payload }
    }

    pub fn bid(op: ChangeOp, payload: BidPatch) -> Self {
        ChangeEvent::Bid { op, payload }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            ChangeEvent::Job { .. } => EntityKind::Job,
            ChangeEvent::Bid { .. } => EntityKind::Bid,
        }
    }

    pub fn op(&self) -> ChangeOp {
        match self {
            ChangeEvent::Job { op, .. } | ChangeEvent::Bid { op, .. } => *op,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            ChangeEvent::Job { payload, .. } => payload.id.as_str(),
            ChangeEvent::Bid { payload, .. } => payload.id.as_str(),
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {:?} {}", self.kind(), self.op(), self.entity_id())
    }
}
