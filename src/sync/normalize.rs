//! Push channel normalization
//!
//! Two transports deliver change notifications:
//!
//! - structured broadcasts: `{"event": "job_updated", "payload": {...}}`
//! - generic row changes: `{"op": "UPDATE", "table": "bids", "new": {...}, "old": {...}}`
//!
//! Both are folded into one [`ChangeEvent`]. Payloads are repaired where a
//! sensible default exists (numeric ids, float amounts, blank timestamps,
//! ledgers serialized as strings) instead of being dropped; only a payload
//! with no usable id is rejected.

use crate::error::{Result, SyncError};
use crate::model::{BidPatch, JobPatch};
use crate::sync::event::{ChangeEvent, ChangeOp, EntityKind};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

const ID_FIELDS: &[&str] = &[
    "id",
    "job_id",
    "jobId",
    "poster_id",
    "posterId",
    "worker_id",
    "workerId",
    "accepted_bid_id",
    "acceptedBidId",
];
const AMOUNT_FIELDS: &[&str] = &["amount", "budget", "bid_count", "bidCount", "bids_count"];
const TIMESTAMP_FIELDS: &[&str] = &["created_at", "createdAt", "timestamp"];
const LEDGER_FIELDS: &[&str] = &["negotiation", "negotiation_history", "negotiationHistory"];

/// Raw inbound message from either push channel
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PushMessage {
    Broadcast {
        event: String,
        #[serde(default)]
        payload: Value,
    },
    RowChange {
        #[serde(alias = "eventType", alias = "type")]
        op: String,
        table: String,
        #[serde(default, alias = "record")]
        new: Option<Value>,
        #[serde(default, alias = "old_record")]
        old: Option<Value>,
    },
}

impl PushMessage {
    pub fn parse(raw: &Value) -> Result<Self> {
        PushMessage::deserialize(raw).map_err(|e| {
            SyncError::MalformedPayload(format!("unrecognized push message: {}", e))
        })
    }

    /// Convert into a change event; `None` for events this engine does not track
    pub fn into_event(self) -> Result<Option<ChangeEvent>> {
        match self {
            PushMessage::Broadcast { event, payload } => {
                let (kind, op) = match event.as_str() {
                    "job_updated" => (EntityKind::Job, ChangeOp::Update),
                    "job_deleted" => (EntityKind::Job, ChangeOp::Delete),
                    "bid_updated" => (EntityKind::Bid, ChangeOp::Update),
                    "bid_inserted" => (EntityKind::Bid, ChangeOp::Insert),
                    other => {
                        debug!(event = other, "Ignoring broadcast event");
                        return Ok(None);
                    }
                };
                let payload = unwrap_envelope(payload, kind);
                build_event(kind, op, payload).map(Some)
            }
            PushMessage::RowChange { op, table, new, old } => {
                let kind = match table.as_str() {
                    "jobs" => EntityKind::Job,
                    "bids" => EntityKind::Bid,
                    other => {
                        debug!(table = other, "Ignoring row change");
                        return Ok(None);
                    }
                };
                let op = ChangeOp::parse(&op).ok_or_else(|| {
                    SyncError::MalformedPayload(format!("unknown row change op {}", op))
                })?;
                let row = match op {
                    ChangeOp::Delete => pick_row(old, new),
                    ChangeOp::Insert | ChangeOp::Update => pick_row(new, old),
                };
                build_event(kind, op, row).map(Some)
            }
        }
    }
}

/// Normalize one raw push message
pub fn normalize(raw: &Value) -> Result<Option<ChangeEvent>> {
    PushMessage::parse(raw)?.into_event()
}

fn pick_row(preferred: Option<Value>, fallback: Option<Value>) -> Value {
    match preferred {
        Some(Value::Object(map)) if !map.is_empty() => Value::Object(map),
        _ => fallback.unwrap_or(Value::Null),
    }
}

/// `{"job": {...}}` and `{"record": {...}}` wrappers around the snapshot
fn unwrap_envelope(payload: Value, kind: EntityKind) -> Value {
    let key = match kind {
        EntityKind::Job => "job",
        EntityKind::Bid => "bid",
    };
    match payload {
        Value::Object(mut map) if !map.contains_key("id") => {
            match map.remove(key).or_else(|| map.remove("record")) {
                Some(inner @ Value::Object(_)) => inner,
                _ => Value::Object(map),
            }
        }
        other => other,
    }
}

fn build_event(kind: EntityKind, op: ChangeOp, payload: Value) -> Result<ChangeEvent> {
    let Value::Object(mut map) = payload else {
        return Err(SyncError::MalformedPayload(format!(
            "{:?} {:?} payload is not an object",
            kind, op
        )));
    };

    // Delete broadcasts sometimes carry only the foreign-key form
    if !map.contains_key("id") {
        let alias = match kind {
            EntityKind::Job => map.get("job_id").or_else(|| map.get("jobId")),
            EntityKind::Bid => map.get("bid_id").or_else(|| map.get("bidId")),
        };
        if let Some(id) = alias.cloned() {
            map.insert("id".into(), id);
        }
    }

    repair(&mut map);
    let has_id = matches!(map.get("id"), Some(Value::String(s)) if !s.is_empty());
    if !has_id {
        return Err(SyncError::MalformedPayload(format!(
            "{:?} {:?} payload has no id",
            kind, op
        )));
    }

    let value = Value::Object(map);
    match kind {
        EntityKind::Job => {
            let patch: JobPatch = serde_json::from_value(value)
                .map_err(|e| SyncError::MalformedPayload(format!("job payload: {}", e)))?;
            Ok(ChangeEvent::job(op, patch))
        }
        EntityKind::Bid => {
            let patch: BidPatch = serde_json::from_value(value)
                .map_err(|e| SyncError::MalformedPayload(format!("bid payload: {}", e)))?;
            Ok(ChangeEvent::bid(op, patch))
        }
    }
}

/// Coerce loosely typed columns into the shapes the patches expect
fn repair(map: &mut Map<String, Value>) {
    for field in ID_FIELDS {
        if let Some(value) = map.get_mut(*field) {
            if let Value::Number(n) = value {
                *value = Value::String(n.to_string());
            }
        }
    }

    for field in AMOUNT_FIELDS {
        let Some(value) = map.get_mut(*field) else {
            continue;
        };
        match coerce_amount(value) {
            Some(amount) => *value = Value::from(amount),
            None => {
                map.remove(*field);
            }
        }
    }

    for field in TIMESTAMP_FIELDS {
        let blank = match map.get(*field) {
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(Value::Null) => true,
            Some(_) => false,
            None => continue,
        };
        if blank {
            map.remove(*field);
        }
    }

    for field in LEDGER_FIELDS {
        let Some(value) = map.get_mut(*field) else {
            continue;
        };
        if let Value::String(encoded) = value {
            *value = serde_json::from_str(encoded).unwrap_or(Value::Null);
        }
        match value {
            Value::Array(turns) => {
                for turn in turns.iter_mut() {
                    if let Value::Object(turn) = turn {
                        repair(turn);
                    }
                }
            }
            _ => {
                map.remove(*field);
            }
        }
    }

    // Missing status means "not stated", not a reset
    if matches!(map.get("status"), Some(Value::Null)) {
        map.remove("status");
    }

    if let Some(Value::Array(bids)) = map.get_mut("bids") {
        for bid in bids.iter_mut() {
            if let Value::Object(bid) = bid {
                repair(bid);
            }
        }
    }
}

fn coerce_amount(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f.round() as u64),
        _ => None,
    }
}
