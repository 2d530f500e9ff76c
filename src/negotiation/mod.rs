//! Turn-based bid negotiation
//!
//! Pure functions over a [`Bid`]: who may act next, what they may do, and
//! whether a proposed action is legal. Nothing here touches the caches.
//!
//! ```text
//!  ledger last proposer   status     actor    allowed
//!  ───────────────────    ───────    ──────   ─────────────────────────
//!  WORKER (opening bid)   PENDING    POSTER   ACCEPT, COUNTER, REJECT
//!  POSTER                 PENDING    WORKER   ACCEPT, COUNTER, REJECT
//!  any                    ACCEPTED   NONE     -
//!  any                    REJECTED   NONE     -
//! ```

use crate::error::{Result, SyncError};
use crate::model::{Bid, BidStatus, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Who holds the turn on a bid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnActor {
    Worker,
    Poster,
    /// Terminal bid, nobody acts
    None,
}

impl TurnActor {
    pub fn is_role(&self, role: Role) -> bool {
        matches!(
            (self, role),
            (TurnActor::Worker, Role::Worker) | (TurnActor::Poster, Role::Poster)
        )
    }
}

impl From<Role> for TurnActor {
    fn from(role: Role) -> Self {
        match role {
            Role::Worker => TurnActor::Worker,
            Role::Poster => TurnActor::Poster,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationAction {
    Accept,
    Counter,
    /// Reject by the poster, withdraw by the worker
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub actor: TurnActor,
    pub allowed_actions: BTreeSet<NegotiationAction>,
}

impl Turn {
    fn terminal() -> Self {
        Self {
            actor: TurnActor::None,
            allowed_actions: BTreeSet::new(),
        }
    }

    pub fn allows(&self, action: NegotiationAction) -> bool {
        self.allowed_actions.contains(&action)
    }
}

/// Derive turn ownership and legal actions from a bid
pub fn derive_turn(bid: &Bid) -> Turn {
    if bid.status != BidStatus::Pending {
        return Turn::terminal();
    }

    // A bid always opens with the worker's proposal
    let last_proposer = bid.last_turn().map(|t| t.proposed_by).unwrap_or(Role::Worker);

    Turn {
        actor: last_proposer.other().into(),
        allowed_actions: [
            NegotiationAction::Accept,
            NegotiationAction::Counter,
            NegotiationAction::Reject,
        ]
        .into_iter()
        .collect(),
    }
}

/// Check that `role` may take `action` on `bid` right now.
///
/// The poster may accept any pending bid regardless of whose turn it is;
/// every other action requires holding the turn, which also rules out
/// back-to-back counters from the same side.
pub fn validate_action(bid: &Bid, role: Role, action: NegotiationAction) -> Result<()> {
    let turn = derive_turn(bid);

    if turn.actor == TurnActor::None {
        return Err(SyncError::IllegalAction(format!(
            "bid {} is {:?}",
            bid.id, bid.status
        )));
    }

    if role == Role::Poster && action == NegotiationAction::Accept {
        return Ok(());
    }

    if !turn.actor.is_role(role) {
        return Err(SyncError::IllegalAction(format!(
            "bid {}: waiting on {:?}, not {}",
            bid.id,
            turn.actor,
            role.as_str()
        )));
    }

    if !turn.allows(action) {
        return Err(SyncError::IllegalAction(format!(
            "bid {}: {:?} not allowed",
            bid.id, action
        )));
    }

    Ok(())
}

/// Validate a counter-offer amount against the bid
pub fn validate_counter(bid: &Bid, role: Role, amount: u64) -> Result<()> {
    validate_action(bid, role, NegotiationAction::Counter)?;
    if amount == 0 {
        return Err(SyncError::Validation("counter amount must be positive".into()));
    }
    if amount == bid.amount {
        return Err(SyncError::Validation(format!(
            "counter amount {} equals the current offer",
            amount
        )));
    }
    Ok(())
}
