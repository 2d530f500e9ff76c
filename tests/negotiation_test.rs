//! Bid negotiation through the engine
//!
//! - Turn ownership follows the last ledger entry
//! - Counters alternate; the same side never counters twice in a row
//! - Terminal bids take no further actions
//! - Viewer action counts follow the turn

mod common;

use common::*;
use marketplace_sync::{
    BidStatus, ChangeOp, FeedKey, JobStatus, MutationIntent, Role, SyncError, TurnActor,
};
use marketplace_sync::negotiation::validate_action;
use marketplace_sync::{derive_turn, NegotiationAction};
use serde_json::json;

/// Poster `p1` viewing job `j1` with worker `w1`'s opening bid `b1` of 500
fn negotiating() -> Harness {
    let h = harness("p1");
    let seeded = full(with_bids(
        job("j1", "p1", "Rebuild fence", 520),
        vec![bid("b1", "j1", "p1", "w1", 500)],
    ));
    h.engine.store().write(FeedKey::POSTER, vec![seeded], false, 1);
    h
}

fn counter(actor: &str, amount: u64) -> MutationIntent {
    MutationIntent::Counter {
        job_id: "j1".into(),
        bid_id: "b1".into(),
        actor: actor.into(),
        amount,
    }
}

fn accept(actor: &str) -> MutationIntent {
    MutationIntent::AcceptBid {
        job_id: "j1".into(),
        bid_id: "b1".into(),
        actor: actor.into(),
    }
}

fn current_bid(h: &Harness) -> marketplace_sync::Bid {
    h.engine
        .get_job(&"j1".into())
        .and_then(|j| j.find_bid(&"b1".into()).cloned())
        .unwrap()
}

#[test]
fn test_turn_derivation_follows_ledger() {
    let mut bid = bid("b1", "j1", "p1", "w1", 500);
    assert_eq!(derive_turn(&bid).actor, TurnActor::Poster);

    bid.push_turn(Role::Poster, 400, at(60)).unwrap();
    assert_eq!(derive_turn(&bid).actor, TurnActor::Worker);

    bid.status = BidStatus::Accepted;
    let turn = derive_turn(&bid);
    assert_eq!(turn.actor, TurnActor::None);
    assert!(turn.allowed_actions.is_empty());
}

#[tokio::test]
async fn test_counters_alternate_turns() {
    let h = negotiating();
    assert_eq!(h.engine.derive_turn(&current_bid(&h)).actor, TurnActor::Poster);
    assert_eq!(h.engine.get_job(&"j1".into()).unwrap().action_required, 1);

    h.engine.mutate(counter("p1", 450)).await.unwrap();
    let bid = current_bid(&h);
    assert_eq!(bid.amount, 450);
    assert_eq!(bid.negotiation.len(), 2);
    assert_eq!(bid.negotiation[1].proposed_by, Role::Poster);
    assert_eq!(h.engine.derive_turn(&bid).actor, TurnActor::Worker);
    assert_eq!(h.engine.get_job(&"j1".into()).unwrap().action_required, 0);

    h.engine.mutate(counter("w1", 475)).await.unwrap();
    let bid = current_bid(&h);
    assert_eq!(bid.amount, 475);
    assert_eq!(h.engine.derive_turn(&bid).actor, TurnActor::Poster);
    assert_eq!(h.engine.get_job(&"j1".into()).unwrap().action_required, 1);
    assert_eq!(h.backend.calls_to("update_bid"), 2);
}

#[tokio::test]
async fn test_back_to_back_counter_is_refused() {
    let h = negotiating();
    h.engine.mutate(counter("p1", 450)).await.unwrap();

    let err = h.engine.mutate(counter("p1", 440)).await.unwrap_err();

    assert!(matches!(err, SyncError::IllegalAction(_)));
    assert_eq!(current_bid(&h).negotiation.len(), 2);
    assert_eq!(h.backend.calls_to("update_bid"), 1);
}

#[tokio::test]
async fn test_counter_must_change_the_amount() {
    let h = negotiating();
    let err = h.engine.mutate(counter("p1", 500)).await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    let err = h.engine.mutate(counter("p1", 0)).await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
}

#[tokio::test]
async fn test_outsider_cannot_negotiate() {
    let h = negotiating();
    let err = h.engine.mutate(counter("w9", 450)).await.unwrap_err();
    assert!(matches!(err, SyncError::Unauthorized(_)));
}

#[tokio::test]
async fn test_failed_counter_restores_ledger() {
    let h = negotiating();
    let before = snapshot(&h.engine);
    h.backend.fail("update_bid", SyncError::Network("offline".into()));

    assert!(h.engine.mutate(counter("p1", 450)).await.is_err());

    assert_eq!(snapshot(&h.engine), before);
    assert_eq!(current_bid(&h).amount, 500);
}

#[tokio::test]
async fn test_poster_accepts_out_of_turn() {
    let h = negotiating();
    h.engine.mutate(counter("p1", 450)).await.unwrap();

    h.engine.mutate(accept("p1")).await.unwrap();

    let job = h.engine.get_job(&"j1".into()).unwrap();
    assert_eq!(job.status, JobStatus::InProgress);
    assert_eq!(current_bid(&h).status, BidStatus::Accepted);
    assert_eq!(current_bid(&h).amount, 450);
}

#[tokio::test]
async fn test_worker_accepts_only_on_their_turn() {
    let h = negotiating();
    let err = h.engine.mutate(accept("w1")).await.unwrap_err();
    assert!(matches!(err, SyncError::IllegalAction(_)));

    h.engine.mutate(counter("p1", 450)).await.unwrap();
    h.engine.mutate(accept("w1")).await.unwrap();

    assert_eq!(current_bid(&h).status, BidStatus::Accepted);
    assert_eq!(h.backend.calls_to("accept_bid"), 1);
}

#[tokio::test]
async fn test_rejected_bid_is_terminal() {
    let h = negotiating();
    h.engine
        .mutate(MutationIntent::RejectBid {
            job_id: "j1".into(),
            bid_id: "b1".into(),
            actor: "p1".into(),
        })
        .await
        .unwrap();

    let bid = current_bid(&h);
    let turn = h.engine.derive_turn(&bid);
    assert_eq!(bid.status, BidStatus::Rejected);
    assert_eq!(turn.actor, TurnActor::None);
    assert!(turn.allowed_actions.is_empty());
    for role in [Role::Poster, Role::Worker] {
        assert!(validate_action(&bid, role, NegotiationAction::Accept).is_err());
    }

    let err = h.engine.mutate(counter("w1", 480)).await.unwrap_err();
    assert!(matches!(err, SyncError::IllegalAction(_)));
    assert_eq!(h.engine.get_job(&"j1".into()).unwrap().action_required, 0);
}

#[tokio::test]
async fn test_counter_on_pending_bid_waits_for_confirmation() {
    let h = harness("w1");
    h.engine
        .store()
        .write(FeedKey::HOME_ALL, vec![job("j1", "p1", "Rebuild fence", 520)], false, 1);
    let gate = h.backend.hold("create_bid");

    let place = h.engine.mutate(MutationIntent::PlaceBid {
        job_id: "j1".into(),
        worker_id: "w1".into(),
        amount: 500,
        message: String::new(),
    });
    let early_counter = async {
        let temp_id = h.engine.get_job(&"j1".into()).unwrap().bids[0].id.clone();
        let err = h
            .engine
            .mutate(MutationIntent::Counter {
                job_id: "j1".into(),
                bid_id: temp_id,
                actor: "p1".into(),
                amount: 450,
            })
            .await
            .unwrap_err();
        gate.notify_one();
        err
    };
    let (placed, err) = tokio::join!(place, early_counter);

    placed.unwrap();
    assert!(matches!(err, SyncError::IllegalAction(_)));
    assert_eq!(h.backend.calls_to("update_bid"), 0);
}

#[tokio::test]
async fn test_pushed_counter_moves_the_turn() {
    let h = negotiating();
    let mut countered = bid("b1", "j1", "p1", "w1", 500);
    countered.push_turn(Role::Poster, 460, at(30)).unwrap();

    h.engine.apply_event(&bid_event(ChangeOp::Update, &countered)).unwrap();

    let bid = current_bid(&h);
    assert_eq!(bid.amount, 460);
    assert_eq!(h.engine.derive_turn(&bid).actor, TurnActor::Worker);
    assert_eq!(h.engine.get_job(&"j1".into()).unwrap().action_required, 0);
}

#[tokio::test]
async fn test_bid_row_without_ledger_opens_with_worker_turn() {
    let h = negotiating();
    let row = json!({
        "type": "INSERT",
        "table": "bids",
        "record": {
            "id": 77,
            "job_id": "j1",
            "worker_id": "w3",
            "amount": "420",
            "status": "pending"
        }
    });

    h.engine.apply_push(&row).unwrap();

    let job = h.engine.get_job(&"j1".into()).unwrap();
    let bid = job.find_bid(&"77".into()).unwrap();
    assert_eq!(bid.amount, 420);
    assert_eq!(bid.poster_id.as_str(), "p1");
    assert_eq!(bid.negotiation.len(), 1);
    assert_eq!(bid.negotiation[0].proposed_by, Role::Worker);
    assert_eq!(h.engine.derive_turn(bid).actor, TurnActor::Poster);
    assert_eq!(job.action_required, 2);
}
