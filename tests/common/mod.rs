//! Shared fixtures for integration tests
//!
//! `MockBackend` records every call, can be told to fail a method, and can
//! hold the next call to a method behind a `Notify` gate so a test decides
//! when its response lands.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use marketplace_sync::client::Backend;
use marketplace_sync::sync::ChangeOp;
use marketplace_sync::{
    Bid, BidId, ChangeEvent, Clock, FeedCacheEntry, FeedKey, FeedPage, FeedQuery, Hydration, Job,
    JobId, JobPatch, ManualClock, Result, SyncConfig, SyncEngine, SyncError, UserId,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

pub const START_MILLIS: u64 = 1_700_000_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: &'static str,
    pub target: String,
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    feeds: HashMap<FeedKey, VecDeque<FeedPage>>,
    details: HashMap<JobId, Job>,
    failures: HashMap<&'static str, SyncError>,
    gates: HashMap<&'static str, VecDeque<Arc<Notify>>>,
    next_ids: VecDeque<String>,
    id_seq: u64,
    queries: Vec<FeedQuery>,
}

#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Queue a page for the next fetch of `key`; the last page repeats
    pub fn push_feed(&self, key: FeedKey, jobs: Vec<Job>, has_more: bool) {
        self.lock()
            .feeds
            .entry(key)
            .or_default()
            .push_back(FeedPage { jobs, has_more });
    }

    pub fn set_detail(&self, job: Job) {
        self.lock().details.insert(job.id.clone(), job);
    }

    /// Every call to `method` fails with `err` until cleared
    pub fn fail(&self, method: &'static str, err: SyncError) {
        self.lock().failures.insert(method, err);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Hold the next call to `method` until the returned gate is notified
    pub fn hold(&self, method: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock()
            .gates
            .entry(method)
            .or_default()
            .push_back(gate.clone());
        gate
    }

    /// Canonical id handed out by the next create call
    pub fn next_id(&self, id: &str) {
        self.lock().next_ids.push_back(id.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.method == method).count()
    }

    pub fn queries(&self) -> Vec<FeedQuery> {
        self.lock().queries.clone()
    }

    fn next_page(&self, key: FeedKey) -> FeedPage {
        let mut state = self.lock();
        match state.feeds.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => FeedPage::default(),
        }
    }

    fn mint_id(&self) -> String {
        let mut state = self.lock();
        match state.next_ids.pop_front() {
            Some(id) => id,
            None => {
                state.id_seq += 1;
                format!("srv_{}", state.id_seq)
            }
        }
    }

    async fn enter(&self, method: &'static str, target: impl Into<String>) -> Result<()> {
        let (gate, failure) = {
            let mut state = self.lock();
            state.calls.push(Call {
                method,
                target: target.into(),
            });
            let gate = state.gates.get_mut(method).and_then(|q| q.pop_front());
            (gate, state.failures.get(method).cloned())
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn fetch_feed(&self, query: &FeedQuery) -> Result<FeedPage> {
        let page = self.next_page(query.key);
        self.lock().queries.push(query.clone());
        self.enter("fetch_feed", query.key.to_string()).await?;
        Ok(page)
    }

    async fn fetch_job_detail(&self, job_id: &JobId) -> Result<Job> {
        let job = self.lock().details.get(job_id).cloned();
        self.enter("fetch_job_detail", job_id.to_string()).await?;
        job.ok_or_else(|| SyncError::NotFound(format!("job {}", job_id)))
    }

    async fn create_job(&self, job: &Job) -> Result<JobId> {
        self.enter("create_job", job.id.to_string()).await?;
        Ok(JobId::new(self.mint_id()))
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        self.enter("update_job", job.id.to_string()).await
    }

    async fn create_bid(&self, bid: &Bid) -> Result<BidId> {
        self.enter("create_bid", bid.id.to_string()).await?;
        Ok(BidId::new(self.mint_id()))
    }

    async fn update_bid(&self, bid: &Bid) -> Result<()> {
        self.enter("update_bid", bid.id.to_string()).await
    }

    async fn accept_bid(&self, _job_id: &JobId, bid_id: &BidId) -> Result<()> {
        self.enter("accept_bid", bid_id.to_string()).await
    }

    async fn reject_bid(&self, _job_id: &JobId, bid_id: &BidId) -> Result<()> {
        self.enter("reject_bid", bid_id.to_string()).await
    }

    async fn hide_job(&self, _viewer_id: &UserId, job_id: &JobId) -> Result<()> {
        self.enter("hide_job", job_id.to_string()).await
    }

    async fn archive_chat(&self, job_id: &JobId) -> Result<()> {
        self.enter("archive_chat", job_id.to_string()).await
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
}

/// Open, partially hydrated job as a feed would return it
pub fn job(id: &str, poster: &str, title: &str, budget: u64) -> Job {
    JobPatch {
        id: id.into(),
        poster_id: Some(poster.into()),
        title: Some(title.into()),
        budget: Some(budget),
        created_at: Some(at(0)),
        ..Default::default()
    }
    .to_job(at(0))
    .unwrap()
}

pub fn full(mut job: Job) -> Job {
    job.hydration = Hydration::Full;
    job
}

pub fn bid(id: &str, job_id: &str, poster: &str, worker: &str, amount: u64) -> Bid {
    Bid::new(id.into(), job_id.into(), poster.into(), worker.into(), amount, "", at(1))
}

pub fn with_bids(mut job: Job, bids: Vec<Bid>) -> Job {
    for bid in bids {
        job.place_bid(bid);
    }
    job
}

pub struct Harness {
    pub engine: SyncEngine,
    pub backend: Arc<MockBackend>,
    pub clock: Arc<ManualClock>,
}

pub fn harness(viewer: &str) -> Harness {
    let backend = MockBackend::new();
    let clock = Arc::new(ManualClock::new(START_MILLIS));
    let engine = SyncEngine::new(
        SyncConfig::default(),
        backend.clone() as Arc<dyn Backend>,
        clock.clone() as Arc<dyn Clock>,
    );
    engine.switch_viewer(viewer.into());
    Harness {
        engine,
        backend,
        clock,
    }
}

/// Every cached feed plus shelved details, for whole-cache comparisons
pub fn snapshot(engine: &SyncEngine) -> (Vec<FeedCacheEntry>, Vec<Option<Job>>) {
    let store = engine.store();
    let feeds: Vec<FeedCacheEntry> = store.keys().into_iter().filter_map(|k| store.read(k)).collect();
    let details = store.job_ids().iter().map(|id| store.detail(id)).collect();
    (feeds, details)
}

pub fn feed_ids(engine: &SyncEngine, key: FeedKey) -> Vec<String> {
    engine
        .use_feed(key)
        .map(|entry| entry.jobs.iter().map(|j| j.id.to_string()).collect())
        .unwrap_or_default()
}

pub fn bid_event(op: ChangeOp, bid: &Bid) -> ChangeEvent {
    ChangeEvent::bid(op, bid.into())
}

pub fn job_event(op: ChangeOp, job: &Job) -> ChangeEvent {
    ChangeEvent::job(op, job.into())
}
