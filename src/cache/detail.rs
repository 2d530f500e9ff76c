//! Detail-fetch cache
//!
//! Time-boxed cache in front of the expensive full job fetch (bids and
//! reviews).
//!
//! - A fetch that completed within `ttl` is served from cache unless forced
//! - A fetch that completed within `reentry_guard` is served from cache even
//!   when forced, absorbing UI event storms
//! - Concurrent callers for the same job share one in-flight request
//! - A fetch started before [`DetailCache::clear`] never lands in the store
//!
//! Fetched jobs are shelved in the [`FeedStore`] so push events keep them
//! current; this cache only tracks timing and in-flight requests.

use crate::cache::FeedStore;
use crate::client::Backend;
use crate::clock::Clock;
use crate::error::{Result, SyncError};
use crate::model::{Hydration, Job, JobId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct DetailCacheConfig {
    /// Window in which a non-forced call is answered from cache
    pub ttl: Duration,
    /// Window in which even a forced call is answered from cache
    pub reentry_guard: Duration,
}

impl Default for DetailCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            reentry_guard: Duration::from_millis(500),
        }
    }
}

struct InFlight {
    id: u64,
    sender: broadcast::Sender<Result<Job>>,
}

#[derive(Default)]
struct DetailState {
    /// Unix millis of the last successful fetch per job
    last_fetched_at: HashMap<JobId, u64>,
    in_flight: HashMap<JobId, InFlight>,
    /// Bumped on every clear; a fetch from an older epoch is discarded
    epoch: u64,
    next_fetch_id: u64,
}

/// Ticket held by the caller that leads a fetch
struct Lead {
    epoch: u64,
    fetch_id: u64,
    sender: broadcast::Sender<Result<Job>>,
}

pub struct DetailCache {
    config: DetailCacheConfig,
    backend: Arc<dyn Backend>,
    store: Arc<FeedStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<DetailState>,
}

enum Lookup {
    Cached(Job),
    Wait(broadcast::Receiver<Result<Job>>),
    Fetch(Lead),
}

/// Removes the leader's in-flight entry even when its future is dropped
/// mid-fetch, so later callers start a fresh request.
struct InFlightGuard<'a> {
    cache: &'a DetailCache,
    job_id: &'a JobId,
    fetch_id: u64,
    armed: bool,
}

impl InFlightGuard<'_> {
    fn release(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        let mut state = self.cache.lock();
        if state.in_flight.get(self.job_id).map(|f| f.id) == Some(self.fetch_id) {
            state.in_flight.remove(self.job_id);
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl DetailCache {
    pub fn new(
        config: DetailCacheConfig,
        backend: Arc<dyn Backend>,
        store: Arc<FeedStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            backend,
            store,
            clock,
            state: Mutex::new(DetailState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DetailState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fully hydrated job, fetched at most once per freshness window
    pub async fn get_full(&self, job_id: &JobId, force: bool) -> Result<Job> {
        loop {
            match self.lookup(job_id, force) {
                Lookup::Cached(job) => {
                    debug!(job_id = %job_id, force, "Detail served from cache");
                    return Ok(job);
                }
                Lookup::Wait(mut receiver) => {
                    debug!(job_id = %job_id, "Joining in-flight detail fetch");
                    match receiver.recv().await {
                        Ok(result) => return result,
                        Err(RecvError::Closed) | Err(RecvError::Lagged(_)) => {
                            debug!(job_id = %job_id, "In-flight detail fetch abandoned, retrying");
                        }
                    }
                }
                Lookup::Fetch(lead) => {
                    let mut guard = InFlightGuard {
                        cache: self,
                        job_id,
                        fetch_id: lead.fetch_id,
                        armed: true,
                    };
                    let result = self.fetch(job_id, lead.epoch).await;
                    guard.release();
                    // Receivers may have gone away
                    let _ = lead.sender.send(result.clone());
                    return result;
                }
            }
        }
    }

    fn lookup(&self, job_id: &JobId, force: bool) -> Lookup {
        let now = self.clock.now_millis();
        let mut state = self.lock();

        if let Some(fetched_at) = state.last_fetched_at.get(job_id).copied() {
            let age = Duration::from_millis(now.saturating_sub(fetched_at));
            let fresh = age < self.config.reentry_guard || (!force && age < self.config.ttl);
            if fresh {
                if let Some(job) = self.store.detail(job_id) {
                    return Lookup::Cached(job);
                }
            }
        }

        if let Some(in_flight) = state.in_flight.get(job_id) {
            return Lookup::Wait(in_flight.sender.subscribe());
        }

        state.next_fetch_id += 1;
        let fetch_id = state.next_fetch_id;
        let (sender, _) = broadcast::channel(1);
        state.in_flight.insert(
            job_id.clone(),
            InFlight {
                id: fetch_id,
                sender: sender.clone(),
            },
        );
        Lookup::Fetch(Lead {
            epoch: state.epoch,
            fetch_id,
            sender,
        })
    }

    async fn fetch(&self, job_id: &JobId, epoch: u64) -> Result<Job> {
        match self.backend.fetch_job_detail(job_id).await {
            Ok(mut job) => {
                job.hydration = Hydration::Full;
                for bid in &mut job.bids {
                    bid.normalize();
                }
                {
                    // Held across the store write so a clear cannot slip in between
                    let mut state = self.lock();
                    if state.epoch != epoch {
                        debug!(job_id = %job_id, "Session changed during detail fetch, discarding");
                        return Err(SyncError::Unauthorized(format!(
                            "session changed while fetching job {}",
                            job_id
                        )));
                    }
                    self.store.put_detail(job);
                    state
                        .last_fetched_at
                        .insert(job_id.clone(), self.clock.now_millis());
                }
                self.store
                    .detail(job_id)
                    .ok_or_else(|| SyncError::NotFound(format!("job {} vanished during fetch", job_id)))
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Detail fetch failed, keeping cached copy");
                Err(e)
            }
        }
    }

    /// Force the next call to hit the backend
    pub fn invalidate(&self, job_id: &JobId) {
        self.lock().last_fetched_at.remove(job_id);
    }

    pub fn last_fetched_at(&self, job_id: &JobId) -> Option<u64> {
        self.lock().last_fetched_at.get(job_id).copied()
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Drop timing and in-flight state and orphan running fetches; used on sign-out
    pub fn clear(&self) {
        let mut state = self.lock();
        state.epoch += 1;
        state.last_fetched_at.clear();
        state.in_flight.clear();
    }
}
