//! Sync engine
//!
//! The presentation-facing facade. Owns the session's caches and wires the
//! sequencer, reconciler, detail cache and mutation pipeline to one backend.
//! Cache reads are synchronous; fetches and mutations are async and report
//! failures as values without touching unrelated feeds.

use crate::cache::{DetailCache, DetailCacheConfig, FeedStore};
use crate::client::Backend;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::model::{Bid, FeedCacheEntry, FeedFilters, FeedKey, FeedQuery, Job, JobId, JobPatch, UserId};
use crate::mutation::{MutationIntent, MutationPipeline, MutationReceipt};
use crate::negotiation::{self, Turn};
use crate::sync::{normalize, ChangeEvent, PushListener, Reconciled, Reconciler, RequestSequencer};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// What happened to a feed fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// Result written to the cache
    Committed { jobs: usize },
    /// A newer request for the same feed started first; result discarded
    Superseded,
    /// An identical fetch went out moments ago
    Debounced,
    /// The feed has no further pages
    Exhausted,
}

pub struct SyncEngine {
    config: SyncConfig,
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
    store: Arc<FeedStore>,
    sequencer: RequestSequencer,
    details: DetailCache,
    reconciler: Arc<Reconciler>,
    pipeline: MutationPipeline,
    filters: RwLock<HashMap<FeedKey, FeedFilters>>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, backend: Arc<dyn Backend>, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(FeedStore::new(clock.clone()));
        let details = DetailCache::new(
            DetailCacheConfig {
                ttl: config.detail_ttl(),
                reentry_guard: config.detail_reentry_guard(),
            },
            backend.clone(),
            store.clone(),
            clock.clone(),
        );
        let reconciler = Arc::new(Reconciler::new(store.clone(), clock.clone()));
        let pipeline = MutationPipeline::new(store.clone(), backend.clone(), clock.clone());

        Self {
            sequencer: RequestSequencer::new(config.feed_debounce()),
            config,
            backend,
            clock,
            store,
            details,
            reconciler,
            pipeline,
            filters: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_system_clock(config: SyncConfig, backend: Arc<dyn Backend>) -> Self {
        Self::new(config, backend, Arc::new(SystemClock))
    }

    pub fn store(&self) -> &Arc<FeedStore> {
        &self.store
    }

    pub fn details(&self) -> &DetailCache {
        &self.details
    }

    // ==================== Session ====================

    pub fn viewer(&self) -> Option<UserId> {
        self.store.viewer()
    }

    /// Start a session for `viewer`, discarding anything cached for another account
    pub fn switch_viewer(&self, viewer: UserId) {
        if self.store.viewer().as_ref() == Some(&viewer) {
            return;
        }
        self.discard_session();
        info!(viewer = %viewer, "Session started");
        self.store.set_viewer(Some(viewer));
    }

    pub fn sign_out(&self) {
        self.discard_session();
        self.store.set_viewer(None);
        info!("Session ended, caches discarded");
    }

    fn discard_session(&self) {
        // Details first, so a fetch finishing now cannot refill the cleared store
        self.details.clear();
        self.store.clear();
        self.sequencer.reset();
        self.filters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn require_viewer(&self) -> Result<UserId> {
        self.store
            .viewer()
            .ok_or_else(|| SyncError::Unauthorized("no signed-in viewer".into()))
    }

    // ==================== Reads ====================

    /// Cached feed, or `None` when it still has to be fetched
    pub fn use_feed(&self, key: FeedKey) -> Option<FeedCacheEntry> {
        self.store.read(key)
    }

    pub fn feed_error(&self, key: FeedKey) -> Option<String> {
        self.store.error(key)
    }

    pub fn get_job(&self, job_id: &JobId) -> Option<Job> {
        self.store.get_job(job_id)
    }

    pub async fn get_full_job_detail(&self, job_id: &JobId, force: bool) -> Result<Job> {
        self.details.get_full(job_id, force).await
    }

    pub fn derive_turn(&self, bid: &Bid) -> Turn {
        negotiation::derive_turn(bid)
    }

    // ==================== Fetches ====================

    /// Fetch the first page of a feed and replace what is cached
    pub async fn refresh_feed(&self, key: FeedKey, filters: FeedFilters) -> Result<FetchStatus> {
        let viewer_id = self.require_viewer()?;
        if self
            .sequencer
            .should_debounce(key, &fingerprint(&filters, 0), self.clock.now_millis())
        {
            debug!(feed = %key, "Feed fetch debounced");
            return Ok(FetchStatus::Debounced);
        }
        self.filters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, filters.clone());

        let query = FeedQuery {
            viewer_id,
            key,
            offset: 0,
            limit: self.config.page_size,
            filters,
        };
        let token = self.sequencer.begin_request(key);
        let result = self.backend.fetch_feed(&query).await;

        if !self.sequencer.is_current(key, token) {
            debug!(feed = %key, token = %token, "Discarding superseded feed result");
            return Ok(FetchStatus::Superseded);
        }
        match result {
            Ok(page) => {
                let fetched = page.jobs.len();
                let jobs = self.prepare_page(key, page.jobs, true);
                self.store.write(key, jobs, page.has_more, fetched as u32);
                Ok(FetchStatus::Committed { jobs: fetched })
            }
            Err(e) => {
                warn!(feed = %key, error = %e, "Feed fetch failed, keeping cached page");
                self.store.set_error(key, e.to_string());
                // A retry of the failed query must not be debounced
                self.sequencer.clear_debounce(key);
                Err(e)
            }
        }
    }

    /// Fetch the next page at the stored offset and append unseen jobs
    pub async fn load_more(&self, key: FeedKey) -> Result<FetchStatus> {
        let viewer_id = self.require_viewer()?;
        let entry = self
            .store
            .read(key)
            .ok_or_else(|| SyncError::NotFound(format!("feed {} has not been loaded", key)))?;
        if !entry.has_more {
            return Ok(FetchStatus::Exhausted);
        }

        let filters = self
            .filters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
            .unwrap_or_default();
        if self
            .sequencer
            .should_debounce(key, &fingerprint(&filters, entry.offset), self.clock.now_millis())
        {
            return Ok(FetchStatus::Debounced);
        }

        let query = FeedQuery {
            viewer_id,
            key,
            offset: entry.offset,
            limit: self.config.page_size,
            filters,
        };
        let token = self.sequencer.begin_request(key);
        let result = self.backend.fetch_feed(&query).await;

        if !self.sequencer.is_current(key, token) {
            debug!(feed = %key, token = %token, "Discarding superseded page");
            return Ok(FetchStatus::Superseded);
        }
        match result {
            Ok(page) => {
                let fetched = page.jobs.len();
                let jobs = self.prepare_page(key, page.jobs, false);
                self.store
                    .append(key, jobs, page.has_more, entry.offset + fetched as u32);
                Ok(FetchStatus::Committed { jobs: fetched })
            }
            Err(e) => {
                warn!(feed = %key, error = %e, "Next page fetch failed");
                self.store.set_error(key, e.to_string());
                // A retry of the failed query must not be debounced
                self.sequencer.clear_debounce(key);
                Err(e)
            }
        }
    }

    /// Merge fetched summaries over richer cached copies.
    ///
    /// With `keep_pending`, jobs still under a temporary id stay at the head
    /// unless the page already carries their confirmed counterpart.
    fn prepare_page(&self, key: FeedKey, fetched: Vec<Job>, keep_pending: bool) -> Vec<Job> {
        let now = self.clock.now();
        let mut jobs = Vec::with_capacity(fetched.len());
        for mut job in fetched {
            for bid in &mut job.bids {
                bid.normalize();
            }
            let patch = JobPatch::from(&job);
            if self.store.patch_all(&job.id, |cached| cached.merge(&patch, now)) > 0 {
                if let Some(richer) = self.store.get_job(&job.id) {
                    job = richer;
                }
            }
            jobs.push(job);
        }

        if !keep_pending {
            return jobs;
        }
        let mut pending: Vec<Job> = self
            .store
            .read(key)
            .map(|entry| entry.jobs)
            .unwrap_or_default()
            .into_iter()
            .filter(|j| j.id.is_temporary() && !jobs.iter().any(|f| f.matches_content(j)))
            .collect();
        pending.extend(jobs);
        pending
    }

    // ==================== Writes ====================

    pub async fn mutate(&self, intent: MutationIntent) -> Result<MutationReceipt> {
        self.pipeline.mutate(intent).await
    }

    /// Reconcile an already normalized change event
    pub fn apply_event(&self, event: &ChangeEvent) -> Result<Reconciled> {
        self.reconciler.apply(event)
    }

    /// Normalize and reconcile one raw push message
    pub fn apply_push(&self, raw: &Value) -> Result<Reconciled> {
        match normalize(raw)? {
            Some(event) => self.reconciler.apply(&event),
            None => Ok(Reconciled::Ignored),
        }
    }

    /// Consumer loop for the push channels, sharing this engine's caches
    pub fn push_listener(&self) -> PushListener {
        PushListener::new(self.reconciler.clone())
    }
}

fn fingerprint(filters: &FeedFilters, offset: u32) -> String {
    let filters = serde_json::to_string(filters).unwrap_or_default();
    format!("{}@{}", filters, offset)
}
