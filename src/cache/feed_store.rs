//! Feed cache store
//!
//! Per-view cached job lists keyed by [`FeedKey`]. The same job may sit in
//! several feeds at once; [`FeedStore::patch_all`] is the fan-out write that
//! keeps every copy identical. Fully hydrated jobs fetched through the
//! detail cache are shelved here too, so pushes patch them like any feed
//! copy. All operations are synchronous and never suspend; a miss returns
//! `None` so the caller knows to fetch.

use crate::clock::Clock;
use crate::model::{BidId, FeedCacheEntry, FeedKey, Job, JobId, JobPatch, UserId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Where a job sat in one feed, for restoring order on rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPosition {
    pub key: FeedKey,
    pub index: usize,
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<FeedKey, FeedCacheEntry>,
    /// Fetch errors for feeds with nothing cached yet
    orphan_errors: HashMap<FeedKey, String>,
    /// Fully hydrated jobs from detail fetches
    details: HashMap<JobId, Job>,
    viewer: Option<UserId>,
}

pub struct FeedStore {
    state: RwLock<StoreState>,
    clock: Arc<dyn Clock>,
}

impl FeedStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            clock,
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Viewer whose turns count toward `action_required`
    pub fn set_viewer(&self, viewer: Option<UserId>) {
        let mut state = self.write_state();
        state.viewer = viewer;
        let viewer = state.viewer.clone();
        for entry in state.entries.values_mut() {
            for job in &mut entry.jobs {
                job.refresh_counters(viewer.as_ref());
            }
        }
        for job in state.details.values_mut() {
            job.refresh_counters(viewer.as_ref());
        }
    }

    pub fn viewer(&self) -> Option<UserId> {
        self.read_state().viewer.clone()
    }

    pub fn read(&self, key: FeedKey) -> Option<FeedCacheEntry> {
        self.read_state().entries.get(&key).cloned()
    }

    pub fn keys(&self) -> Vec<FeedKey> {
        let mut keys: Vec<FeedKey> = self.read_state().entries.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Replace a feed's page list; clears any error flag
    pub fn write(&self, key: FeedKey, mut jobs: Vec<Job>, has_more: bool, offset: u32) {
        let now = self.clock.now_millis();
        let mut state = self.write_state();
        let viewer = state.viewer.clone();
        for job in &mut jobs {
            job.refresh_counters(viewer.as_ref());
        }
        debug!(feed = %key, jobs = jobs.len(), has_more, offset, "Feed written");
        state.orphan_errors.remove(&key);
        state.entries.insert(
            key,
            FeedCacheEntry {
                key,
                jobs,
                has_more,
                offset,
                last_updated: now,
                error: None,
            },
        );
    }

    /// Append a further page, skipping jobs the feed already holds
    pub fn append(&self, key: FeedKey, jobs: Vec<Job>, has_more: bool, offset: u32) {
        let existing = self.read(key);
        match existing {
            Some(mut entry) => {
                for job in jobs {
                    if !entry.contains(&job.id) {
                        entry.jobs.push(job);
                    }
                }
                self.write(key, entry.jobs, has_more, offset);
            }
            None => self.write(key, jobs, has_more, offset),
        }
    }

    /// Flag a failed fetch without touching the cached jobs
    pub fn set_error(&self, key: FeedKey, message: impl Into<String>) {
        let message = message.into();
        let mut state = self.write_state();
        match state.entries.get_mut(&key) {
            Some(entry) => entry.error = Some(message),
            None => {
                state.orphan_errors.insert(key, message);
            }
        }
    }

    pub fn error(&self, key: FeedKey) -> Option<String> {
        let state = self.read_state();
        state
            .entries
            .get(&key)
            .and_then(|e| e.error.clone())
            .or_else(|| state.orphan_errors.get(&key).cloned())
    }

    /// Apply `mutator` to every cached copy of `job_id` across all feeds.
    ///
    /// Returns the number of copies patched.
    pub fn patch_all<F>(&self, job_id: &JobId, mut mutator: F) -> usize
    where
        F: FnMut(&mut Job),
    {
        let mut state = self.write_state();
        let viewer = state.viewer.clone();
        let mut patched = 0;
        for entry in state.entries.values_mut() {
            for job in entry.jobs.iter_mut().filter(|j| &j.id == job_id) {
                mutator(job);
                job.refresh_counters(viewer.as_ref());
                patched += 1;
            }
        }
        if let Some(job) = state.details.get_mut(job_id) {
            mutator(job);
            job.refresh_counters(viewer.as_ref());
            patched += 1;
        }
        patched
    }

    /// Shelve a fully hydrated job and bring every feed copy up to it
    pub fn put_detail(&self, job: Job) {
        let patch = JobPatch::from(&job);
        let now = self.clock.now();
        self.patch_all(&job.id, |copy| copy.merge(&patch, now));

        let mut state = self.write_state();
        if state.details.contains_key(&job.id) {
            return;
        }
        // Seed from a merged feed copy so optimistic bids it holds carry over
        let mut shelved = state
            .entries
            .values()
            .flat_map(|e| e.jobs.iter())
            .find(|j| j.id == job.id)
            .cloned()
            .unwrap_or(job);
        shelved.refresh_counters(state.viewer.clone().as_ref());
        state.details.insert(shelved.id.clone(), shelved);
    }

    /// Shelved detail copy, if one was fetched
    pub fn detail(&self, job_id: &JobId) -> Option<Job> {
        self.read_state().details.get(job_id).cloned()
    }

    pub fn forget_detail(&self, job_id: &JobId) -> Option<Job> {
        self.write_state().details.remove(job_id)
    }

    /// Richest cached copy of a job (fully hydrated preferred)
    pub fn get_job(&self, job_id: &JobId) -> Option<Job> {
        let state = self.read_state();
        if let Some(job) = state.details.get(job_id) {
            return Some(job.clone());
        }
        let mut best: Option<&Job> = None;
        for job in state.entries.values().flat_map(|e| e.jobs.iter()) {
            if &job.id != job_id {
                continue;
            }
            match best {
                Some(current) if current.is_fully_hydrated() || !job.is_fully_hydrated() => {}
                _ => best = Some(job),
            }
        }
        best.cloned()
    }

    /// Held by any feed or the detail shelf
    pub fn contains_job(&self, job_id: &JobId) -> bool {
        let state = self.read_state();
        state.details.contains_key(job_id) || state.entries.values().any(|e| e.contains(job_id))
    }

    /// Every cached job id
    pub fn job_ids(&self) -> Vec<JobId> {
        let state = self.read_state();
        let mut ids: Vec<JobId> = state
            .entries
            .values()
            .flat_map(|e| e.jobs.iter().map(|j| j.id.clone()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Any cached job satisfying `predicate`
    pub fn find_job<P>(&self, mut predicate: P) -> Option<Job>
    where
        P: FnMut(&Job) -> bool,
    {
        let state = self.read_state();
        state
            .details
            .values()
            .chain(state.entries.values().flat_map(|e| e.jobs.iter()))
            .find(|j| predicate(j))
            .cloned()
    }

    /// Job holding `bid_id`, for deletes that arrive without a job id
    pub fn find_bid_owner(&self, bid_id: &BidId) -> Option<JobId> {
        self.find_job(|j| j.find_bid(bid_id).is_some()).map(|j| j.id)
    }

    /// Insert a job into one feed at `index` (clamped); no-op if the feed is not cached
    pub fn insert_job(&self, key: FeedKey, index: usize, mut job: Job) -> bool {
        let mut state = self.write_state();
        let viewer = state.viewer.clone();
        match state.entries.get_mut(&key) {
            Some(entry) if !entry.contains(&job.id) => {
                job.refresh_counters(viewer.as_ref());
                let index = index.min(entry.jobs.len());
                entry.jobs.insert(index, job);
                true
            }
            _ => false,
        }
    }

    /// Remove a job from every feed accepted by `in_feed`, reporting where it was
    pub fn remove_job_where<P>(&self, job_id: &JobId, mut in_feed: P) -> Vec<FeedPosition>
    where
        P: FnMut(FeedKey) -> bool,
    {
        let mut state = self.write_state();
        let mut positions = Vec::new();
        for (key, entry) in state.entries.iter_mut() {
            if !in_feed(*key) {
                continue;
            }
            if let Some(index) = entry.jobs.iter().position(|j| &j.id == job_id) {
                entry.jobs.remove(index);
                positions.push(FeedPosition { key: *key, index });
            }
        }
        positions.sort_by_key(|p| p.key);
        positions
    }

    pub fn remove_job(&self, job_id: &JobId) -> Vec<FeedPosition> {
        self.remove_job_where(job_id, |_| true)
    }

    /// Put a job back where it was removed from
    pub fn restore_job(&self, positions: &[FeedPosition], job: &Job) {
        for position in positions {
            self.insert_job(position.key, position.index, job.clone());
        }
    }

    /// Substitute a confirmed id for a temporary one in every feed.
    ///
    /// Where a feed already holds the confirmed job the temporary copy is
    /// dropped instead. Returns the number of feeds touched.
    pub fn rename_job(&self, temp_id: &JobId, canonical: &JobId) -> usize {
        let mut state = self.write_state();
        let mut touched = 0;
        for entry in state.entries.values_mut() {
            let Some(index) = entry.jobs.iter().position(|j| &j.id == temp_id) else {
                continue;
            };
            touched += 1;
            if entry.contains(canonical) {
                entry.jobs.remove(index);
                continue;
            }
            let job = &mut entry.jobs[index];
            job.id = canonical.clone();
            for bid in &mut job.bids {
                bid.job_id = canonical.clone();
            }
        }
        if let Some(mut job) = state.details.remove(temp_id) {
            if !state.details.contains_key(canonical) {
                job.id = canonical.clone();
                for bid in &mut job.bids {
                    bid.job_id = canonical.clone();
                }
                state.details.insert(canonical.clone(), job);
            }
            touched += 1;
        }
        if touched > 0 {
            debug!(temp_id = %temp_id, job_id = %canonical, feeds = touched, "Adopted confirmed job id");
        }
        touched
    }

    /// Substitute a confirmed bid id for a temporary one on a job
    pub fn rename_bid(&self, job_id: &JobId, temp_id: &BidId, canonical: &BidId) -> usize {
        self.patch_all(job_id, |job| {
            let has_canonical = job.find_bid(canonical).is_some();
            if has_canonical {
                job.bids.retain(|b| &b.id != temp_id);
            } else if let Some(bid) = job.find_bid_mut(temp_id) {
                bid.id = canonical.clone();
            }
            if job.accepted_bid_id.as_ref() == Some(temp_id) {
                job.accepted_bid_id = Some(canonical.clone());
            }
        })
    }

    /// Drop every feed and shelved detail; used on sign-out
    pub fn clear(&self) {
        let mut state = self.write_state();
        state.entries.clear();
        state.orphan_errors.clear();
        state.details.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{Hydration, JobStatus};

    fn job(id: &str) -> Job {
        JobPatch {
            id: id.into(),
            poster_id: Some("poster".into()),
            title: Some(format!("Job {}", id)),
            budget: Some(100),
            ..Default::default()
        }
        .to_job(chrono::Utc::now())
        .unwrap()
    }

    fn store() -> FeedStore {
        FeedStore::new(Arc::new(ManualClock::new(1_000)))
    }

    #[test]
    fn test_read_miss_is_none() {
        assert!(store().read(FeedKey::HOME_ALL).is_none());
    }

    #[test]
    fn test_patch_all_fans_out_across_feeds() {
        let store = store();
        store.write(FeedKey::HOME_ALL, vec![job("j1"), job("j2")], true, 2);
        store.write(FeedKey::POSTER, vec![job("j1")], false, 1);

        let patched = store.patch_all(&"j1".into(), |j| j.status = JobStatus::Cancelled);

        assert_eq!(patched, 2);
        for key in [FeedKey::HOME_ALL, FeedKey::POSTER] {
            let entry = store.read(key).unwrap();
            assert_eq!(entry.jobs[0].status, JobStatus::Cancelled);
        }
        assert_eq!(store.read(FeedKey::HOME_ALL).unwrap().jobs[1].status, JobStatus::Open);
    }

    #[test]
    fn test_remove_and_restore_keeps_order() {
        let store = store();
        store.write(FeedKey::HOME_ALL, vec![job("j1"), job("j2"), job("j3")], false, 3);
        let removed = store.get_job(&"j2".into()).unwrap();

        let positions = store.remove_job(&"j2".into());
        store.restore_job(&positions, &removed);

        let ids: Vec<String> = store
            .read(FeedKey::HOME_ALL)
            .unwrap()
            .jobs
            .iter()
            .map(|j| j.id.to_string())
            .collect();
        assert_eq!(ids, vec!["j1", "j2", "j3"]);
    }

    #[test]
    fn test_rename_job_drops_temp_when_canonical_present() {
        let store = store();
        store.write(FeedKey::POSTER, vec![job("temp_5"), job("j9")], false, 2);
        store.write(FeedKey::HOME_ALL, vec![job("temp_5")], false, 1);

        store.rename_job(&"temp_5".into(), &"j9".into());

        assert_eq!(store.read(FeedKey::POSTER).unwrap().jobs.len(), 1);
        assert_eq!(store.read(FeedKey::HOME_ALL).unwrap().jobs[0].id, JobId::from("j9"));
    }

    #[test]
    fn test_put_detail_hydrates_feed_copies() {
        let store = store();
        store.write(FeedKey::HOME_ALL, vec![job("j1")], false, 1);

        let mut full = job("j1");
        full.description = "Full text".into();
        full.hydration = Hydration::Full;
        store.put_detail(full);

        let feed_copy = &store.read(FeedKey::HOME_ALL).unwrap().jobs[0];
        assert_eq!(feed_copy.description, "Full text");
        assert!(feed_copy.is_fully_hydrated());
        assert!(store.get_job(&"j1".into()).unwrap().is_fully_hydrated());
    }

    #[test]
    fn test_error_flag_retains_last_good_jobs() {
        let store = store();
        store.set_error(FeedKey::POSTER, "offline");
        assert_eq!(store.error(FeedKey::POSTER).as_deref(), Some("offline"));

        store.write(FeedKey::POSTER, vec![job("j1")], false, 1);
        assert_eq!(store.error(FeedKey::POSTER), None);

        store.set_error(FeedKey::POSTER, "timeout");
        let entry = store.read(FeedKey::POSTER).unwrap();
        assert_eq!(entry.jobs.len(), 1);
        assert_eq!(entry.error.as_deref(), Some("timeout"));
    }
}
