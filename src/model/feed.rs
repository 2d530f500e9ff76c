//! Feed identities and cached pages

use crate::model::ids::UserId;
use crate::model::job::{Coordinates, Job};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedKind {
    /// Jobs near the worker
    Home,
    /// Jobs the viewer posted
    Poster,
    /// Jobs the viewer has bid on
    WorkerApplications,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedMode {
    Recommended,
    All,
}

/// Cache key: `HOME:RECOMMENDED`, `HOME:ALL`, `POSTER`, `WORKER_APPLICATIONS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedKey {
    pub kind: FeedKind,
    pub mode: Option<FeedMode>,
}

impl FeedKey {
    pub const HOME_RECOMMENDED: FeedKey = FeedKey::new(FeedKind::Home, Some(FeedMode::Recommended));
    pub const HOME_ALL: FeedKey = FeedKey::new(FeedKind::Home, Some(FeedMode::All));
    pub const POSTER: FeedKey = FeedKey::new(FeedKind::Poster, None);
    pub const WORKER_APPLICATIONS: FeedKey = FeedKey::new(FeedKind::WorkerApplications, None);

    pub const fn new(kind: FeedKind, mode: Option<FeedMode>) -> Self {
        Self { kind, mode }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "HOME:RECOMMENDED" => Some(Self::HOME_RECOMMENDED),
            "HOME:ALL" | "HOME" => Some(Self::HOME_ALL),
            "POSTER" => Some(Self::POSTER),
            "WORKER_APPLICATIONS" => Some(Self::WORKER_APPLICATIONS),
            _ => None,
        }
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FeedKind::Home => "HOME",
            FeedKind::Poster => "POSTER",
            FeedKind::WorkerApplications => "WORKER_APPLICATIONS",
        };
        match self.mode {
            Some(FeedMode::Recommended) => write!(f, "{}:RECOMMENDED", kind),
            Some(FeedMode::All) => write!(f, "{}:ALL", kind),
            None => f.write_str(kind),
        }
    }
}

/// Feed filters passed through to the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub center: Option<Coordinates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius_km: Option<f64>,
}

impl FeedFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn near(mut self, center: Coordinates, radius_km: f64) -> Self {
        self.center = Some(center);
        self.radius_km = Some(radius_km);
        self
    }
}

/// One page request to the backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedQuery {
    pub viewer_id: UserId,
    pub key: FeedKey,
    pub offset: u32,
    pub limit: u32,
    pub filters: FeedFilters,
}

/// One page answered by the backend; summaries may omit bids
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedPage {
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub has_more: bool,
}

/// Cached paginated view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedCacheEntry {
    pub key: FeedKey,
    pub jobs: Vec<Job>,
    pub has_more: bool,
    /// Offset of the next page
    pub offset: u32,
    /// Unix millis of the last committed write
    pub last_updated: u64,
    /// Set when the last fetch failed; the jobs are the last good page
    pub error: Option<String>,
}

impl FeedCacheEntry {
    pub fn contains(&self, job_id: &crate::model::JobId) -> bool {
        self.jobs.iter().any(|j| &j.id == job_id)
    }
}
