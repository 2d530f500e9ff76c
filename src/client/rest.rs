//! HTTP backend
//!
//! Feeds and entities are plain REST resources; compound transactions go
//! through `POST /rpc/{procedure}`.

use crate::client::backend::{Backend, Procedure};
use crate::config::BackendConfig;
use crate::error::{Result, SyncError};
use crate::model::{Bid, BidId, FeedKind, FeedPage, FeedQuery, Job, JobId, UserId};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Deserialize)]
struct CreatedResponse {
    id: String,
}

pub struct RestBackend {
    base_url: String,
    client: Client,
}

impl RestBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref api_key) = config.api_key {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| SyncError::Config(format!("invalid API key: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::from_status(status.as_u16(), body));
        }
        let body = response.json().await?;
        Ok(body)
    }

    async fn expect_success(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::from_status(status.as_u16(), body));
        }
        Ok(())
    }

    async fn rpc(&self, procedure: Procedure, args: serde_json::Value) -> Result<()> {
        debug!(procedure = procedure.name(), "Calling remote procedure");
        let response = self
            .client
            .post(self.url(&format!("/rpc/{}", procedure.name())))
            .json(&args)
            .send()
            .await?;
        self.expect_success(response).await
    }
}

fn feed_path(kind: FeedKind) -> &'static str {
    match kind {
        FeedKind::Home => "home",
        FeedKind::Poster => "poster",
        FeedKind::WorkerApplications => "worker_applications",
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn fetch_feed(&self, query: &FeedQuery) -> Result<FeedPage> {
        let mut params: Vec<(&str, String)> = vec![
            ("viewer_id", query.viewer_id.to_string()),
            ("offset", query.offset.to_string()),
            ("limit", query.limit.to_string()),
        ];
        if let Some(mode) = query.key.mode {
            params.push(("mode", format!("{:?}", mode).to_lowercase()));
        }
        if let Some(ref category) = query.filters.category {
            params.push(("category", category.clone()));
        }
        if let Some(ref search) = query.filters.search {
            params.push(("search", search.clone()));
        }
        if let Some(center) = query.filters.center {
            params.push(("lat", center.lat.to_string()));
            params.push(("lng", center.lng.to_string()));
        }
        if let Some(radius) = query.filters.radius_km {
            params.push(("radius_km", radius.to_string()));
        }

        let response = self
            .client
            .get(self.url(&format!("/feeds/{}", feed_path(query.key.kind))))
            .query(&params)
            .send()
            .await?;
        self.handle_response(response).await
    }

    async fn fetch_job_detail(&self, job_id: &JobId) -> Result<Job> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{}", job_id)))
            .send()
            .await?;
        self.handle_response(response).await
    }

    async fn create_job(&self, job: &Job) -> Result<JobId> {
        let response = self.client.post(self.url("/jobs")).json(job).send().await?;
        let created: CreatedResponse = self.handle_response(response).await?;
        Ok(JobId::new(created.id))
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        let response = self
            .client
            .patch(self.url(&format!("/jobs/{}", job.id)))
            .json(job)
            .send()
            .await?;
        self.expect_success(response).await
    }

    async fn create_bid(&self, bid: &Bid) -> Result<BidId> {
        let response = self.client.post(self.url("/bids")).json(bid).send().await?;
        let created: CreatedResponse = self.handle_response(response).await?;
        Ok(BidId::new(created.id))
    }

    async fn update_bid(&self, bid: &Bid) -> Result<()> {
        let response = self
            .client
            .patch(self.url(&format!("/bids/{}", bid.id)))
            .json(bid)
            .send()
            .await?;
        self.expect_success(response).await
    }

    async fn accept_bid(&self, job_id: &JobId, bid_id: &BidId) -> Result<()> {
        self.rpc(Procedure::AcceptBid, json!({ "job_id": job_id, "bid_id": bid_id }))
            .await
    }

    async fn reject_bid(&self, job_id: &JobId, bid_id: &BidId) -> Result<()> {
        self.rpc(Procedure::RejectBid, json!({ "job_id": job_id, "bid_id": bid_id }))
            .await
    }

    async fn hide_job(&self, viewer_id: &UserId, job_id: &JobId) -> Result<()> {
        self.rpc(
            Procedure::HideJobForViewer,
            json!({ "viewer_id": viewer_id, "job_id": job_id }),
        )
        .await
    }

    async fn archive_chat(&self, job_id: &JobId) -> Result<()> {
        self.rpc(Procedure::ArchiveChat, json!({ "job_id": job_id })).await
    }
}
