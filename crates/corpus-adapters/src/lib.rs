//! Collaborator contracts around the candidate pipeline + their implementations.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use corpus_core::{ApprovedItem, CandidateEvent, UrlMetadata};
use corpus_http::{parse_http_url, FetchError, HttpFetcher, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "corpus-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("no metadata for {0}")]
    NotFound(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Looks up parser metadata for a URL.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn url_metadata(&self, url: &str) -> Result<UrlMetadata, AdapterError>;
}

/// Confirms an image URL resolves to an image; `None` when it does not.
#[async_trait]
pub trait ImageValidator: Send + Sync {
    async fn validate_image_url(&self, url: &str) -> Option<String>;
}

#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn emit(&self, event: &CandidateEvent) -> Result<(), AdapterError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub approved_item_external_id: String,
    pub scheduled_item_external_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{url} is already scheduled on {surface_guid} for {scheduled_date}")]
    AlreadyScheduled {
        url: String,
        surface_guid: String,
        scheduled_date: String,
    },
    #[error("submission rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Downstream "create approved item and schedule it" seam.
#[async_trait]
pub trait ItemSink: Send + Sync {
    async fn submit(&self, item: &ApprovedItem) -> Result<SubmitReceipt, SubmitError>;
}

/// Parser-service lookup: `GET {endpoint}?url=<item url>` returning [`UrlMetadata`] JSON.
pub struct HttpMetadataSource {
    http: Arc<HttpFetcher>,
    endpoint: Url,
}

impl HttpMetadataSource {
    pub fn new(http: Arc<HttpFetcher>, endpoint: &str) -> Result<Self, AdapterError> {
        Ok(Self {
            http,
            endpoint: parse_http_url(endpoint)?,
        })
    }

    pub fn lookup_url(&self, url: &str) -> Url {
        let mut lookup = self.endpoint.clone();
        lookup.query_pairs_mut().append_pair("url", url);
        lookup
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn url_metadata(&self, url: &str) -> Result<UrlMetadata, AdapterError> {
        Ok(self.http.get_json(&self.lookup_url(url)).await?)
    }
}

/// Metadata keyed by URL from a JSON fixture file.
#[derive(Debug, Clone, Default)]
pub struct FixtureMetadataSource {
    entries: BTreeMap<String, UrlMetadata>,
}

impl FixtureMetadataSource {
    pub fn new(entries: BTreeMap<String, UrlMetadata>) -> Self {
        Self { entries }
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let entries = serde_json::from_str(&data)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Self { entries })
    }
}

#[async_trait]
impl MetadataSource for FixtureMetadataSource {
    async fn url_metadata(&self, url: &str) -> Result<UrlMetadata, AdapterError> {
        self.entries
            .get(url)
            .cloned()
            .ok_or_else(|| AdapterError::NotFound(url.to_string()))
    }
}

/// Probes images directly, or through an image proxy (`{proxy}?url=<image>`) when configured.
pub struct ProxyImageValidator {
    http: Arc<HttpFetcher>,
    proxy: Option<Url>,
}

impl ProxyImageValidator {
    pub fn new(http: Arc<HttpFetcher>, proxy: Option<&str>) -> Result<Self, AdapterError> {
        let proxy = proxy.map(parse_http_url).transpose()?;
        Ok(Self { http, proxy })
    }

    pub fn probe_url(&self, image_url: &str) -> String {
        match &self.proxy {
            Some(proxy) => {
                let mut probe = proxy.clone();
                probe.query_pairs_mut().append_pair("url", image_url);
                probe.to_string()
            }
            None => image_url.to_string(),
        }
    }
}

#[async_trait]
impl ImageValidator for ProxyImageValidator {
    async fn validate_image_url(&self, url: &str) -> Option<String> {
        if let Err(err) = parse_http_url(url) {
            warn!(error = %err, "image url is not fetchable");
            return None;
        }
        match self.http.probe(&self.probe_url(url)).await {
            Ok(probe) if probe.is_image() => Some(url.to_string()),
            Ok(probe) => {
                warn!(
                    url,
                    status = probe.status.as_u16(),
                    content_type = probe.content_type.as_deref().unwrap_or("<none>"),
                    "image probe did not return an image"
                );
                None
            }
            Err(err) => {
                warn!(url, error = %err, "image probe failed");
                None
            }
        }
    }
}

/// Accepts any syntactically valid http(s) image URL without a network call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughImageValidator;

#[async_trait]
impl ImageValidator for PassthroughImageValidator {
    async fn validate_image_url(&self, url: &str) -> Option<String> {
        parse_http_url(url).ok().map(|_| url.to_string())
    }
}

/// Writes events to the `corpus_events` tracing target as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventEmitter;

#[async_trait]
impl EventEmitter for TracingEventEmitter {
    async fn emit(&self, event: &CandidateEvent) -> Result<(), AdapterError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| AdapterError::Message(format!("serializing event: {e}")))?;
        info!(target: "corpus_events", candidate_id = %event.candidate_id, %payload, "candidate event");
        Ok(())
    }
}

pub fn approved_item_external_id(url: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes()).to_string()
}

pub fn scheduled_item_external_id(item: &ApprovedItem) -> String {
    let key = format!(
        "{}:{}:{}",
        item.scheduled_surface_guid, item.scheduled_date, item.url
    );
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

/// Appends approved items to a JSON-lines file, refusing the same
/// url/surface/date twice the way the curation API does.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    scheduled: Mutex<HashSet<(String, String, String)>>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            scheduled: Mutex::new(HashSet::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ItemSink for JsonLinesSink {
    async fn submit(&self, item: &ApprovedItem) -> Result<SubmitReceipt, SubmitError> {
        let key = (
            item.url.clone(),
            item.scheduled_surface_guid.clone(),
            item.scheduled_date.clone(),
        );
        let mut scheduled = self.scheduled.lock().await;
        if scheduled.contains(&key) {
            return Err(SubmitError::AlreadyScheduled {
                url: key.0,
                surface_guid: key.1,
                scheduled_date: key.2,
            });
        }

        let mut line = serde_json::to_vec(item).context("serializing approved item")?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(&line)
            .await
            .with_context(|| format!("appending to {}", self.path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing {}", self.path.display()))?;

        scheduled.insert(key);
        Ok(SubmitReceipt {
            approved_item_external_id: approved_item_external_id(&item.url),
            scheduled_item_external_id: Some(scheduled_item_external_id(item)),
        })
    }
}
