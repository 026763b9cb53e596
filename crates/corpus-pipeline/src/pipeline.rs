use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use corpus_adapters::{
    EventEmitter, HttpMetadataSource, ImageValidator, ItemSink, MetadataSource,
    ProxyImageValidator, SubmitReceipt, TracingEventEmitter,
};
use corpus_core::{ApprovedItem, Candidate, CandidateEvent, UrlMetadata};
use corpus_http::HttpFetcher;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::batch::{self, parse_batch, record_label, BatchError, BatchOutcome};
use crate::config::{PipelineConfig, PipelineSettings};
use crate::error::CandidateError;
use crate::events::{emit_quietly, failure_event, success_event};
use crate::reconcile::reconcile;
use crate::schedule::{check_domain_allowed, validate_scheduled_date, Clock, SystemClock};
use crate::structure::{validate_structure, FieldIssue, StructuralError};

/// A candidate that passed the checks that need no network access.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedCandidate {
    pub candidate: Candidate,
    /// RFC 3339 go-live instant on the surface, in surface-local time.
    pub publish_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedCandidate {
    pub item: ApprovedItem,
    pub receipt: Option<SubmitReceipt>,
}

/// Validates, reconciles and submits candidate records one at a time.
///
/// Collaborators are injected; nothing here is process-global.
pub struct CandidatePipeline {
    settings: PipelineSettings,
    metadata: Arc<dyn MetadataSource>,
    images: Arc<dyn ImageValidator>,
    events: Arc<dyn EventEmitter>,
    sink: Option<Arc<dyn ItemSink>>,
    clock: Arc<dyn Clock>,
}

impl CandidatePipeline {
    pub fn new(
        settings: PipelineSettings,
        metadata: Arc<dyn MetadataSource>,
        images: Arc<dyn ImageValidator>,
        events: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            settings,
            metadata,
            images,
            events,
            sink: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Pipeline wired to the parser service and image proxy named in `config`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let settings = config.load_settings()?;
        let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
        let endpoint = config
            .parser_endpoint
            .as_deref()
            .context("PARSER_ENDPOINT is not set")?;
        let metadata = HttpMetadataSource::new(http.clone(), endpoint)
            .with_context(|| format!("configuring parser endpoint {endpoint}"))?;
        let images = ProxyImageValidator::new(http, config.image_proxy_endpoint.as_deref())
            .context("configuring image proxy")?;
        Ok(Self::new(
            settings,
            Arc::new(metadata),
            Arc::new(images),
            Arc::new(TracingEventEmitter),
        ))
    }

    pub fn with_sink(mut self, sink: Arc<dyn ItemSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Structure, domain and lead-time checks. Runs before any network I/O.
    pub fn validate_candidate(&self, raw: &Value) -> Result<ValidatedCandidate, CandidateError> {
        let candidate = validate_structure(
            raw,
            self.settings.expected_source,
            &self.settings.catalogue,
        )?;
        let surface = self
            .settings
            .catalogue
            .get(&candidate.surface_guid)
            .ok_or_else(|| StructuralError {
                candidate_id: Some(candidate.candidate_id.clone()),
                issues: vec![FieldIssue {
                    path: "$input.scheduled_corpus_item.scheduled_surface_guid".to_string(),
                    expected: "known scheduled surface".to_string(),
                    found: candidate.surface_guid.clone(),
                }],
            })?;

        check_domain_allowed(&candidate.url, surface)?;
        if self.settings.enable_scheduled_date_validation {
            validate_scheduled_date(Some(&candidate.scheduled_date), surface, self.clock.now())?;
        } else {
            debug!(candidate_id = %candidate.candidate_id, "scheduled date validation disabled");
        }

        let publish_at = NaiveDate::parse_from_str(&candidate.scheduled_date, "%Y-%m-%d")
            .ok()
            .and_then(|date| surface.publish_at(date))
            .map(|at| at.to_rfc3339());
        Ok(ValidatedCandidate {
            candidate,
            publish_at,
        })
    }

    async fn lookup_metadata(&self, url: &str) -> UrlMetadata {
        match self.metadata.url_metadata(url).await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(url, error = %err, "url metadata unavailable, using candidate fields only");
                UrlMetadata::default()
            }
        }
    }

    async fn process_validated(
        &self,
        validated: ValidatedCandidate,
    ) -> Result<ProcessedCandidate, CandidateError> {
        let candidate = validated.candidate;
        let metadata = self.lookup_metadata(&candidate.url).await;
        let item = reconcile(
            &candidate,
            &metadata,
            self.images.as_ref(),
            &self.settings.caser,
        )
        .await?;
        let receipt = match &self.sink {
            Some(sink) => Some(sink.submit(&item).await?),
            None => None,
        };
        info!(
            surface = %item.scheduled_surface_guid,
            scheduled_date = %item.scheduled_date,
            publish_at = validated.publish_at.as_deref().unwrap_or("-"),
            "candidate approved"
        );
        Ok(ProcessedCandidate { item, receipt })
    }

    /// Full path for one record: validate, reconcile, submit, emit telemetry.
    pub async fn process_record(&self, raw: Value) -> Result<ProcessedCandidate, CandidateError> {
        self.process_record_at(raw, None).await
    }

    async fn process_record_at(
        &self,
        raw: Value,
        index: Option<usize>,
    ) -> Result<ProcessedCandidate, CandidateError> {
        let candidate_id = record_label(&raw, index);
        let span = info_span!("candidate", candidate_id = %candidate_id);
        async {
            let result = match self.validate_candidate(&raw) {
                Ok(validated) => self.process_validated(validated).await,
                Err(err) => Err(err),
            };
            let now = self.clock.now();
            let event: Option<CandidateEvent> = match &result {
                Ok(processed) => Some(match &processed.receipt {
                    Some(receipt) => success_event(&candidate_id, receipt, now),
                    None => CandidateEvent::success(&candidate_id, None, None, now),
                }),
                Err(err) => failure_event(&candidate_id, err, now),
            };
            if let Some(event) = event {
                emit_quietly(self.events.as_ref(), &event).await;
            }
            result
        }
        .instrument(span)
        .await
    }

    pub async fn process_batch(&self, records: Vec<Value>) -> BatchOutcome<ProcessedCandidate> {
        let mut next_index = 0;
        let outcome = batch::process_batch(records, |record| {
            let index = next_index;
            next_index += 1;
            self.process_record_at(record, Some(index))
        })
        .await;
        let summary = outcome.summary();
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "candidate batch processed"
        );
        outcome
    }

    /// Parse a raw payload and process every record in it. Only an unparseable
    /// payload fails as a whole.
    pub async fn process_payload(
        &self,
        payload: &str,
    ) -> Result<BatchOutcome<ProcessedCandidate>, BatchError> {
        let records = parse_batch(payload)?;
        Ok(self.process_batch(records).await)
    }

    /// Run only the offline checks over a batch.
    pub async fn validate_batch(&self, records: Vec<Value>) -> BatchOutcome<ValidatedCandidate> {
        batch::process_batch(records, |record| {
            std::future::ready(self.validate_candidate(&record))
        })
        .await
    }
}
