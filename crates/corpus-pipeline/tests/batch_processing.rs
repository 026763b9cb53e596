use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use corpus_adapters::{
    AdapterError, EventEmitter, FixtureMetadataSource, ImageValidator, JsonLinesSink,
    MetadataSource, PassthroughImageValidator,
};
use corpus_core::{
    Author, CandidateErrorName, CandidateEvent, CandidateEventKind, CorpusLanguage, UrlMetadata,
};
use corpus_pipeline::{
    CandidateError, CandidatePipeline, ErrorCategory, FixedClock, PipelineSettings,
    ReconciliationError, SchedulingError,
};
use serde_json::{json, Value};
use tempfile::tempdir;

#[derive(Default)]
struct RecordingEmitter {
    events: Mutex<Vec<CandidateEvent>>,
}

impl RecordingEmitter {
    fn events(&self) -> Vec<CandidateEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventEmitter for RecordingEmitter {
    async fn emit(&self, event: &CandidateEvent) -> Result<(), AdapterError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct BrokenEmitter;

#[async_trait]
impl EventEmitter for BrokenEmitter {
    async fn emit(&self, _event: &CandidateEvent) -> Result<(), AdapterError> {
        Err(AdapterError::Message("event bus unreachable".into()))
    }
}

struct UnreachableParser;

#[async_trait]
impl MetadataSource for UnreachableParser {
    async fn url_metadata(&self, url: &str) -> Result<UrlMetadata, AdapterError> {
        Err(AdapterError::Message(format!("timed out fetching {url}")))
    }
}

/// Rejects the listed image urls, accepts everything else.
struct ImageBlocklist(HashSet<String>);

#[async_trait]
impl ImageValidator for ImageBlocklist {
    async fn validate_image_url(&self, url: &str) -> Option<String> {
        (!self.0.contains(url)).then(|| url.to_string())
    }
}

const STORY_URL: &str = "https://www.example.com/2026/02/27/a-random-story";
const STORY_IMAGE: &str = "https://images.example.com/story.jpg";

fn now() -> DateTime<Utc> {
    // Sunday 2026-03-01, 12:00 UTC.
    DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn record(id: &str, url: &str) -> Value {
    json!({
        "scheduled_corpus_candidate_id": id,
        "scheduled_corpus_item": {
            "url": url,
            "status": "RECOMMENDATION",
            "source": "ML",
            "topic": "TECHNOLOGY",
            "scheduled_date": "2026-03-03",
            "scheduled_surface_guid": "NEW_TAB_EN_US",
            "title": null,
            "excerpt": null,
            "language": null,
            "image_url": null,
            "authors": null
        },
        "features": {"rank": 3, "model": "ml-v2"},
        "run_details": {"flow": "scheduler", "run_id": "r-1"}
    })
}

fn metadata() -> FixtureMetadataSource {
    let mut entries = BTreeMap::new();
    entries.insert(
        STORY_URL.to_string(),
        UrlMetadata {
            title: Some("a random String to format! random-string:Random!".into()),
            excerpt: Some("It's a \"story\" about things".into()),
            image_url: Some(STORY_IMAGE.into()),
            publisher: Some("Example".into()),
            language: Some("en".into()),
            authors: Some("Ada Lovelace,Grace Hopper".into()),
            is_collection: Some(false),
            is_syndicated: Some(false),
            date_published: Some("2026-02-27T10:00:00Z".into()),
        },
    );
    FixtureMetadataSource::new(entries)
}

fn pipeline_with(
    settings: PipelineSettings,
    metadata: Arc<dyn MetadataSource>,
    images: Arc<dyn ImageValidator>,
    events: Arc<dyn EventEmitter>,
) -> CandidatePipeline {
    CandidatePipeline::new(settings, metadata, images, events)
        .with_clock(Arc::new(FixedClock(now())))
}

fn pipeline(events: Arc<RecordingEmitter>) -> CandidatePipeline {
    pipeline_with(
        PipelineSettings::default(),
        Arc::new(metadata()),
        Arc::new(PassthroughImageValidator),
        events,
    )
}

#[tokio::test]
async fn misspelled_surface_fails_only_its_own_record() {
    let events = Arc::new(RecordingEmitter::default());
    let pipeline = pipeline(events.clone());

    let mut bad = record("c-2", STORY_URL);
    bad["scheduled_corpus_item"]["scheduled_surface_guid"] = json!("NEW_TAB_EN_UX");
    let outcome = pipeline
        .process_batch(vec![record("c-1", STORY_URL), bad])
        .await;

    assert_eq!(outcome.succeeded.len(), 1);
    assert_eq!(outcome.failed.len(), 1);
    let failure = &outcome.failed[0];
    assert_eq!(failure.record_id, "c-2");
    assert_eq!(failure.error.category(), ErrorCategory::Structural);
    match &failure.error {
        CandidateError::Structural(err) => {
            let issue = &err.issues[0];
            assert_eq!(issue.path, "$input.scheduled_corpus_item.scheduled_surface_guid");
            assert!(issue.expected.contains("NEW_TAB_EN_US"));
            assert!(issue.expected.contains("NEW_TAB_DE_DE"));
            assert!(issue.expected.contains("SANDBOX"));
            assert_eq!(issue.found, "string \"NEW_TAB_EN_UX\"");
        }
        other => panic!("unexpected {other:?}"),
    }

    // Structural failures carry no telemetry classification.
    let recorded = events.events();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].kind, CandidateEventKind::Success);
    assert_eq!(recorded[0].candidate_id, "c-1");

    let summary = outcome.summary();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.failures_by_kind.get("structural"), Some(&1));
}

#[tokio::test]
async fn approved_item_merges_candidate_and_metadata() {
    let events = Arc::new(RecordingEmitter::default());
    let processed = pipeline(events)
        .process_record(record("c-1", STORY_URL))
        .await
        .unwrap();
    let item = processed.item;
    assert_eq!(item.title, "A Random String to Format! Random-String:Random!");
    assert_eq!(item.excerpt, "It\u{2019}s a \u{201C}story\u{201D} about things");
    assert_eq!(item.language, CorpusLanguage::En);
    assert_eq!(item.image_url, STORY_IMAGE);
    assert_eq!(item.date_published.as_deref(), Some("2026-02-27 10:00:00"));
    assert_eq!(
        item.authors,
        vec![
            Author { name: "Ada Lovelace".into(), sort_order: 1 },
            Author { name: "Grace Hopper".into(), sort_order: 2 },
        ]
    );
    assert_eq!(item.scheduled_surface_guid, "NEW_TAB_EN_US");
    assert!(processed.receipt.is_none());
}

#[tokio::test]
async fn rejected_image_is_classified_missing_image() {
    let events = Arc::new(RecordingEmitter::default());
    let pipeline = pipeline_with(
        PipelineSettings::default(),
        Arc::new(metadata()),
        Arc::new(ImageBlocklist(HashSet::from([STORY_IMAGE.to_string()]))),
        events.clone(),
    );
    let err = pipeline
        .process_record(record("c-1", STORY_URL))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CandidateError::Reconciliation(ReconciliationError::InvalidImage(ref url)) if url == STORY_IMAGE
    ));
    assert_eq!(err.error_name(), Some(CandidateErrorName::MissingImage));

    let recorded = events.events();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].kind, CandidateEventKind::Failure);
    assert_eq!(recorded[0].error_name, Some(CandidateErrorName::MissingImage));
}

#[tokio::test]
async fn lead_time_boundary_and_bypass() {
    // Tuesday 2026-03-03 starts at 05:00 UTC in New York.
    let midnight = DateTime::parse_from_rfc3339("2026-03-03T05:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let build = |now: DateTime<Utc>, enabled: bool| {
        CandidatePipeline::new(
            PipelineSettings {
                enable_scheduled_date_validation: enabled,
                ..Default::default()
            },
            Arc::new(metadata()),
            Arc::new(PassthroughImageValidator),
            Arc::new(RecordingEmitter::default()),
        )
        .with_clock(Arc::new(FixedClock(now)))
    };

    let raw = record("c-1", STORY_URL);
    assert!(build(midnight - Duration::hours(14), true)
        .validate_candidate(&raw)
        .is_ok());

    let err = build(midnight - Duration::hours(13), true)
        .validate_candidate(&raw)
        .unwrap_err();
    assert!(matches!(
        err,
        CandidateError::Scheduling(SchedulingError::InsufficientLeadTime { required_hours: 14, .. })
    ));
    assert!(err.to_string().contains("America/New_York"));
    assert_eq!(
        err.error_name(),
        Some(CandidateErrorName::InsufficientTimeBeforeScheduledDate)
    );

    let mut malformed = raw.clone();
    malformed["scheduled_corpus_item"]["scheduled_date"] = json!("next week");
    assert!(build(midnight, false).validate_candidate(&malformed).is_ok());
    assert!(matches!(
        build(midnight, true).validate_candidate(&malformed),
        Err(CandidateError::Scheduling(SchedulingError::CannotCompute { .. }))
    ));
}

#[tokio::test]
async fn german_candidates_are_not_title_cased() {
    let url = "https://www.example.de/artikel";
    let mut raw = record("c-de", url);
    let item = &mut raw["scheduled_corpus_item"];
    item["scheduled_surface_guid"] = json!("NEW_TAB_DE_DE");
    item["language"] = json!("DE");
    item["title"] = json!("was du über »kleine« dinge wissen musst");
    item["excerpt"] = json!("«Nicht eine mehr»: … – das musst du darüber wissen");
    item["image_url"] = json!("https://images.example.de/a.jpg");
    item["authors"] = json!(["Ada Lovelace"]);

    let pipeline = pipeline_with(
        PipelineSettings::default(),
        Arc::new(UnreachableParser),
        Arc::new(PassthroughImageValidator),
        Arc::new(RecordingEmitter::default()),
    );
    let item = pipeline.process_record(raw).await.unwrap().item;
    assert_eq!(item.title, "was du über \u{201E}kleine\u{201C} dinge wissen musst");
    assert_eq!(
        item.excerpt,
        "\u{201E}Nicht eine mehr\u{201C}: … \u{2014} das musst du darüber wissen"
    );
    // Parser unreachable: candidate authors are the fallback.
    assert_eq!(item.authors, vec![Author { name: "Ada Lovelace".into(), sort_order: 1 }]);
    assert_eq!(item.publisher, None);
    assert_eq!(item.date_published, None);
}

#[tokio::test]
async fn unreachable_parser_is_fatal_only_when_fields_are_missing() {
    let pipeline = pipeline_with(
        PipelineSettings::default(),
        Arc::new(UnreachableParser),
        Arc::new(PassthroughImageValidator),
        Arc::new(RecordingEmitter::default()),
    );
    let err = pipeline
        .process_record(record("c-1", STORY_URL))
        .await
        .unwrap_err();
    assert_eq!(err.error_name(), Some(CandidateErrorName::MissingTitle));
    assert_eq!(err.field().as_deref(), Some("title"));
}

#[tokio::test]
async fn telemetry_failure_never_fails_the_record() {
    let pipeline = pipeline_with(
        PipelineSettings::default(),
        Arc::new(metadata()),
        Arc::new(PassthroughImageValidator),
        Arc::new(BrokenEmitter),
    );
    assert!(pipeline.process_record(record("c-1", STORY_URL)).await.is_ok());
}

#[tokio::test]
async fn duplicate_submission_is_already_scheduled() {
    let dir = tempdir().unwrap();
    let sink_path = dir.path().join("approved.jsonl");
    let events = Arc::new(RecordingEmitter::default());
    let pipeline = pipeline(events.clone()).with_sink(Arc::new(JsonLinesSink::new(&sink_path)));

    let outcome = pipeline
        .process_batch(vec![record("c-1", STORY_URL), record("c-2", STORY_URL)])
        .await;
    assert_eq!(outcome.succeeded.len(), 1);
    let receipt = outcome.succeeded[0].receipt.clone().unwrap();
    assert_eq!(outcome.failed[0].record_id, "c-2");
    assert_eq!(
        outcome.failed[0].error.error_name(),
        Some(CandidateErrorName::AlreadyScheduled)
    );

    let lines = std::fs::read_to_string(&sink_path).unwrap();
    assert_eq!(lines.lines().count(), 1);

    let recorded = events.events();
    assert_eq!(recorded.len(), 2);
    assert_eq!(
        recorded[0].approved_item_external_id.as_deref(),
        Some(receipt.approved_item_external_id.as_str())
    );
    assert_eq!(recorded[0].scheduled_item_external_id, receipt.scheduled_item_external_id);
    assert_eq!(recorded[1].error_name, Some(CandidateErrorName::AlreadyScheduled));
}

#[tokio::test]
async fn unparseable_payload_is_the_only_batch_failure() {
    let pipeline = pipeline(Arc::new(RecordingEmitter::default()));
    assert!(pipeline.process_payload("{\"candidates\": [").await.is_err());

    let outcome = pipeline
        .process_payload(r#"{"candidates": [42, {"scheduled_corpus_candidate_id": "c-9"}]}"#)
        .await
        .unwrap();
    assert!(outcome.succeeded.is_empty());
    assert_eq!(outcome.failed_ids(), vec!["#0", "c-9"]);
}

#[tokio::test]
async fn validation_is_idempotent() {
    let pipeline = pipeline(Arc::new(RecordingEmitter::default()));
    let raw = record("c-1", STORY_URL);
    let first = pipeline.validate_candidate(&raw).unwrap();
    let second = pipeline.validate_candidate(&raw).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.publish_at.as_deref(), Some("2026-03-03T03:00:00-05:00"));
}

#[tokio::test]
async fn bundled_fixtures_process_cleanly() {
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    let payload = std::fs::read_to_string(root.join("fixtures/sample_batch.json")).unwrap();
    let metadata = FixtureMetadataSource::load(root.join("fixtures/metadata.json")).unwrap();
    let settings = corpus_pipeline::PipelineConfig {
        surfaces_path: root.join("config/scheduled_surfaces.yaml"),
        title_stopwords_path: Some(root.join("config/title_minor_words.yaml")),
        ..Default::default()
    }
    .load_settings()
    .unwrap();

    let pipeline = pipeline_with(
        settings,
        Arc::new(metadata),
        Arc::new(PassthroughImageValidator),
        Arc::new(RecordingEmitter::default()),
    );
    let outcome = pipeline.process_payload(&payload).await.unwrap();
    let summary = outcome.summary();
    assert_eq!(summary.total, 4);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failures_by_kind.get("structural"), Some(&1));
    assert_eq!(
        summary.failures_by_kind.get("INSUFFICIENT_TIME_BEFORE_SCHEDULED_DATE"),
        Some(&1)
    );
}
