//! Shape validation of inbound candidate records.
//!
//! The item schema is a declarative table ([`ITEM_SCHEMA`]); [`validate_structure`]
//! walks it, collects every offending path, and only then builds a [`Candidate`].
//! Optional content fields must be present: `null` is accepted, a missing key is not.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use corpus_core::{
    Candidate, CorpusItemSource, CorpusItemStatus, CorpusLanguage, SurfaceCatalogue, Topic,
};
use corpus_http::parse_http_url;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

const ROOT: &str = "$input";
const ITEM_KEY: &str = "scheduled_corpus_item";
const CANDIDATE_ID_KEY: &str = "scheduled_corpus_candidate_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    HttpUrl,
    Status,
    Source,
    Topic,
    SurfaceGuid,
    Language,
    TextList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    /// Key must exist; `null` means "fall back to metadata".
    Nullable,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub presence: Presence,
}

const fn required(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        presence: Presence::Required,
    }
}

const fn nullable(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        presence: Presence::Nullable,
    }
}

pub const ITEM_SCHEMA: &[FieldSpec] = &[
    required("url", FieldKind::HttpUrl),
    required("status", FieldKind::Status),
    required("source", FieldKind::Source),
    nullable("topic", FieldKind::Topic),
    required("scheduled_date", FieldKind::Text),
    required("scheduled_surface_guid", FieldKind::SurfaceGuid),
    nullable("title", FieldKind::Text),
    nullable("excerpt", FieldKind::Text),
    nullable("language", FieldKind::Language),
    nullable("image_url", FieldKind::Text),
    nullable("authors", FieldKind::TextList),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub path: String,
    pub expected: String,
    pub found: String,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: expected {}, found {}", self.path, self.expected, self.found)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid candidate {}: {}", .candidate_id.as_deref().unwrap_or("<unknown>"), join_issues(.issues))]
pub struct StructuralError {
    pub candidate_id: Option<String>,
    pub issues: Vec<FieldIssue>,
}

impl StructuralError {
    pub fn first_path(&self) -> Option<&str> {
        self.issues.first().map(|i| i.path.as_str())
    }

    pub fn mentions(&self, path: &str) -> bool {
        self.issues.iter().any(|i| i.path == path)
    }
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Short description of a JSON value for error messages.
pub fn describe(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(b)) => format!("boolean {b}"),
        Some(Value::Number(n)) => format!("number {n}"),
        Some(Value::String(s)) => {
            let shown: String = s.chars().take(60).collect();
            if shown.len() < s.len() {
                format!("string {shown:?}…")
            } else {
                format!("string {shown:?}")
            }
        }
        Some(Value::Array(a)) => format!("array of {}", a.len()),
        Some(Value::Object(_)) => "object".to_string(),
    }
}

fn one_of(values: &[&str]) -> String {
    let quoted = values
        .iter()
        .map(|v| format!("{v:?}"))
        .collect::<Vec<_>>()
        .join(" | ");
    format!("({quoted})")
}

#[derive(Debug, Clone)]
enum FieldValue {
    Null,
    Text(String),
    Status(CorpusItemStatus),
    Source(CorpusItemSource),
    Topic(Option<Topic>),
    Language(CorpusLanguage),
    TextList(Vec<String>),
}

struct Checker<'a> {
    expected_source: CorpusItemSource,
    catalogue: &'a SurfaceCatalogue,
    issues: Vec<FieldIssue>,
}

impl Checker<'_> {
    fn issue(&mut self, path: String, expected: String, found: Option<&Value>) {
        self.issues.push(FieldIssue {
            path,
            expected,
            found: describe(found),
        });
    }

    fn expected(&self, field: &FieldSpec) -> String {
        let base = match field.kind {
            FieldKind::Text => "string".to_string(),
            FieldKind::HttpUrl => "string (http/https url)".to_string(),
            FieldKind::Status => one_of(&CorpusItemStatus::names()),
            FieldKind::Source => one_of(&[self.expected_source.as_str()]),
            FieldKind::Topic => {
                let mut names = vec![""];
                names.extend(Topic::names());
                one_of(&names)
            }
            FieldKind::SurfaceGuid => one_of(&self.catalogue.guids()),
            FieldKind::Language => one_of(&CorpusLanguage::names()),
            FieldKind::TextList => "Array<string>".to_string(),
        };
        match field.presence {
            Presence::Required => base,
            Presence::Nullable => format!("(null | {base})"),
        }
    }

    fn check(&mut self, prefix: &str, field: &FieldSpec, value: Option<&Value>) -> Option<FieldValue> {
        let path = format!("{prefix}.{}", field.name);
        let Some(value) = value else {
            let expected = self.expected(field);
            self.issue(path, expected, None);
            return None;
        };
        if value.is_null() {
            if field.presence == Presence::Nullable {
                return Some(FieldValue::Null);
            }
            let expected = self.expected(field);
            self.issue(path, expected, Some(value));
            return None;
        }

        let checked = match (field.kind, value) {
            (FieldKind::Text, Value::String(s)) => Some(FieldValue::Text(s.clone())),
            (FieldKind::HttpUrl, Value::String(s)) if parse_http_url(s).is_ok() => {
                Some(FieldValue::Text(s.clone()))
            }
            (FieldKind::Status, Value::String(s)) => CorpusItemStatus::parse(s).map(FieldValue::Status),
            (FieldKind::Source, Value::String(s)) => CorpusItemSource::parse(s)
                .filter(|source| *source == self.expected_source)
                .map(FieldValue::Source),
            (FieldKind::Topic, Value::String(s)) if s.is_empty() => Some(FieldValue::Topic(None)),
            (FieldKind::Topic, Value::String(s)) => {
                Topic::parse(s).map(|t| FieldValue::Topic(Some(t)))
            }
            (FieldKind::SurfaceGuid, Value::String(s)) => self
                .catalogue
                .get(s)
                .map(|surface| FieldValue::Text(surface.guid.clone())),
            (FieldKind::Language, Value::String(s)) => CorpusLanguage::parse(s).map(FieldValue::Language),
            (FieldKind::TextList, Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::String(s) => out.push(s.clone()),
                        other => self.issue(
                            format!("{path}[{i}]"),
                            "string".to_string(),
                            Some(other),
                        ),
                    }
                }
                (out.len() == items.len()).then_some(FieldValue::TextList(out))
            }
            _ => None,
        };

        if checked.is_none() && !matches!(field.kind, FieldKind::TextList if value.is_array()) {
            let expected = self.expected(field);
            self.issue(path, expected, Some(value));
        }
        checked
    }

    fn check_features(&mut self, value: Option<&Value>) -> Option<BTreeMap<String, Value>> {
        let path = format!("{ROOT}.features");
        let Some(Value::Object(map)) = value else {
            self.issue(path, "Record<string, string | number>".to_string(), value);
            return None;
        };
        let before = self.issues.len();
        for (key, v) in map {
            if !(v.is_string() || v.is_number()) {
                self.issue(format!("{path}.{key}"), "(string | number)".to_string(), Some(v));
            }
        }
        (self.issues.len() == before).then(|| map.clone().into_iter().collect())
    }

    fn check_run_details(&mut self, value: Option<&Value>) -> Option<BTreeMap<String, Value>> {
        match value {
            Some(Value::Object(map)) => Some(map.clone().into_iter().collect()),
            other => {
                self.issue(
                    format!("{ROOT}.run_details"),
                    "Record<string, any>".to_string(),
                    other,
                );
                None
            }
        }
    }
}

/// Candidate id of a raw record, if it has a string one.
pub fn record_candidate_id(raw: &Value) -> Option<String> {
    raw.get(CANDIDATE_ID_KEY)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

/// Validate one raw record against [`ITEM_SCHEMA`] and the surface catalogue.
///
/// `expected_source` is the only `source` value the calling entry point accepts.
pub fn validate_structure(
    raw: &Value,
    expected_source: CorpusItemSource,
    catalogue: &SurfaceCatalogue,
) -> Result<Candidate, StructuralError> {
    let candidate_id = record_candidate_id(raw);
    let mut checker = Checker {
        expected_source,
        catalogue,
        issues: Vec::new(),
    };

    let Some(root) = raw.as_object() else {
        checker.issue(ROOT.to_string(), "object".to_string(), Some(raw));
        return Err(StructuralError {
            candidate_id,
            issues: checker.issues,
        });
    };

    if candidate_id.is_none() {
        checker.issue(
            format!("{ROOT}.{CANDIDATE_ID_KEY}"),
            "string".to_string(),
            root.get(CANDIDATE_ID_KEY),
        );
    }
    let features = checker.check_features(root.get("features"));
    let run_details = checker.check_run_details(root.get("run_details"));

    let item_prefix = format!("{ROOT}.{ITEM_KEY}");
    let mut fields: HashMap<&'static str, FieldValue> = HashMap::new();
    match root.get(ITEM_KEY) {
        Some(Value::Object(item)) => check_item(&mut checker, &item_prefix, item, &mut fields),
        other => checker.issue(item_prefix.clone(), "object".to_string(), other),
    }

    if let (Some(FieldValue::Text(guid)), Some(FieldValue::Source(source))) =
        (fields.get("scheduled_surface_guid"), fields.get("source"))
    {
        if let Some(surface) = catalogue.get(guid) {
            if !surface.allows_source(*source) {
                let allowed: Vec<&str> = surface.allowed_sources.iter().map(|s| s.as_str()).collect();
                checker.issues.push(FieldIssue {
                    path: format!("{item_prefix}.source"),
                    expected: format!("source allowed on {guid} {}", one_of(&allowed)),
                    found: describe(Some(&Value::String(source.as_str().to_string()))),
                });
            }
        }
    }

    if !checker.issues.is_empty() {
        return Err(StructuralError {
            candidate_id,
            issues: checker.issues,
        });
    }

    build_candidate(candidate_id, fields, features, run_details).ok_or_else(|| StructuralError {
        candidate_id: record_candidate_id(raw),
        issues: vec![FieldIssue {
            path: item_prefix,
            expected: "complete candidate".to_string(),
            found: "incomplete object".to_string(),
        }],
    })
}

fn check_item(
    checker: &mut Checker<'_>,
    prefix: &str,
    item: &Map<String, Value>,
    fields: &mut HashMap<&'static str, FieldValue>,
) {
    for field in ITEM_SCHEMA {
        if let Some(value) = checker.check(prefix, field, item.get(field.name)) {
            fields.insert(field.name, value);
        }
    }
}

fn build_candidate(
    candidate_id: Option<String>,
    mut fields: HashMap<&'static str, FieldValue>,
    features: Option<BTreeMap<String, Value>>,
    run_details: Option<BTreeMap<String, Value>>,
) -> Option<Candidate> {
    let mut text = |name: &str| match fields.remove(name) {
        Some(FieldValue::Text(s)) => Some(Some(s)),
        Some(FieldValue::Null) => Some(None),
        _ => None,
    };
    let url = text("url")??;
    let scheduled_date = text("scheduled_date")??;
    let surface_guid = text("scheduled_surface_guid")??;
    let title = text("title")?;
    let excerpt = text("excerpt")?;
    let image_url = text("image_url")?;

    let status = match fields.remove("status")? {
        FieldValue::Status(s) => s,
        _ => return None,
    };
    let source = match fields.remove("source")? {
        FieldValue::Source(s) => s,
        _ => return None,
    };
    let topic = match fields.remove("topic")? {
        FieldValue::Topic(t) => t,
        FieldValue::Null => None,
        _ => return None,
    };
    let language = match fields.remove("language")? {
        FieldValue::Language(l) => Some(l),
        FieldValue::Null => None,
        _ => return None,
    };
    let authors = match fields.remove("authors")? {
        FieldValue::TextList(a) => Some(a),
        FieldValue::Null => None,
        _ => return None,
    };

    Some(Candidate {
        candidate_id: candidate_id?,
        url,
        status,
        source,
        topic,
        surface_guid,
        scheduled_date,
        title,
        excerpt,
        image_url,
        language,
        authors,
        features: features?,
        run_details: run_details?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Value {
        json!({
            "scheduled_corpus_candidate_id": "a4b5d99c-4c1b-4d35-bccf-6455c8df07b0",
            "scheduled_corpus_item": {
                "url": "https://www.politico.com/news/magazine/2023/08/08/trump-indictment",
                "status": "RECOMMENDATION",
                "source": "ML",
                "topic": "POLITICS",
                "scheduled_date": "2026-03-02",
                "scheduled_surface_guid": "NEW_TAB_EN_US",
                "title": null,
                "excerpt": null,
                "language": "EN",
                "image_url": null,
                "authors": ["Ada Lovelace"]
            },
            "features": {"rank": 1, "score": 0.92, "model": "v2"},
            "run_details": {"flow": "ScheduleFlow", "run_id": 14}
        })
    }

    fn check(raw: &Value) -> Result<Candidate, StructuralError> {
        validate_structure(raw, CorpusItemSource::Ml, &SurfaceCatalogue::builtin())
    }

    #[test]
    fn valid_record_builds_candidate() {
        let c = check(&valid()).unwrap();
        assert_eq!(c.candidate_id, "a4b5d99c-4c1b-4d35-bccf-6455c8df07b0");
        assert_eq!(c.topic, Some(Topic::Politics));
        assert_eq!(c.language, Some(CorpusLanguage::En));
        assert_eq!(c.title, None);
        assert_eq!(c.authors, Some(vec!["Ada Lovelace".to_string()]));
        assert_eq!(c.features["rank"], json!(1));
    }

    #[test]
    fn validation_is_repeatable() {
        let raw = valid();
        assert_eq!(check(&raw).unwrap(), check(&raw).unwrap());
    }

    #[test]
    fn null_optional_fields_pass_and_absent_ones_fail() {
        for field in ["title", "excerpt", "image_url", "language", "authors", "topic"] {
            let mut raw = valid();
            raw["scheduled_corpus_item"][field] = Value::Null;
            assert!(check(&raw).is_ok(), "{field}: null should pass");

            raw["scheduled_corpus_item"].as_object_mut().unwrap().remove(field);
            let err = check(&raw).unwrap_err();
            let path = format!("$input.scheduled_corpus_item.{field}");
            assert!(err.mentions(&path), "{field}: {err}");
            assert!(err.issues[0].expected.starts_with("(null | "));
            assert_eq!(err.issues[0].found, "undefined");
        }
    }

    #[test]
    fn empty_topic_means_unknown() {
        let mut raw = valid();
        raw["scheduled_corpus_item"]["topic"] = json!("");
        assert_eq!(check(&raw).unwrap().topic, None);
        raw["scheduled_corpus_item"]["topic"] = json!("ASTROLOGY");
        assert!(check(&raw).unwrap_err().mentions("$input.scheduled_corpus_item.topic"));
    }

    #[test]
    fn unknown_surface_lists_valid_guids() {
        let mut raw = valid();
        raw["scheduled_corpus_item"]["scheduled_surface_guid"] = json!("NEW_TAB_EN_USS");
        let err = check(&raw).unwrap_err();
        let issue = &err.issues[0];
        assert_eq!(issue.path, "$input.scheduled_corpus_item.scheduled_surface_guid");
        for guid in SurfaceCatalogue::builtin().guids() {
            assert!(issue.expected.contains(guid), "{guid} missing from {}", issue.expected);
        }
    }

    #[test]
    fn only_the_expected_source_is_accepted() {
        let mut raw = valid();
        raw["scheduled_corpus_item"]["source"] = json!("MANUAL");
        let err = check(&raw).unwrap_err();
        assert_eq!(err.issues[0].expected, "(\"ML\")");
        assert!(validate_structure(&raw, CorpusItemSource::Manual, &SurfaceCatalogue::builtin()).is_ok());
    }

    #[test]
    fn surface_source_policy_is_enforced() {
        let mut raw = valid();
        raw["scheduled_corpus_item"]["scheduled_surface_guid"] = json!("NEW_TAB_EN_GB");
        let err = check(&raw).unwrap_err();
        assert!(err.mentions("$input.scheduled_corpus_item.source"));
        assert!(err.issues[0].expected.contains("NEW_TAB_EN_GB"));
    }

    #[test]
    fn wrong_types_and_bad_urls_are_reported_together() {
        let mut raw = valid();
        raw["scheduled_corpus_item"]["url"] = json!("ftp://example.com/file");
        raw["scheduled_corpus_item"]["language"] = json!("PT");
        raw["scheduled_corpus_item"]["authors"] = json!(["Ada", 7]);
        raw["features"]["nested"] = json!({"x": 1});
        let err = check(&raw).unwrap_err();
        assert!(err.mentions("$input.scheduled_corpus_item.url"));
        assert!(err.mentions("$input.scheduled_corpus_item.language"));
        assert!(err.mentions("$input.scheduled_corpus_item.authors[1]"));
        assert!(err.mentions("$input.features.nested"));
        assert_eq!(err.issues.len(), 4);
    }

    #[test]
    fn non_object_records_fail_at_the_root() {
        let err = check(&json!([1, 2])).unwrap_err();
        assert_eq!(err.first_path(), Some("$input"));
        assert_eq!(err.candidate_id, None);

        let err = check(&json!({"scheduled_corpus_candidate_id": "x"})).unwrap_err();
        assert!(err.mentions("$input.scheduled_corpus_item"));
        assert!(err.mentions("$input.features"));
        assert!(err.mentions("$input.run_details"));
        assert!(err.to_string().starts_with("invalid candidate x: "));
    }

    #[test]
    fn required_fields_reject_null() {
        let mut raw = valid();
        raw["scheduled_corpus_item"]["scheduled_date"] = Value::Null;
        let err = check(&raw).unwrap_err();
        assert_eq!(err.issues[0].path, "$input.scheduled_corpus_item.scheduled_date");
        assert_eq!(err.issues[0].expected, "string");
        assert_eq!(err.issues[0].found, "null");
    }
}
