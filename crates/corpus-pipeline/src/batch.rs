//! Per-record isolation for a batch of raw candidate records.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;

use corpus_core::CandidateErrorName;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::error::{CandidateError, ErrorCategory};
use crate::structure::record_candidate_id;

/// The only failure that aborts a whole batch: there is nothing to iterate.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch payload is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("batch payload must be an array or an object with a \"candidates\" array, found {0}")]
    UnexpectedShape(String),
}

/// Split a payload into raw records. Accepts `[...]` or `{"candidates": [...]}`.
pub fn parse_batch(payload: &str) -> Result<Vec<Value>, BatchError> {
    match serde_json::from_str::<Value>(payload)? {
        Value::Array(records) => Ok(records),
        Value::Object(mut envelope) => match envelope.remove("candidates") {
            Some(Value::Array(records)) => Ok(records),
            other => Err(BatchError::UnexpectedShape(format!(
                "object with candidates = {}",
                crate::structure::describe(other.as_ref())
            ))),
        },
        other => Err(BatchError::UnexpectedShape(crate::structure::describe(Some(
            &other,
        )))),
    }
}

/// Candidate id when the record carries one, `#<index>` otherwise.
pub fn record_id(record: &Value, index: usize) -> String {
    record_label(record, Some(index))
}

/// Like [`record_id`], but `<unknown>` when the record's position is not known.
pub fn record_label(record: &Value, index: Option<usize>) -> String {
    record_candidate_id(record).unwrap_or_else(|| match index {
        Some(index) => format!("#{index}"),
        None => "<unknown>".to_string(),
    })
}

#[derive(Debug)]
pub struct BatchFailure<E> {
    pub index: usize,
    pub record_id: String,
    pub record: Value,
    pub error: E,
}

#[derive(Debug)]
pub struct BatchOutcome<T, E = CandidateError> {
    pub succeeded: Vec<T>,
    pub failed: Vec<BatchFailure<E>>,
}

impl<T, E> Default for BatchOutcome<T, E> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T, E> BatchOutcome<T, E> {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.record_id.as_str()).collect()
    }
}

/// Machine-readable view of one failed record.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub record_id: String,
    pub category: ErrorCategory,
    pub error_name: Option<CandidateErrorName>,
    pub field: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Telemetry error name, or the error category for unclassified failures.
    pub failures_by_kind: BTreeMap<String, usize>,
}

impl<T> BatchOutcome<T, CandidateError> {
    pub fn failure_reports(&self) -> Vec<FailureReport> {
        self.failed
            .iter()
            .map(|f| FailureReport {
                record_id: f.record_id.clone(),
                category: f.error.category(),
                error_name: f.error.error_name(),
                field: f.error.field(),
                message: f.error.to_string(),
            })
            .collect()
    }

    pub fn summary(&self) -> BatchSummary {
        let mut failures_by_kind = BTreeMap::new();
        for failure in &self.failed {
            let kind = match failure.error.error_name() {
                Some(name) => name.as_str().to_string(),
                None => match failure.error.category() {
                    ErrorCategory::Structural => "structural",
                    ErrorCategory::Scheduling => "scheduling",
                    ErrorCategory::Reconciliation => "reconciliation",
                    ErrorCategory::Submission => "submission",
                }
                .to_string(),
            };
            *failures_by_kind.entry(kind).or_insert(0) += 1;
        }
        BatchSummary {
            total: self.total(),
            succeeded: self.succeeded.len(),
            failed: self.failed.len(),
            failures_by_kind,
        }
    }
}

/// Run `handler` over every record in order. A failing record is recorded
/// against its id and never stops the rest of the batch.
pub async fn process_batch<T, E, F, Fut>(records: Vec<Value>, mut handler: F) -> BatchOutcome<T, E>
where
    E: Display,
    F: FnMut(Value) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut outcome = BatchOutcome::default();
    for (index, record) in records.into_iter().enumerate() {
        match handler(record.clone()).await {
            Ok(value) => outcome.succeeded.push(value),
            Err(error) => {
                let record_id = record_id(&record, index);
                warn!(%record_id, index, error = %error, "candidate record failed");
                outcome.failed.push(BatchFailure {
                    index,
                    record_id,
                    record,
                    error,
                });
            }
        }
    }
    outcome
}
