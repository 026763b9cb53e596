use corpus_adapters::SubmitError;
use corpus_core::CandidateErrorName;
use serde::Serialize;
use thiserror::Error;

use crate::reconcile::ReconciliationError;
use crate::schedule::SchedulingError;
use crate::structure::StructuralError;

/// Every way a single record can fail. Never escapes the batch boundary.
#[derive(Debug, Error)]
pub enum CandidateError {
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),
    #[error("submitting approved item failed: {0}")]
    Submission(#[from] SubmitError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Structural,
    Scheduling,
    Reconciliation,
    Submission,
}

impl CandidateError {
    /// Telemetry classification, when the failure has one.
    pub fn error_name(&self) -> Option<CandidateErrorName> {
        match self {
            Self::Structural(_) => None,
            Self::Scheduling(e) => e.error_name(),
            Self::Reconciliation(e) => e.error_name(),
            Self::Submission(SubmitError::AlreadyScheduled { .. }) => {
                Some(CandidateErrorName::AlreadyScheduled)
            }
            Self::Submission(_) => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Structural(_) => ErrorCategory::Structural,
            Self::Scheduling(_) => ErrorCategory::Scheduling,
            Self::Reconciliation(_) => ErrorCategory::Reconciliation,
            Self::Submission(_) => ErrorCategory::Submission,
        }
    }

    /// Input path or output field the failure is about.
    pub fn field(&self) -> Option<String> {
        match self {
            Self::Structural(e) => e.first_path().map(ToString::to_string),
            Self::Scheduling(SchedulingError::DomainNotAllowed { .. }) => {
                Some("$input.scheduled_corpus_item.url".to_string())
            }
            Self::Scheduling(_) => Some("$input.scheduled_corpus_item.scheduled_date".to_string()),
            Self::Reconciliation(e) => Some(e.field().to_string()),
            Self::Submission(_) => None,
        }
    }
}
