//! Candidate validation, scheduling checks, metadata reconciliation and batch
//! reporting for auto-scheduled corpus items.

pub mod batch;
pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod reconcile;
pub mod schedule;
pub mod structure;

pub use batch::{parse_batch, process_batch, BatchError, BatchFailure, BatchOutcome, BatchSummary, FailureReport};
pub use config::{load_surface_catalogue, load_title_stopwords, PipelineConfig, PipelineSettings};
pub use error::{CandidateError, ErrorCategory};
pub use pipeline::{CandidatePipeline, ProcessedCandidate, ValidatedCandidate};
pub use reconcile::{reconcile, ReconciliationError};
pub use schedule::{
    check_domain_allowed, validate_scheduled_date, Clock, FixedClock, SchedulingError, SystemClock,
};
pub use structure::{validate_structure, FieldIssue, StructuralError};

pub const CRATE_NAME: &str = "corpus-pipeline";
