//! Telemetry payloads for processed candidates.

use chrono::{DateTime, Utc};
use corpus_adapters::{EventEmitter, SubmitReceipt};
use corpus_core::CandidateEvent;
use tracing::warn;

use crate::error::CandidateError;

pub fn success_event(candidate_id: &str, receipt: &SubmitReceipt, at: DateTime<Utc>) -> CandidateEvent {
    CandidateEvent::success(
        candidate_id,
        Some(receipt.approved_item_external_id.clone()),
        receipt.scheduled_item_external_id.clone(),
        at,
    )
}

/// `None` for failures with no telemetry classification.
pub fn failure_event(
    candidate_id: &str,
    error: &CandidateError,
    at: DateTime<Utc>,
) -> Option<CandidateEvent> {
    let name = error.error_name()?;
    Some(CandidateEvent::failure(candidate_id, name, error.to_string(), at))
}

/// Hand `event` to the emitter. Failures are logged and swallowed.
pub async fn emit_quietly(emitter: &dyn EventEmitter, event: &CandidateEvent) {
    if let Err(err) = emitter.emit(event).await {
        warn!(
            candidate_id = %event.candidate_id,
            event_id = %event.event_id,
            error = %err,
            "telemetry emission failed"
        );
    }
}
