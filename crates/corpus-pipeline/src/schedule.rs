//! Lead-time and domain rules for auto-scheduling onto a surface.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use corpus_core::{weekday_name, CandidateErrorName, ScheduledSurface};
use corpus_http::parse_http_url;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulingError {
    #[error("cannot compute the time difference for scheduled date {scheduled_date:?}")]
    CannotCompute { scheduled_date: Option<String> },
    #[error(
        "candidate for {surface_guid} must be scheduled at least {required_hours} hours ahead \
         on {day_range} ({timezone}); only {hours_until:.2} hours remain"
    )]
    InsufficientLeadTime {
        surface_guid: String,
        timezone: String,
        day_range: String,
        required_hours: u32,
        hours_until: f64,
    },
    #[error("domain {host} is not allowed for auto-scheduling on {surface_guid}")]
    DomainNotAllowed { host: String, surface_guid: String },
}

impl SchedulingError {
    pub fn error_name(&self) -> Option<CandidateErrorName> {
        match self {
            Self::CannotCompute { .. } => None,
            Self::InsufficientLeadTime { .. } => {
                Some(CandidateErrorName::InsufficientTimeBeforeScheduledDate)
            }
            Self::DomainNotAllowed { .. } => {
                Some(CandidateErrorName::DomainNotAllowedForAutoScheduling)
            }
        }
    }
}

/// Source of "now" for lead-time checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Hours between `now` and the start of `scheduled_date` in the surface's zone.
///
/// The start is local midnight, or the first local instant after it when a DST
/// transition skips midnight.
pub fn hours_until_scheduled(
    scheduled_date: &str,
    surface: &ScheduledSurface,
    now: DateTime<Utc>,
) -> Option<(NaiveDate, f64)> {
    let date = NaiveDate::parse_from_str(scheduled_date.trim(), "%Y-%m-%d").ok()?;
    let start = (0..=3).find_map(|hour| {
        date.and_hms_opt(hour, 0, 0)
            .and_then(|t| surface.iana_timezone.from_local_datetime(&t).earliest())
    })?;
    let millis = (start.with_timezone(&Utc) - now).num_milliseconds();
    let hours = millis as f64 / 3_600_000.0;
    hours.is_finite().then_some((date, hours))
}

/// Reject dates closer than the surface's minimum lead time for that weekday.
///
/// Exactly the minimum passes.
pub fn validate_scheduled_date(
    scheduled_date: Option<&str>,
    surface: &ScheduledSurface,
    now: DateTime<Utc>,
) -> Result<(), SchedulingError> {
    let cannot_compute = || SchedulingError::CannotCompute {
        scheduled_date: scheduled_date.map(ToString::to_string),
    };
    let (date, hours_until) = scheduled_date
        .and_then(|d| hours_until_scheduled(d, surface, now))
        .ok_or_else(cannot_compute)?;

    let weekday = date.weekday();
    let required_hours = surface.cutoff_hours_by_weekday.hours_for(weekday);
    if hours_until < f64::from(required_hours) {
        return Err(SchedulingError::InsufficientLeadTime {
            surface_guid: surface.guid.clone(),
            timezone: surface.iana_timezone.name().to_string(),
            day_range: surface.cutoff_hours_by_weekday.day_range_label(weekday),
            required_hours,
            hours_until,
        });
    }
    tracing::debug!(
        surface = %surface.guid,
        weekday = weekday_name(weekday),
        hours_until,
        required_hours,
        "scheduled date has enough lead time"
    );
    Ok(())
}

/// Reject urls whose host is outside the surface's domain allow-list, if it has one.
pub fn check_domain_allowed(url: &str, surface: &ScheduledSurface) -> Result<(), SchedulingError> {
    let host = parse_http_url(url)
        .ok()
        .and_then(|u| u.host_str().map(ToString::to_string))
        .unwrap_or_default();
    if surface.allows_domain(&host) {
        Ok(())
    } else {
        Err(SchedulingError::DomainNotAllowed {
            host,
            surface_guid: surface.guid.clone(),
        })
    }
}
