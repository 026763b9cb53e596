//! Core domain model for the corpus candidate scheduler.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

pub mod text;

pub const CRATE_NAME: &str = "corpus-core";

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn names() -> Vec<&'static str> {
                Self::ALL.iter().map(|v| v.as_str()).collect()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// Whether an item is a homepage recommendation or only kept in the corpus.
    CorpusItemStatus {
        Recommendation => "RECOMMENDATION",
        Corpus => "CORPUS",
    }
}

string_enum! {
    /// Origin of a candidate record.
    CorpusItemSource {
        Prospect => "PROSPECT",
        Manual => "MANUAL",
        Backfill => "BACKFILL",
        Ml => "ML",
    }
}

string_enum! {
    CorpusLanguage {
        De => "DE",
        En => "EN",
        Es => "ES",
        Fr => "FR",
        It => "IT",
    }
}

string_enum! {
    Topic {
        Business => "BUSINESS",
        Career => "CAREER",
        Coronavirus => "CORONAVIRUS",
        Education => "EDUCATION",
        Entertainment => "ENTERTAINMENT",
        Food => "FOOD",
        Gaming => "GAMING",
        HealthFitness => "HEALTH_FITNESS",
        Home => "HOME",
        Parenting => "PARENTING",
        PersonalFinance => "PERSONAL_FINANCE",
        Politics => "POLITICS",
        Science => "SCIENCE",
        SelfImprovement => "SELF_IMPROVEMENT",
        Sports => "SPORTS",
        Technology => "TECHNOLOGY",
        Travel => "TRAVEL",
    }
}

impl CorpusLanguage {
    /// Metadata sources report lowercase ISO codes; the corpus stores uppercase.
    pub fn from_metadata_code(code: &str) -> Option<Self> {
        Self::parse(&code.trim().to_ascii_uppercase())
    }
}

/// Structurally valid candidate handed from the validator to the rest of the pipeline.
///
/// Optional content fields are `None` when the producer sent an explicit `null`,
/// meaning the metadata source should supply them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate_id: String,
    pub url: String,
    pub status: CorpusItemStatus,
    pub source: CorpusItemSource,
    pub topic: Option<Topic>,
    pub surface_guid: String,
    pub scheduled_date: String,
    pub title: Option<String>,
    pub excerpt: Option<String>,
    pub image_url: Option<String>,
    pub language: Option<CorpusLanguage>,
    pub authors: Option<Vec<String>>,
    pub features: BTreeMap<String, JsonValue>,
    pub run_details: BTreeMap<String, JsonValue>,
}

/// Fallback metadata for a URL, as returned by the parser service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UrlMetadata {
    pub title: Option<String>,
    pub excerpt: Option<String>,
    pub image_url: Option<String>,
    pub publisher: Option<String>,
    pub language: Option<String>,
    /// Comma-separated author names.
    pub authors: Option<String>,
    pub is_collection: Option<bool>,
    pub is_syndicated: Option<bool>,
    pub date_published: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub name: String,
    pub sort_order: u32,
}

/// Canonical item submitted to the curation API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedItem {
    pub candidate_id: String,
    pub url: String,
    pub title: String,
    pub excerpt: String,
    pub status: CorpusItemStatus,
    pub language: CorpusLanguage,
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_published: Option<String>,
    pub image_url: String,
    pub topic: Option<Topic>,
    pub source: CorpusItemSource,
    pub is_collection: bool,
    pub is_time_sensitive: bool,
    pub is_syndicated: bool,
    pub authors: Vec<Author>,
    pub scheduled_date: String,
    pub scheduled_surface_guid: String,
}

string_enum! {
    /// Classified failure names carried on telemetry events.
    CandidateErrorName {
        MissingTitle => "MISSING_TITLE",
        MissingExcerpt => "MISSING_EXCERPT",
        MissingImage => "MISSING_IMAGE",
        AlreadyScheduled => "ALREADY_SCHEDULED",
        InsufficientTimeBeforeScheduledDate => "INSUFFICIENT_TIME_BEFORE_SCHEDULED_DATE",
        DomainNotAllowedForAutoScheduling => "DOMAIN_NOT_ALLOWED_FOR_AUTO_SCHEDULING",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateEventKind {
    Success,
    Failure,
}

/// Structured payload handed to the event-emission collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvent {
    pub event_id: Uuid,
    pub kind: CandidateEventKind,
    pub candidate_id: String,
    pub approved_item_external_id: Option<String>,
    pub scheduled_item_external_id: Option<String>,
    pub error_name: Option<CandidateErrorName>,
    pub error_description: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl CandidateEvent {
    pub fn success(
        candidate_id: impl Into<String>,
        approved_item_external_id: Option<String>,
        scheduled_item_external_id: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind: CandidateEventKind::Success,
            candidate_id: candidate_id.into(),
            approved_item_external_id,
            scheduled_item_external_id,
            error_name: None,
            error_description: None,
            occurred_at,
        }
    }

    pub fn failure(
        candidate_id: impl Into<String>,
        error_name: CandidateErrorName,
        error_description: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind: CandidateEventKind::Failure,
            candidate_id: candidate_id.into(),
            approved_item_external_id: None,
            scheduled_item_external_id: None,
            error_name: Some(error_name),
            error_description: Some(error_description.into()),
            occurred_at,
        }
    }
}

/// Minimum lead time, in hours, for each ISO weekday of the scheduled date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeekdayCutoffs {
    pub monday: u32,
    pub tuesday: u32,
    pub wednesday: u32,
    pub thursday: u32,
    pub friday: u32,
    pub saturday: u32,
    pub sunday: u32,
}

impl WeekdayCutoffs {
    pub fn uniform(hours: u32) -> Self {
        Self {
            monday: hours,
            tuesday: hours,
            wednesday: hours,
            thursday: hours,
            friday: hours,
            saturday: hours,
            sunday: hours,
        }
    }

    pub fn with(mut self, day: Weekday, hours: u32) -> Self {
        *self.slot_mut(day) = hours;
        self
    }

    pub fn hours_for(&self, day: Weekday) -> u32 {
        match day {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }

    fn slot_mut(&mut self, day: Weekday) -> &mut u32 {
        match day {
            Weekday::Mon => &mut self.monday,
            Weekday::Tue => &mut self.tuesday,
            Weekday::Wed => &mut self.wednesday,
            Weekday::Thu => &mut self.thursday,
            Weekday::Fri => &mut self.friday,
            Weekday::Sat => &mut self.saturday,
            Weekday::Sun => &mut self.sunday,
        }
    }

    /// Human label for the weekdays sharing `day`'s threshold, e.g. "Monday - Saturday".
    pub fn day_range_label(&self, day: Weekday) -> String {
        let hours = self.hours_for(day);
        // Walk back to the first day of the contiguous (wrapping) run containing `day`.
        let mut start = day;
        for _ in 0..6 {
            let prev = start.pred();
            if prev == day || self.hours_for(prev) != hours {
                break;
            }
            start = prev;
        }
        let mut run = vec![start];
        let mut cur = start;
        for _ in 0..6 {
            let next = cur.succ();
            if next == start || self.hours_for(next) != hours {
                break;
            }
            run.push(next);
            cur = next;
        }
        match run.len() {
            1 => weekday_name(day).to_string(),
            7 => "every day".to_string(),
            _ => format!(
                "{} - {}",
                weekday_name(run[0]),
                weekday_name(run[run.len() - 1])
            ),
        }
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Static catalogue entry for a surface items can be scheduled onto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledSurface {
    pub guid: String,
    pub iana_timezone: Tz,
    pub publish_hour_local: u32,
    pub cutoff_hours_by_weekday: WeekdayCutoffs,
    pub allowed_sources: Vec<CorpusItemSource>,
    #[serde(default)]
    pub allowed_domains: Option<Vec<String>>,
}

impl ScheduledSurface {
    pub fn allows_source(&self, source: CorpusItemSource) -> bool {
        self.allowed_sources.contains(&source)
    }

    /// Local instant the surface goes live with items scheduled on `date`.
    pub fn publish_at(&self, date: NaiveDate) -> Option<DateTime<Tz>> {
        let naive = date.and_hms_opt(self.publish_hour_local, 0, 0)?;
        self.iana_timezone.from_local_datetime(&naive).earliest()
    }

    /// True when no allow-list is configured or `host` (or a parent domain) is listed.
    pub fn allows_domain(&self, host: &str) -> bool {
        let Some(domains) = &self.allowed_domains else {
            return true;
        };
        let host = host.trim_start_matches("www.").to_ascii_lowercase();
        domains.iter().any(|d| {
            let d = d.trim().trim_start_matches("www.").to_ascii_lowercase();
            host == d || host.ends_with(&format!(".{d}"))
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogueError {
    #[error("duplicate scheduled surface guid {0}")]
    DuplicateGuid(String),
    #[error("scheduled surface {guid} has publish hour {hour}, expected 0-23")]
    InvalidPublishHour { guid: String, hour: u32 },
    #[error("scheduled surface catalogue is empty")]
    Empty,
}

/// Read-only set of scheduled surfaces, shared across records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceCatalogue {
    surfaces: Vec<ScheduledSurface>,
}

impl SurfaceCatalogue {
    pub fn new(surfaces: Vec<ScheduledSurface>) -> Result<Self, CatalogueError> {
        if surfaces.is_empty() {
            return Err(CatalogueError::Empty);
        }
        let mut seen = HashSet::new();
        for surface in &surfaces {
            if !seen.insert(surface.guid.as_str()) {
                return Err(CatalogueError::DuplicateGuid(surface.guid.clone()));
            }
            if surface.publish_hour_local > 23 {
                return Err(CatalogueError::InvalidPublishHour {
                    guid: surface.guid.clone(),
                    hour: surface.publish_hour_local,
                });
            }
        }
        Ok(Self { surfaces })
    }

    pub fn builtin() -> Self {
        let ml_and_manual = vec![
            CorpusItemSource::Ml,
            CorpusItemSource::Manual,
            CorpusItemSource::Prospect,
            CorpusItemSource::Backfill,
        ];
        let manual_only = vec![
            CorpusItemSource::Manual,
            CorpusItemSource::Prospect,
            CorpusItemSource::Backfill,
        ];
        let regular = |guid: &str, tz: Tz| ScheduledSurface {
            guid: guid.to_string(),
            iana_timezone: tz,
            publish_hour_local: 3,
            cutoff_hours_by_weekday: WeekdayCutoffs::uniform(14),
            allowed_sources: manual_only.clone(),
            allowed_domains: None,
        };

        let surfaces = vec![
            ScheduledSurface {
                guid: "NEW_TAB_EN_US".to_string(),
                iana_timezone: chrono_tz::America::New_York,
                publish_hour_local: 3,
                cutoff_hours_by_weekday: WeekdayCutoffs::uniform(14).with(Weekday::Sun, 32),
                allowed_sources: ml_and_manual.clone(),
                allowed_domains: None,
            },
            ScheduledSurface {
                guid: "NEW_TAB_DE_DE".to_string(),
                iana_timezone: chrono_tz::Europe::Berlin,
                publish_hour_local: 3,
                cutoff_hours_by_weekday: WeekdayCutoffs::uniform(14).with(Weekday::Mon, 38),
                allowed_sources: ml_and_manual,
                allowed_domains: None,
            },
            regular("NEW_TAB_EN_GB", chrono_tz::Europe::London),
            regular("NEW_TAB_EN_INTL", chrono_tz::Asia::Kolkata),
            regular("NEW_TAB_FR_FR", chrono_tz::Europe::Paris),
            regular("NEW_TAB_ES_ES", chrono_tz::Europe::Madrid),
            regular("NEW_TAB_IT_IT", chrono_tz::Europe::Rome),
            regular("SANDBOX", chrono_tz::America::New_York),
        ];
        Self { surfaces }
    }

    pub fn get(&self, guid: &str) -> Option<&ScheduledSurface> {
        self.surfaces.iter().find(|s| s.guid == guid)
    }

    pub fn guids(&self) -> Vec<&str> {
        self.surfaces.iter().map(|s| s.guid.as_str()).collect()
    }

    pub fn surfaces(&self) -> &[ScheduledSurface] {
        &self.surfaces
    }
}

impl Default for SurfaceCatalogue {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_round_trip_through_wire_names() {
        assert_eq!(Topic::parse("HEALTH_FITNESS"), Some(Topic::HealthFitness));
        assert_eq!(Topic::parse("health_fitness"), None);
        assert_eq!(CorpusItemSource::Ml.as_str(), "ML");
        assert_eq!(
            serde_json::to_string(&CorpusItemStatus::Recommendation).unwrap(),
            "\"RECOMMENDATION\""
        );
        assert_eq!(CorpusLanguage::names(), vec!["DE", "EN", "ES", "FR", "IT"]);
    }

    #[test]
    fn failure_events_carry_error_name() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let ev = CandidateEvent::failure("c-1", CandidateErrorName::MissingImage, "no image", at);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["kind"], "failure");
        assert_eq!(json["error_name"], "MISSING_IMAGE");
        assert!(json["approved_item_external_id"].is_null());
        let ok = CandidateEvent::success("c-1", Some("a".into()), None, at);
        assert_ne!(ok.event_id, ev.event_id);
        assert!(ok.error_name.is_none());
    }

    #[test]
    fn metadata_language_is_uppercased() {
        assert_eq!(CorpusLanguage::from_metadata_code("de"), Some(CorpusLanguage::De));
        assert_eq!(CorpusLanguage::from_metadata_code(" en "), Some(CorpusLanguage::En));
        assert_eq!(CorpusLanguage::from_metadata_code("pt"), None);
    }

    #[test]
    fn builtin_catalogue_carries_low_traffic_days() {
        let catalogue = SurfaceCatalogue::builtin();
        let us = catalogue.get("NEW_TAB_EN_US").unwrap();
        assert_eq!(us.cutoff_hours_by_weekday.hours_for(Weekday::Sun), 32);
        assert_eq!(us.cutoff_hours_by_weekday.hours_for(Weekday::Wed), 14);
        let de = catalogue.get("NEW_TAB_DE_DE").unwrap();
        assert_eq!(de.cutoff_hours_by_weekday.hours_for(Weekday::Mon), 38);
        assert_eq!(de.cutoff_hours_by_weekday.hours_for(Weekday::Sun), 14);
        assert!(catalogue.get("NEW_TAB_EN_GB").unwrap().allowed_sources.iter().all(|s| *s != CorpusItemSource::Ml));
    }

    #[test]
    fn day_range_labels_follow_contiguous_thresholds() {
        let us = WeekdayCutoffs::uniform(14).with(Weekday::Sun, 32);
        assert_eq!(us.day_range_label(Weekday::Wed), "Monday - Saturday");
        assert_eq!(us.day_range_label(Weekday::Sun), "Sunday");
        let de = WeekdayCutoffs::uniform(14).with(Weekday::Mon, 38);
        assert_eq!(de.day_range_label(Weekday::Fri), "Tuesday - Sunday");
        assert_eq!(de.day_range_label(Weekday::Mon), "Monday");
        assert_eq!(WeekdayCutoffs::uniform(12).day_range_label(Weekday::Thu), "every day");
    }

    #[test]
    fn catalogue_rejects_duplicates_and_bad_hours() {
        let mut us = SurfaceCatalogue::builtin().get("NEW_TAB_EN_US").unwrap().clone();
        let dup = SurfaceCatalogue::new(vec![us.clone(), us.clone()]);
        assert_eq!(dup, Err(CatalogueError::DuplicateGuid("NEW_TAB_EN_US".into())));
        us.publish_hour_local = 24;
        assert!(matches!(
            SurfaceCatalogue::new(vec![us]),
            Err(CatalogueError::InvalidPublishHour { hour: 24, .. })
        ));
        assert_eq!(SurfaceCatalogue::new(vec![]), Err(CatalogueError::Empty));
    }

    #[test]
    fn domain_allow_list_matches_parent_domains() {
        let mut surface = SurfaceCatalogue::builtin().get("NEW_TAB_EN_US").unwrap().clone();
        assert!(surface.allows_domain("anything.example"));
        surface.allowed_domains = Some(vec!["theatlantic.com".into()]);
        assert!(surface.allows_domain("www.theatlantic.com"));
        assert!(surface.allows_domain("amp.theatlantic.com"));
        assert!(!surface.allows_domain("nottheatlantic.com"));
    }

    #[test]
    fn publish_time_is_local_wall_clock() {
        let de = SurfaceCatalogue::builtin().get("NEW_TAB_DE_DE").unwrap().clone();
        let date = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let at = de.publish_at(date).unwrap();
        assert_eq!(at.to_rfc3339(), "2026-07-01T03:00:00+02:00");
    }

    #[test]
    fn surface_yaml_requires_every_weekday() {
        let yaml = r#"
guid: TEST
iana_timezone: Europe/Berlin
publish_hour_local: 3
allowed_sources: [ML]
cutoff_hours_by_weekday: { monday: 38, tuesday: 14, wednesday: 14, thursday: 14, friday: 14, saturday: 14 }
"#;
        assert!(serde_yaml::from_str::<ScheduledSurface>(yaml).is_err());
    }

    #[test]
    fn metadata_deserializes_camel_case_with_missing_fields() {
        let m: UrlMetadata = serde_json::from_str(
            r#"{"title":"T","imageUrl":"https://i.example/a.jpg","isSyndicated":true}"#,
        )
        .unwrap();
        assert_eq!(m.image_url.as_deref(), Some("https://i.example/a.jpg"));
        assert_eq!(m.is_syndicated, Some(true));
        assert!(m.excerpt.is_none());
    }
}
