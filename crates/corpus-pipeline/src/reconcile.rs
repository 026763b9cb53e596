//! Merge a validated candidate with parser metadata into an [`ApprovedItem`].
//!
//! Candidate values win whenever they are present; metadata only fills gaps.
//! `topic`, `status`, `source`, `url`, the surface and the date always come from
//! the candidate.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use corpus_adapters::ImageValidator;
use corpus_core::text::{format_quotes_dashes_de, format_quotes_en, TitleCaser};
use corpus_core::{ApprovedItem, Author, Candidate, CandidateErrorName, CorpusLanguage, UrlMetadata};
use thiserror::Error;
use tracing::warn;

const DATE_PUBLISHED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconciliationError {
    #[error("title is missing from both the candidate and the url metadata")]
    MissingTitle,
    #[error("excerpt is missing from both the candidate and the url metadata")]
    MissingExcerpt,
    #[error("language is missing from both the candidate and the url metadata")]
    MissingLanguage,
    #[error("url metadata language {0:?} is not a supported corpus language")]
    UnsupportedLanguage(String),
    #[error("image url is missing from both the candidate and the url metadata")]
    MissingImageUrl,
    #[error("image url {0} failed validation")]
    InvalidImage(String),
}

impl ReconciliationError {
    /// Output field that could not be resolved.
    pub fn field(&self) -> &'static str {
        match self {
            Self::MissingTitle => "title",
            Self::MissingExcerpt => "excerpt",
            Self::MissingLanguage | Self::UnsupportedLanguage(_) => "language",
            Self::MissingImageUrl | Self::InvalidImage(_) => "image_url",
        }
    }

    pub fn error_name(&self) -> Option<CandidateErrorName> {
        match self {
            Self::MissingTitle => Some(CandidateErrorName::MissingTitle),
            Self::MissingExcerpt => Some(CandidateErrorName::MissingExcerpt),
            Self::MissingImageUrl | Self::InvalidImage(_) => Some(CandidateErrorName::MissingImage),
            Self::MissingLanguage | Self::UnsupportedLanguage(_) => None,
        }
    }
}

/// Required fields after precedence resolution, before text formatting and
/// image validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFields {
    pub title: String,
    pub excerpt: String,
    pub language: CorpusLanguage,
    pub image_url: String,
}

// Whitespace-only counts as absent; anything else is passed through untouched.
fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn prefer(candidate: Option<&str>, metadata: Option<&str>) -> Option<String> {
    present(candidate).or(present(metadata)).map(ToString::to_string)
}

pub fn resolve_fields(
    candidate: &Candidate,
    metadata: &UrlMetadata,
) -> Result<ResolvedFields, ReconciliationError> {
    let title = prefer(candidate.title.as_deref(), metadata.title.as_deref())
        .ok_or(ReconciliationError::MissingTitle)?;
    let excerpt = prefer(candidate.excerpt.as_deref(), metadata.excerpt.as_deref())
        .ok_or(ReconciliationError::MissingExcerpt)?;
    let language = match (candidate.language, present(metadata.language.as_deref())) {
        (Some(language), _) => language,
        (None, Some(code)) => CorpusLanguage::from_metadata_code(code)
            .ok_or_else(|| ReconciliationError::UnsupportedLanguage(code.to_string()))?,
        (None, None) => return Err(ReconciliationError::MissingLanguage),
    };
    let image_url = prefer(candidate.image_url.as_deref(), metadata.image_url.as_deref())
        .ok_or(ReconciliationError::MissingImageUrl)?;
    Ok(ResolvedFields {
        title,
        excerpt,
        language,
        image_url,
    })
}

/// Apply the per-language typography to a resolved title and excerpt.
///
/// English titles are title-cased before their quotes are curled.
pub fn format_title_excerpt(
    language: CorpusLanguage,
    title: &str,
    excerpt: &str,
    caser: &TitleCaser,
) -> (String, String) {
    match language {
        CorpusLanguage::En => {
            let cased = caser.apply(title).unwrap_or_else(|| title.to_string());
            (
                format_quotes_en(&cased).unwrap_or(cased),
                format_quotes_en(excerpt).unwrap_or_else(|| excerpt.to_string()),
            )
        }
        CorpusLanguage::De => (
            format_quotes_dashes_de(title).unwrap_or_else(|| title.to_string()),
            format_quotes_dashes_de(excerpt).unwrap_or_else(|| excerpt.to_string()),
        ),
        _ => (title.to_string(), excerpt.to_string()),
    }
}

/// Metadata author csv first, candidate list otherwise; `sort_order` is 1-based.
pub fn resolve_authors(candidate: &Candidate, metadata: &UrlMetadata) -> Vec<Author> {
    let from_metadata: Vec<String> = metadata
        .authors
        .as_deref()
        .map(|csv| {
            csv.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    let names = if from_metadata.is_empty() {
        candidate
            .authors
            .iter()
            .flatten()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(ToString::to_string)
            .collect()
    } else {
        from_metadata
    };
    names
        .into_iter()
        .zip(1u32..)
        .map(|(name, sort_order)| Author { name, sort_order })
        .collect()
}

/// Normalize a parser `datePublished` to `YYYY-MM-DD HH:MM:SS` in UTC.
pub fn normalize_date_published(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).format(DATE_PUBLISHED_FORMAT).to_string());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, DATE_PUBLISHED_FORMAT) {
        return Some(dt.format(DATE_PUBLISHED_FORMAT).to_string());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.format(DATE_PUBLISHED_FORMAT).to_string())
}

/// Build the approved item. The resolved image url is checked by `images`
/// after every other required field has resolved.
pub async fn reconcile(
    candidate: &Candidate,
    metadata: &UrlMetadata,
    images: &dyn ImageValidator,
    caser: &TitleCaser,
) -> Result<ApprovedItem, ReconciliationError> {
    let resolved = resolve_fields(candidate, metadata)?;
    let image_url = images
        .validate_image_url(&resolved.image_url)
        .await
        .ok_or_else(|| ReconciliationError::InvalidImage(resolved.image_url.clone()))?;

    let (title, excerpt) =
        format_title_excerpt(resolved.language, &resolved.title, &resolved.excerpt, caser);

    let date_published = metadata.date_published.as_deref().and_then(|raw| {
        let normalized = normalize_date_published(raw);
        if normalized.is_none() {
            warn!(
                candidate_id = %candidate.candidate_id,
                date_published = raw,
                "dropping malformed datePublished"
            );
        }
        normalized
    });

    Ok(ApprovedItem {
        candidate_id: candidate.candidate_id.clone(),
        url: candidate.url.clone(),
        title,
        excerpt,
        status: candidate.status,
        language: resolved.language,
        publisher: present(metadata.publisher.as_deref()).map(ToString::to_string),
        date_published,
        image_url,
        topic: candidate.topic,
        source: candidate.source,
        is_collection: metadata.is_collection.unwrap_or(false),
        is_time_sensitive: false,
        is_syndicated: metadata.is_syndicated.unwrap_or(false),
        authors: resolve_authors(candidate, metadata),
        scheduled_date: candidate.scheduled_date.clone(),
        scheduled_surface_guid: candidate.surface_guid.clone(),
    })
}
