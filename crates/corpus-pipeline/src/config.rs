use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use corpus_core::text::TitleCaser;
use corpus_core::{CorpusItemSource, ScheduledSurface, SurfaceCatalogue};
use corpus_http::HttpClientConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_SURFACES_PATH: &str = "config/scheduled_surfaces.yaml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub enable_scheduled_date_validation: bool,
    pub expected_source: CorpusItemSource,
    pub surfaces_path: PathBuf,
    pub title_stopwords_path: Option<PathBuf>,
    pub parser_endpoint: Option<String>,
    pub image_proxy_endpoint: Option<String>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let expected_source = match lookup("CORPUS_EXPECTED_SOURCE") {
            Some(raw) => CorpusItemSource::parse(raw.trim()).unwrap_or_else(|| {
                warn!(value = %raw, "unknown CORPUS_EXPECTED_SOURCE, using ML");
                CorpusItemSource::Ml
            }),
            None => CorpusItemSource::Ml,
        };
        Self {
            enable_scheduled_date_validation: lookup("ENABLE_SCHEDULED_DATE_VALIDATION")
                .map(|v| !matches!(v.trim(), "0" | "false" | "FALSE" | "False"))
                .unwrap_or(true),
            expected_source,
            surfaces_path: lookup("CORPUS_SURFACES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SURFACES_PATH)),
            title_stopwords_path: lookup("CORPUS_TITLE_STOPWORDS_PATH").map(PathBuf::from),
            parser_endpoint: lookup("PARSER_ENDPOINT").filter(|v| !v.trim().is_empty()),
            image_proxy_endpoint: lookup("IMAGE_PROXY_ENDPOINT").filter(|v| !v.trim().is_empty()),
            user_agent: lookup("CORPUS_USER_AGENT")
                .unwrap_or_else(|| "corpus-scheduler/0.1".to_string()),
            http_timeout_secs: lookup("CORPUS_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }

    /// Read the surface catalogue and stoplist this config points at.
    pub fn load_settings(&self) -> Result<PipelineSettings> {
        let catalogue = load_surface_catalogue(&self.surfaces_path)?;
        let caser = match &self.title_stopwords_path {
            Some(path) => load_title_stopwords(path)?,
            None => TitleCaser::default(),
        };
        Ok(PipelineSettings {
            enable_scheduled_date_validation: self.enable_scheduled_date_validation,
            expected_source: self.expected_source,
            catalogue,
            caser,
        })
    }
}

/// Read-only inputs shared by every record in a run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub enable_scheduled_date_validation: bool,
    pub expected_source: CorpusItemSource,
    pub catalogue: SurfaceCatalogue,
    pub caser: TitleCaser,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            enable_scheduled_date_validation: true,
            expected_source: CorpusItemSource::Ml,
            catalogue: SurfaceCatalogue::builtin(),
            caser: TitleCaser::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SurfacesFile {
    pub surfaces: Vec<ScheduledSurface>,
}

/// Load the YAML catalogue at `path`, or the built-in one when the file is absent.
pub fn load_surface_catalogue(path: &Path) -> Result<SurfaceCatalogue> {
    if !path.exists() {
        info!(path = %path.display(), "surface catalogue file not found, using built-in surfaces");
        return Ok(SurfaceCatalogue::builtin());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let file: SurfacesFile =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    SurfaceCatalogue::new(file.surfaces).with_context(|| format!("validating {}", path.display()))
}

/// Load a YAML list of minor words for title casing.
pub fn load_title_stopwords(path: &Path) -> Result<TitleCaser> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let words: Vec<String> =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(TitleCaser::new(words))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use chrono::Weekday;
    use tempfile::tempdir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = PipelineConfig::default();
        assert!(config.enable_scheduled_date_validation);
        assert_eq!(config.expected_source, CorpusItemSource::Ml);
        assert_eq!(config.surfaces_path, PathBuf::from(DEFAULT_SURFACES_PATH));
        assert_eq!(config.parser_endpoint, None);
        assert_eq!(config.http_timeout_secs, 20);
    }

    #[test]
    fn scheduling_bypass_flag() {
        for off in ["0", "false", "FALSE", "False"] {
            let config =
                PipelineConfig::from_lookup(lookup(&[("ENABLE_SCHEDULED_DATE_VALIDATION", off)]));
            assert!(!config.enable_scheduled_date_validation, "{off}");
        }
        for on in ["1", "true", "yes"] {
            let config =
                PipelineConfig::from_lookup(lookup(&[("ENABLE_SCHEDULED_DATE_VALIDATION", on)]));
            assert!(config.enable_scheduled_date_validation, "{on}");
        }
    }

    #[test]
    fn overrides_are_read() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("CORPUS_EXPECTED_SOURCE", "MANUAL"),
            ("PARSER_ENDPOINT", "https://parser.example/v3/getItemListApi"),
            ("IMAGE_PROXY_ENDPOINT", " "),
            ("CORPUS_HTTP_TIMEOUT_SECS", "5"),
        ]));
        assert_eq!(config.expected_source, CorpusItemSource::Manual);
        assert_eq!(
            config.parser_endpoint.as_deref(),
            Some("https://parser.example/v3/getItemListApi")
        );
        assert_eq!(config.image_proxy_endpoint, None);
        assert_eq!(config.http_client_config().timeout, Duration::from_secs(5));

        let config = PipelineConfig::from_lookup(lookup(&[("CORPUS_EXPECTED_SOURCE", "ROBOT")]));
        assert_eq!(config.expected_source, CorpusItemSource::Ml);
    }

    #[test]
    fn missing_catalogue_file_uses_builtin() {
        let dir = tempdir().unwrap();
        let catalogue = load_surface_catalogue(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(catalogue, SurfaceCatalogue::builtin());
    }

    #[test]
    fn yaml_catalogue_is_loaded_and_validated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("surfaces.yaml");
        std::fs::write(
            &path,
            r#"
surfaces:
  - guid: NEW_TAB_EN_US
    iana_timezone: America/New_York
    publish_hour_local: 3
    cutoff_hours_by_weekday: {monday: 14, tuesday: 14, wednesday: 14, thursday: 14, friday: 14, saturday: 14, sunday: 32}
    allowed_sources: [ML, MANUAL]
    allowed_domains: [nytimes.com]
"#,
        )
        .unwrap();
        let catalogue = load_surface_catalogue(&path).unwrap();
        let us = catalogue.get("NEW_TAB_EN_US").unwrap();
        assert_eq!(us.iana_timezone, chrono_tz::America::New_York);
        assert_eq!(us.cutoff_hours_by_weekday.hours_for(Weekday::Sun), 32);
        assert_eq!(us.allowed_domains.as_deref(), Some(&["nytimes.com".to_string()][..]));
        assert_eq!(catalogue.guids(), vec!["NEW_TAB_EN_US"]);

        std::fs::write(
            &path,
            "surfaces:\n  - guid: X\n    iana_timezone: Mars/Olympus\n    publish_hour_local: 3\n    cutoff_hours_by_weekday: {monday: 1, tuesday: 1, wednesday: 1, thursday: 1, friday: 1, saturday: 1, sunday: 1}\n    allowed_sources: [ML]\n",
        )
        .unwrap();
        assert!(load_surface_catalogue(&path).is_err());

        std::fs::write(
            &path,
            "surfaces:\n  - guid: X\n    iana_timezone: UTC\n    publish_hour_local: 3\n    cutoff_hours_by_weekday: {monday: 1}\n    allowed_sources: [ML]\n",
        )
        .unwrap();
        let err = load_surface_catalogue(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parsing"));
    }

    #[test]
    fn stopword_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("minor_words.yaml");
        std::fs::write(&path, "- via\n- per\n").unwrap();
        let config = PipelineConfig {
            title_stopwords_path: Some(path),
            surfaces_path: dir.path().join("absent.yaml"),
            ..Default::default()
        };
        let settings = config.load_settings().unwrap();
        assert!(settings.caser.is_minor("via"));
        assert!(!settings.caser.is_minor("the"));
    }
}
