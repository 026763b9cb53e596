use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use corpus_adapters::{
    EventEmitter, FixtureMetadataSource, ImageValidator, JsonLinesSink, MetadataSource,
    PassthroughImageValidator, ProxyImageValidator, TracingEventEmitter,
};
use corpus_http::HttpFetcher;
use corpus_pipeline::{
    parse_batch, BatchSummary, CandidatePipeline, FailureReport, FixedClock, PipelineConfig,
    ProcessedCandidate, ValidatedCandidate,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "corpus-cli")]
#[command(about = "Validate and schedule ML corpus candidates")]
struct Cli {
    /// Emit logs as JSON lines instead of compact text.
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate, reconcile and submit every candidate in a batch file.
    Process {
        /// Batch payload (`-` for stdin).
        input: PathBuf,
        /// Read url metadata from a JSON fixture instead of PARSER_ENDPOINT.
        #[arg(long)]
        metadata_fixture: Option<PathBuf>,
        /// Accept any http(s) image url without probing it.
        #[arg(long)]
        offline_images: bool,
        /// Append approved items to this JSON-lines file.
        #[arg(long)]
        sink: Option<PathBuf>,
        /// Evaluate lead times as of this RFC 3339 instant.
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Run only the offline structure and scheduling checks.
    Validate {
        input: PathBuf,
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Print the scheduled surface catalogue in use.
    Surfaces,
}

#[derive(Debug, Serialize)]
struct RunReport<T> {
    summary: BatchSummary,
    succeeded: Vec<T>,
    failed: Vec<FailureReport>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().compact().with_writer(std::io::stderr)).init();
    }
}

fn read_payload(input: &Path) -> Result<String> {
    if input == Path::new("-") {
        let mut payload = String::new();
        std::io::stdin()
            .read_to_string(&mut payload)
            .context("reading batch from stdin")?;
        return Ok(payload);
    }
    std::fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))
}

fn build_pipeline(
    config: &PipelineConfig,
    metadata_fixture: Option<&Path>,
    offline_images: bool,
) -> Result<CandidatePipeline> {
    if metadata_fixture.is_none() && !offline_images {
        return CandidatePipeline::from_config(config);
    }

    let settings = config.load_settings()?;
    let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
    let metadata: Arc<dyn MetadataSource> = match metadata_fixture {
        Some(path) => Arc::new(FixtureMetadataSource::load(path)?),
        None => {
            let endpoint = config
                .parser_endpoint
                .as_deref()
                .context("PARSER_ENDPOINT is not set and no --metadata-fixture given")?;
            Arc::new(corpus_adapters::HttpMetadataSource::new(http.clone(), endpoint)?)
        }
    };
    let images: Arc<dyn ImageValidator> = if offline_images {
        Arc::new(PassthroughImageValidator)
    } else {
        Arc::new(ProxyImageValidator::new(
            http,
            config.image_proxy_endpoint.as_deref(),
        )?)
    };
    let events: Arc<dyn EventEmitter> = Arc::new(TracingEventEmitter);
    Ok(CandidatePipeline::new(settings, metadata, images, events))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serializing report")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let config = PipelineConfig::from_env();

    match cli.command {
        Commands::Process {
            input,
            metadata_fixture,
            offline_images,
            sink,
            now,
        } => {
            let payload = read_payload(&input)?;
            let mut pipeline =
                build_pipeline(&config, metadata_fixture.as_deref(), offline_images)?;
            if let Some(path) = sink {
                pipeline = pipeline.with_sink(Arc::new(JsonLinesSink::new(path)));
            }
            if let Some(now) = now {
                pipeline = pipeline.with_clock(Arc::new(FixedClock(now)));
            }
            let outcome = pipeline.process_payload(&payload).await?;
            let report: RunReport<ProcessedCandidate> = RunReport {
                summary: outcome.summary(),
                failed: outcome.failure_reports(),
                succeeded: outcome.succeeded,
            };
            print_json(&report)?;
        }
        Commands::Validate { input, now } => {
            let records = parse_batch(&read_payload(&input)?)?;
            // Offline checks never touch the collaborators.
            let mut pipeline = CandidatePipeline::new(
                config.load_settings()?,
                Arc::new(FixtureMetadataSource::default()),
                Arc::new(PassthroughImageValidator),
                Arc::new(TracingEventEmitter),
            );
            if let Some(now) = now {
                pipeline = pipeline.with_clock(Arc::new(FixedClock(now)));
            }
            let outcome = pipeline.validate_batch(records).await;
            let report: RunReport<ValidatedCandidate> = RunReport {
                summary: outcome.summary(),
                failed: outcome.failure_reports(),
                succeeded: outcome.succeeded,
            };
            print_json(&report)?;
        }
        Commands::Surfaces => {
            let catalogue = corpus_pipeline::load_surface_catalogue(&config.surfaces_path)?;
            info!(count = catalogue.surfaces().len(), "loaded scheduled surfaces");
            print!(
                "{}",
                serde_yaml::to_string(&corpus_pipeline::config::SurfacesFile {
                    surfaces: catalogue.surfaces().to_vec(),
                })
                .context("serializing surfaces")?
            );
        }
    }

    Ok(())
}
