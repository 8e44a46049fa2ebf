//! BN/ATI report build: load A/B/C, aggregate, join, match, classify, write artifacts.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result};
use bnati_core::{SchemaError, Table};
use bnati_http::{Downloader, DownloaderConfig, RetryPolicy};
use bnati_sources::{parse_csv_table, source_for_location, Dataset, DatasetLocation, FetchContext};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod aggregate;
pub mod assemble;
pub mod classify;
pub mod join;
pub mod matching;
pub mod output;

pub use assemble::{InputCounts, ReportPayload};
pub use classify::{ClassifiedMatches, WeakIdentifierList};
pub use output::OutputMode;

pub const CRATE_NAME: &str = "bnati-report";

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("building identifier automaton for owner_org {owner_org}: {source}")]
    Automaton {
        owner_org: String,
        #[source]
        source: aho_corasick::BuildError,
    },
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub briefing_notes: DatasetLocation,
    pub informal_requests: DatasetLocation,
    pub ati_summaries: DatasetLocation,
    pub out_dir: PathBuf,
    pub output_mode: OutputMode,
    pub chunk_size: usize,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub http_attempts: usize,
    pub scheduler_enabled: bool,
    pub cron: String,
    pub workspace_root: PathBuf,
}

impl ReportConfig {
    pub fn from_env() -> Self {
        let location = |var: &str, dataset: Dataset| {
            DatasetLocation::parse(
                &std::env::var(var).unwrap_or_else(|_| dataset.default_url().to_string()),
            )
        };
        Self {
            briefing_notes: location("BNATI_A_SOURCE", Dataset::BriefingNotes),
            informal_requests: location("BNATI_B_SOURCE", Dataset::InformalRequests),
            ati_summaries: location("BNATI_C_SOURCE", Dataset::AtiSummaries),
            out_dir: std::env::var("BNATI_OUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("docs")),
            output_mode: std::env::var("BNATI_OUTPUT_MODE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            chunk_size: std::env::var("BNATI_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(matching::DEFAULT_CHUNK_SIZE),
            user_agent: std::env::var("BNATI_USER_AGENT")
                .unwrap_or_else(|_| "bnati-report/0.1".to_string()),
            http_timeout_secs: std::env::var("BNATI_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(90),
            http_attempts: std::env::var("BNATI_HTTP_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(RetryPolicy::default().attempts),
            scheduler_enabled: std::env::var("BNATI_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            cron: std::env::var("BNATI_CRON").unwrap_or_else(|_| "0 0 7 * * *".to_string()),
            workspace_root: PathBuf::from("."),
        }
    }

    pub fn location_for(&self, dataset: Dataset) -> &DatasetLocation {
        match dataset {
            Dataset::BriefingNotes => &self.briefing_notes,
            Dataset::InformalRequests => &self.informal_requests,
            Dataset::AtiSummaries => &self.ati_summaries,
        }
    }
}

/// The three parsed inputs.
#[derive(Debug, Clone)]
pub struct InputTables {
    pub briefing_notes: Table,
    pub informal_requests: Table,
    pub ati_summaries: Table,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub chunk_size: usize,
    pub weak_identifiers: WeakIdentifierList,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            chunk_size: matching::DEFAULT_CHUNK_SIZE,
            weak_identifiers: WeakIdentifierList::default(),
        }
    }
}

/// Run every stage over already-loaded tables. Pure and synchronous.
pub fn build_report(tables: &InputTables, options: &BuildOptions) -> Result<ReportPayload, StageError> {
    let aggregates = aggregate::aggregate_informal_requests(&tables.informal_requests)?;
    info!(
        b_rows = tables.informal_requests.len(),
        aggregates = aggregates.len(),
        "aggregated informal requests"
    );

    let joined = join::join_requests(&tables.ati_summaries, &aggregates);
    info!(
        c_rows = tables.ati_summaries.len(),
        bc_rows = joined.len(),
        "joined summaries"
    );

    let matches =
        matching::match_tracking_numbers(&tables.briefing_notes, &joined, options.chunk_size)?;
    let classified = classify::classify_matches(matches, &options.weak_identifiers);
    info!(
        a_rows = tables.briefing_notes.len(),
        matches = classified.total(),
        strong = classified.strong.len(),
        weak = classified.weak.len(),
        "classified matches"
    );

    let inputs = InputCounts {
        a_rows: tables.briefing_notes.len(),
        b_rows: tables.informal_requests.len(),
        c_rows: tables.ati_summaries.len(),
        bc_rows: joined.len(),
    };
    Ok(assemble::assemble_report(
        options.run_id,
        options.generated_at,
        inputs,
        classified,
    ))
}

/// Where one input of a run came from and what exactly was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputFingerprint {
    pub dataset: Dataset,
    pub location: String,
    pub fetched_at: DateTime<Utc>,
    pub sha256: String,
    pub bytes: usize,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub inputs: Vec<InputFingerprint>,
    pub counts: bnati_core::ReportCounts,
    pub output_mode: String,
    pub artifacts: Vec<PathBuf>,
}

pub struct ReportBuilder {
    config: ReportConfig,
    http: Downloader,
    weak_identifiers: WeakIdentifierList,
}

impl ReportBuilder {
    pub fn new(config: ReportConfig) -> Result<Self> {
        let http = Downloader::new(DownloaderConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: config.user_agent.clone(),
            retry: RetryPolicy {
                attempts: config.http_attempts,
                ..Default::default()
            },
        })?;
        let weak_identifiers = WeakIdentifierList::from_workspace_root(&config.workspace_root)?;
        Ok(Self {
            config,
            http,
            weak_identifiers,
        })
    }

    pub fn with_weak_identifiers(mut self, weak_identifiers: WeakIdentifierList) -> Self {
        self.weak_identifiers = weak_identifiers;
        self
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    pub async fn run_once(&self) -> Result<ReportRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        self.run_with_id(run_id, started_at)
            .instrument(info_span!("report_build", %run_id))
            .await
    }

    async fn run_with_id(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<ReportRunSummary> {
        let ctx = FetchContext {
            run_id,
            fetched_at: started_at,
        };
        let (informal_requests, b_input) = self.load_table(Dataset::InformalRequests, &ctx).await?;
        let (ati_summaries, c_input) = self.load_table(Dataset::AtiSummaries, &ctx).await?;
        let (briefing_notes, a_input) = self.load_table(Dataset::BriefingNotes, &ctx).await?;
        let tables = InputTables {
            briefing_notes,
            informal_requests,
            ati_summaries,
        };

        let options = BuildOptions {
            run_id,
            generated_at: Utc::now(),
            chunk_size: self.config.chunk_size,
            weak_identifiers: self.weak_identifiers.clone(),
        };
        let payload = build_report(&tables, &options).context("building report")?;

        let written =
            output::write_artifacts(&self.config.out_dir, self.config.output_mode, &payload)
                .await?;
        for file in &written.files {
            info!(path = %file.display(), "wrote artifact");
        }

        Ok(ReportRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            inputs: vec![a_input, b_input, c_input],
            counts: payload.counts(),
            output_mode: written.mode,
            artifacts: written.files,
        })
    }

    async fn load_table(
        &self,
        dataset: Dataset,
        ctx: &FetchContext,
    ) -> Result<(Table, InputFingerprint)> {
        let location = self.config.location_for(dataset);
        info!(dataset = dataset.label(), %location, "loading dataset");

        let source = source_for_location(dataset, location);
        let fetched = source.fetch(&self.http, ctx).await?;
        let table = parse_csv_table(dataset, &fetched.body)?;
        info!(
            dataset = dataset.label(),
            rows = table.len(),
            sha256 = %fetched.sha256,
            "dataset loaded"
        );

        let fingerprint = InputFingerprint {
            dataset,
            location: fetched.location,
            fetched_at: fetched.fetched_at,
            sha256: fetched.sha256,
            bytes: fetched.body.len(),
            rows: table.len(),
        };
        Ok((table, fingerprint))
    }

    /// A cron scheduler that rebuilds the report, when enabled in the config.
    pub async fn maybe_build_scheduler(&self) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = &self.config.cron;
        let config = self.config.clone();
        let weak_identifiers = self.weak_identifiers.clone();
        let job = Job::new_async(cron, move |_uuid, _l| {
            scheduled_build(config.clone(), weak_identifiers.clone())
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}

/// One cron-triggered build with a fresh builder; failures are logged, not propagated.
fn scheduled_build(
    config: ReportConfig,
    weak_identifiers: WeakIdentifierList,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let result = match ReportBuilder::new(config) {
            Ok(builder) => builder.with_weak_identifiers(weak_identifiers).run_once().await,
            Err(err) => Err(err),
        };
        match result {
            Ok(summary) => info!(
                run_id = %summary.run_id,
                matches = summary.counts.matches,
                "scheduled report build complete"
            ),
            Err(err) => error!(error = ?err, "scheduled report build failed"),
        }
    })
}

pub async fn run_report_once_from_env() -> Result<ReportRunSummary> {
    ReportBuilder::new(ReportConfig::from_env())?.run_once().await
}

/// Markdown overview of a previously written `report.json`.
pub fn report_summary_markdown(out_dir: &Path) -> Result<String> {
    let report_path = out_dir.join(output::REPORT_JSON);
    let report: assemble::StrongReport = serde_json::from_str(
        &std::fs::read_to_string(&report_path)
            .with_context(|| format!("reading {}", report_path.display()))?,
    )
    .with_context(|| format!("parsing {}", report_path.display()))?;

    let counts = report.meta.counts;
    if counts.strong_matches != report.rows.len() {
        warn!(
            declared = counts.strong_matches,
            rows = report.rows.len(),
            "report row count disagrees with its counts block"
        );
    }

    let mut lines = vec![
        "# BN/ATI Report Summary".to_string(),
        String::new(),
        format!("## Run `{}`", report.meta.run_id),
        format!("- generated: {}", report.meta.generated_at),
        format!(
            "- rows: A {} / B {} / C {} / BC {}",
            counts.a_rows, counts.b_rows, counts.c_rows, counts.bc_rows
        ),
        format!(
            "- matches: {} (strong {}, weak {})",
            counts.matches, counts.strong_matches, counts.weak_matches
        ),
        format!("- report: `{}`", report_path.display()),
    ];
    for extra in [output::WEAK_MATCHES_JSON, output::REPORT_SQLITE, output::BRIEF_MD] {
        let path = out_dir.join(extra);
        if path.exists() {
            lines.push(format!("- {extra}: `{}`", path.display()));
        }
    }
    lines.push(String::new());
    Ok(lines.join("\n"))
}
