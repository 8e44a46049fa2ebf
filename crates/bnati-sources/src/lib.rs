//! Dataset locations, fetch sources and CSV parsing into string-typed tables.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use bnati_core::{Row, Table};
use bnati_http::{content_sha256, DownloadError, Downloader};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "bnati-sources";

pub const BRIEFING_NOTES_URL: &str =
    "https://open.canada.ca/data/en/datastore/dump/299a2e26-5103-4a49-ac3a-53db9fcc06c7?format=csv";
pub const INFORMAL_REQUESTS_URL: &str =
    "https://open.canada.ca/data/en/datastore/dump/e664cf3d-6cb7-4aaa-adfa-e459c2552e3e?format=csv";
pub const ATI_SUMMARIES_URL: &str =
    "https://open.canada.ca/data/en/datastore/dump/19383ca2-b01a-487d-88f7-e1ffbc7d39c2?format=csv";

/// The three inputs of the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dataset {
    /// A: briefing notes carrying `tracking_number`.
    BriefingNotes,
    /// B: completed requests with informal request counts.
    InformalRequests,
    /// C: request summaries with free-text `summary_en` / `summary_fr`.
    AtiSummaries,
}

impl Dataset {
    /// Short label used in counts and error messages.
    pub fn label(self) -> &'static str {
        match self {
            Dataset::BriefingNotes => "A",
            Dataset::InformalRequests => "B",
            Dataset::AtiSummaries => "C",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Dataset::BriefingNotes => "briefing-notes",
            Dataset::InformalRequests => "informal-requests",
            Dataset::AtiSummaries => "ati-summaries",
        }
    }

    pub fn default_url(self) -> &'static str {
        match self {
            Dataset::BriefingNotes => BRIEFING_NOTES_URL,
            Dataset::InformalRequests => INFORMAL_REQUESTS_URL,
            Dataset::AtiSummaries => ATI_SUMMARIES_URL,
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.slug())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetLocation {
    Url(String),
    File(PathBuf),
}

impl DatasetLocation {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            DatasetLocation::Url(trimmed.to_string())
        } else {
            DatasetLocation::File(PathBuf::from(trimmed))
        }
    }
}

impl fmt::Display for DatasetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetLocation::Url(url) => f.write_str(url),
            DatasetLocation::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FetchedDataset {
    pub dataset: Dataset,
    pub location: String,
    pub fetched_at: DateTime<Utc>,
    pub sha256: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("fetching {dataset} from {url}: {source}")]
    Fetch {
        dataset: Dataset,
        url: String,
        #[source]
        source: DownloadError,
    },
    #[error("reading {dataset} from {}: {source}", path.display())]
    Io {
        dataset: Dataset,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {dataset} csv: {source}")]
    Csv {
        dataset: Dataset,
        #[source]
        source: csv::Error,
    },
}

#[async_trait]
pub trait DatasetSource: Send + Sync {
    fn dataset(&self) -> Dataset;

    async fn fetch(
        &self,
        http: &Downloader,
        ctx: &FetchContext,
    ) -> Result<FetchedDataset, SourceError>;
}

pub struct HttpDatasetSource {
    dataset: Dataset,
    url: String,
}

impl HttpDatasetSource {
    pub fn new(dataset: Dataset, url: impl Into<String>) -> Self {
        Self {
            dataset,
            url: url.into(),
        }
    }
}

#[async_trait]
impl DatasetSource for HttpDatasetSource {
    fn dataset(&self) -> Dataset {
        self.dataset
    }

    async fn fetch(
        &self,
        http: &Downloader,
        ctx: &FetchContext,
    ) -> Result<FetchedDataset, SourceError> {
        let download = http
            .download(ctx.run_id, self.dataset.label(), &self.url)
            .await
            .map_err(|source| SourceError::Fetch {
                dataset: self.dataset,
                url: self.url.clone(),
                source,
            })?;
        Ok(FetchedDataset {
            dataset: self.dataset,
            location: download.final_url,
            fetched_at: ctx.fetched_at,
            sha256: download.sha256,
            body: download.body,
        })
    }
}

pub struct FileDatasetSource {
    dataset: Dataset,
    path: PathBuf,
}

impl FileDatasetSource {
    pub fn new(dataset: Dataset, path: impl Into<PathBuf>) -> Self {
        Self {
            dataset,
            path: path.into(),
        }
    }
}

#[async_trait]
impl DatasetSource for FileDatasetSource {
    fn dataset(&self) -> Dataset {
        self.dataset
    }

    async fn fetch(
        &self,
        _http: &Downloader,
        ctx: &FetchContext,
    ) -> Result<FetchedDataset, SourceError> {
        let body = tokio::fs::read(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                dataset: self.dataset,
                path: self.path.clone(),
                source,
            })?;
        Ok(FetchedDataset {
            dataset: self.dataset,
            location: self.path.display().to_string(),
            fetched_at: ctx.fetched_at,
            sha256: content_sha256(&body),
            body,
        })
    }
}

pub fn source_for_location(dataset: Dataset, location: &DatasetLocation) -> Box<dyn DatasetSource> {
    match location {
        DatasetLocation::Url(url) => Box::new(HttpDatasetSource::new(dataset, url.clone())),
        DatasetLocation::File(path) => Box::new(FileDatasetSource::new(dataset, path.clone())),
    }
}

/// Parse a CSV dump into a string-typed table.
///
/// Every cell stays a string and empty cells are `""`. Records shorter than the
/// header leave their trailing fields absent; longer ones lose the extra cells.
pub fn parse_csv_table(dataset: Dataset, bytes: &[u8]) -> Result<Table, SourceError> {
    let csv_error = |source: csv::Error| SourceError::Csv { dataset, source };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);

    let columns = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            // Open-data dumps start with a UTF-8 BOM.
            if idx == 0 {
                header.trim_start_matches('\u{feff}').to_string()
            } else {
                header.to_string()
            }
        })
        .collect::<Vec<_>>();

    let mut table = Table::new(dataset.label(), columns.clone());
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        let row: Row = columns
            .iter()
            .zip(record.iter())
            .map(|(column, value)| (column.as_str(), value))
            .collect();
        table.push_row(row);
    }

    debug!(
        dataset = dataset.slug(),
        rows = table.len(),
        columns = table.columns().len(),
        "parsed csv"
    );
    Ok(table)
}
