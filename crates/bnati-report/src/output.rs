//! Report artifact writers: JSON files or a SQLite database, plus the markdown brief.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::fs;

use crate::assemble::{render_brief, ReportPayload};

pub const REPORT_JSON: &str = "report.json";
pub const WEAK_MATCHES_JSON: &str = "weak_matches.json";
pub const REPORT_SQLITE: &str = "report.sqlite";
pub const BRIEF_MD: &str = "brief.md";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    #[default]
    Json,
    Sqlite,
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputMode::Json),
            "sqlite" | "db" => Ok(OutputMode::Sqlite),
            other => Err(format!(
                "unknown output mode `{other}` (expected json or sqlite)"
            )),
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::Json => f.write_str("json"),
            OutputMode::Sqlite => f.write_str("sqlite"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WrittenArtifacts {
    pub mode: String,
    pub files: Vec<PathBuf>,
}

pub async fn write_artifacts(
    out_dir: &Path,
    mode: OutputMode,
    payload: &ReportPayload,
) -> Result<WrittenArtifacts> {
    fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let mut files = match mode {
        OutputMode::Json => write_json_artifacts(out_dir, payload).await?,
        OutputMode::Sqlite => vec![write_sqlite_artifact(out_dir, payload).await?],
    };

    let brief_path = out_dir.join(BRIEF_MD);
    fs::write(&brief_path, render_brief(payload))
        .await
        .with_context(|| format!("writing {}", brief_path.display()))?;
    files.push(brief_path);

    Ok(WrittenArtifacts {
        mode: mode.to_string(),
        files,
    })
}

/// Pretty-printed UTF-8 JSON that rejects non-finite numbers.
pub fn to_strict_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let tree = serde_json::to_value(value).context("serializing report payload")?;
    ensure_no_nulls_from_numbers(&tree)?;
    serde_json::to_vec_pretty(&tree).context("encoding report payload")
}

// serde_json encodes NaN and infinities as null; string fields are never
// null, so any null in the tree came from a non-finite number.
fn ensure_no_nulls_from_numbers(value: &serde_json::Value) -> Result<()> {
    match value {
        serde_json::Value::Null => bail!("report payload contains a non-finite number"),
        serde_json::Value::Array(items) => items.iter().try_for_each(ensure_no_nulls_from_numbers),
        serde_json::Value::Object(map) => map.values().try_for_each(ensure_no_nulls_from_numbers),
        _ => Ok(()),
    }
}

pub async fn write_json_artifacts(out_dir: &Path, payload: &ReportPayload) -> Result<Vec<PathBuf>> {
    let report_path = out_dir.join(REPORT_JSON);
    fs::write(&report_path, to_strict_json(&payload.strong)?)
        .await
        .with_context(|| format!("writing {}", report_path.display()))?;

    let weak_path = out_dir.join(WEAK_MATCHES_JSON);
    fs::write(&weak_path, to_strict_json(&payload.weak)?)
        .await
        .with_context(|| format!("writing {}", weak_path.display()))?;

    Ok(vec![report_path, weak_path])
}

const SQLITE_SCHEMA: &str = r#"
CREATE TABLE report_meta (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
CREATE TABLE report_counts (
    name TEXT PRIMARY KEY NOT NULL,
    value INTEGER NOT NULL
);
CREATE TABLE strong_matches (
    owner_org TEXT NOT NULL,
    tracking_number TEXT NOT NULL,
    request_number TEXT NOT NULL,
    informal_requests_sum REAL NOT NULL,
    unique_identifiers TEXT NOT NULL,
    summary_en TEXT NOT NULL,
    summary_fr TEXT NOT NULL
);
CREATE TABLE weak_matches (
    owner_org TEXT NOT NULL,
    tracking_number TEXT NOT NULL
);
"#;

type SendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Recreate `report.sqlite` and fill it in a single transaction.
///
/// Returns a boxed `Send` future: the cron job requires the whole build to be `Send`.
pub fn write_sqlite_artifact<'a>(
    out_dir: &'a Path,
    payload: &'a ReportPayload,
) -> SendFuture<'a, Result<PathBuf>> {
    Box::pin(async move {
        let db_path = out_dir.join(REPORT_SQLITE);
        if fs::try_exists(&db_path)
            .await
            .with_context(|| format!("checking {}", db_path.display()))?
        {
            fs::remove_file(&db_path)
                .await
                .with_context(|| format!("removing stale {}", db_path.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("opening {}", db_path.display()))?;

        let mut tx = pool.begin().await.context("starting sqlite transaction")?;
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(SQLITE_SCHEMA))
            .await
            .context("creating report schema")?;

        let meta = &payload.strong.meta;
        for (key, value) in [
            ("run_id", meta.run_id.to_string()),
            ("generated_at", meta.generated_at.to_rfc3339()),
        ] {
            sqlx::Executor::execute(
                &mut *tx,
                sqlx::query("INSERT INTO report_meta (key, value) VALUES (?, ?)")
                    .bind(key)
                    .bind(value),
            )
            .await
            .with_context(|| format!("inserting report_meta {key}"))?;
        }

        let counts = meta.counts;
        for (name, value) in [
            ("A_rows", counts.a_rows),
            ("B_rows", counts.b_rows),
            ("C_rows", counts.c_rows),
            ("BC_rows", counts.bc_rows),
            ("matches", counts.matches),
            ("weak_matches", counts.weak_matches),
            ("strong_matches", counts.strong_matches),
        ] {
            sqlx::Executor::execute(
                &mut *tx,
                sqlx::query("INSERT INTO report_counts (name, value) VALUES (?, ?)")
                    .bind(name)
                    .bind(value as i64),
            )
            .await
            .with_context(|| format!("inserting report_counts {name}"))?;
        }

        for row in &payload.strong.rows {
            sqlx::Executor::execute(
                &mut *tx,
                sqlx::query(
                    "INSERT INTO strong_matches (owner_org, tracking_number, request_number, informal_requests_sum, unique_identifiers, summary_en, summary_fr) VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(row.owner_org.as_str())
                .bind(row.tracking_number.as_str())
                .bind(row.request_number.as_str())
                .bind(bnati_core::finite_or_zero(row.informal_requests_sum))
                .bind(row.unique_identifiers.as_str())
                .bind(row.summary_en.as_str())
                .bind(row.summary_fr.as_str()),
            )
            .await
            .context("inserting strong match")?;
        }

        for row in &payload.weak.rows {
            sqlx::Executor::execute(
                &mut *tx,
                sqlx::query("INSERT INTO weak_matches (owner_org, tracking_number) VALUES (?, ?)")
                    .bind(row.owner_org.as_str())
                    .bind(row.tracking_number.as_str()),
            )
            .await
            .context("inserting weak match")?;
        }

        tx.commit().await.context("committing report database")?;
        pool.close().await;
        Ok(db_path)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::{assemble_report, InputCounts};
    use crate::classify::ClassifiedMatches;
    use bnati_core::MatchRecord;
    use chrono::Utc;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn payload() -> ReportPayload {
        let record = |tracking_number: &str| MatchRecord {
            owner_org: "dept1".into(),
            tracking_number: tracking_number.into(),
            request_number: "r1".into(),
            informal_requests_sum: 5.0,
            unique_identifiers: "U1; U2".into(),
            summary_en: "réfère à bn-001".into(),
            summary_fr: String::new(),
        };
        assemble_report(
            Uuid::new_v4(),
            Utc::now(),
            InputCounts {
                a_rows: 2,
                b_rows: 2,
                c_rows: 1,
                bc_rows: 1,
            },
            ClassifiedMatches {
                strong: vec![record("BN-001")],
                weak: vec![record("na")],
            },
        )
    }

    #[test]
    fn output_mode_parses_case_insensitively() {
        assert_eq!("JSON".parse::<OutputMode>(), Ok(OutputMode::Json));
        assert_eq!(" sqlite ".parse::<OutputMode>(), Ok(OutputMode::Sqlite));
        assert!("csv".parse::<OutputMode>().is_err());
        assert_eq!(OutputMode::default().to_string(), "json");
    }

    #[test]
    fn strict_json_rejects_non_finite_numbers() {
        let mut payload = payload();
        payload.strong.rows[0].informal_requests_sum = f64::NAN;
        assert!(to_strict_json(&payload.strong).is_err());
    }

    #[tokio::test]
    async fn json_mode_writes_strong_weak_and_brief() {
        let dir = tempdir().expect("tempdir");
        let written = write_artifacts(dir.path(), OutputMode::Json, &payload())
            .await
            .expect("write");
        assert_eq!(written.files.len(), 3);

        let text = std::fs::read_to_string(dir.path().join(REPORT_JSON)).expect("read report");
        assert!(text.contains("réfère"));
        let report: serde_json::Value = serde_json::from_str(&text).expect("parse report");
        assert_eq!(report["meta"]["counts"]["A_rows"], 2);
        assert_eq!(report["meta"]["counts"]["strong_matches"], 1);
        assert_eq!(report["rows"][0]["tracking_number"], "BN-001");
        assert_eq!(report["rows"][0]["c_request_number"], "r1");
        assert_eq!(report["rows"][0]["informal_requests_sum"], 5.0);

        let weak: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join(WEAK_MATCHES_JSON)).expect("read weak"),
        )
        .expect("parse weak");
        assert_eq!(
            weak["rows"],
            serde_json::json!([{ "owner_org": "dept1", "tracking_number": "na" }])
        );
        assert!(dir.path().join(BRIEF_MD).exists());
    }

    #[tokio::test]
    async fn sqlite_mode_recreates_database() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join(REPORT_SQLITE), b"stale").expect("stale file");

        let written = write_artifacts(dir.path(), OutputMode::Sqlite, &payload())
            .await
            .expect("write");
        assert_eq!(written.files[0], dir.path().join(REPORT_SQLITE));

        let pool = SqlitePoolOptions::new()
            .connect_with(SqliteConnectOptions::new().filename(dir.path().join(REPORT_SQLITE)))
            .await
            .expect("open");
        let strong = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM strong_matches")
            .fetch_one(&pool)
            .await
            .expect("count strong");
        let weak = sqlx::query_scalar::<_, String>("SELECT tracking_number FROM weak_matches")
            .fetch_one(&pool)
            .await
            .expect("weak row");
        let matches =
            sqlx::query_scalar::<_, i64>("SELECT value FROM report_counts WHERE name = 'matches'")
                .fetch_one(&pool)
                .await
                .expect("matches count");
        let sum = sqlx::query_scalar::<_, f64>("SELECT informal_requests_sum FROM strong_matches")
            .fetch_one(&pool)
            .await
            .expect("sum");
        pool.close().await;

        assert_eq!(strong, 1);
        assert_eq!(weak, "na");
        assert_eq!(matches, 2);
        assert_eq!(sum, 5.0);
    }
}
