//! Counts and payload assembly for the report artifacts.

use std::collections::BTreeMap;

use bnati_core::{finite_or_zero, MatchRecord, ReportCounts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::ClassifiedMatches;

/// Row counts of the inputs and of the joined table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputCounts {
    pub a_rows: usize,
    pub b_rows: usize,
    pub c_rows: usize,
    pub bc_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMeta {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub counts: ReportCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrongReport {
    pub meta: ReportMeta,
    pub rows: Vec<MatchRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeakRow {
    pub owner_org: String,
    pub tracking_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeakReport {
    pub meta: ReportMeta,
    pub rows: Vec<WeakRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportPayload {
    pub strong: StrongReport,
    pub weak: WeakReport,
}

impl ReportPayload {
    pub fn counts(&self) -> ReportCounts {
        self.strong.meta.counts
    }
}

pub fn assemble_report(
    run_id: Uuid,
    generated_at: DateTime<Utc>,
    inputs: InputCounts,
    classified: ClassifiedMatches,
) -> ReportPayload {
    let counts = ReportCounts {
        a_rows: inputs.a_rows,
        b_rows: inputs.b_rows,
        c_rows: inputs.c_rows,
        bc_rows: inputs.bc_rows,
        matches: classified.total(),
        weak_matches: classified.weak.len(),
        strong_matches: classified.strong.len(),
    };
    let meta = ReportMeta {
        run_id,
        generated_at,
        counts,
    };

    let strong_rows = classified
        .strong
        .into_iter()
        .map(|mut record| {
            record.informal_requests_sum = finite_or_zero(record.informal_requests_sum);
            record
        })
        .collect();
    let weak_rows = classified
        .weak
        .into_iter()
        .map(|record| WeakRow {
            owner_org: record.owner_org,
            tracking_number: record.tracking_number,
        })
        .collect();

    ReportPayload {
        strong: StrongReport {
            meta: meta.clone(),
            rows: strong_rows,
        },
        weak: WeakReport {
            meta,
            rows: weak_rows,
        },
    }
}

/// Markdown digest of a build: counts plus strong matches per owner.
pub fn render_brief(payload: &ReportPayload) -> String {
    let meta = &payload.strong.meta;
    let counts = &meta.counts;

    let mut owner_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for row in &payload.strong.rows {
        *owner_counts.entry(row.owner_org.as_str()).or_default() += 1;
    }

    let owners = if owner_counts.is_empty() {
        "- none".to_string()
    } else {
        owner_counts
            .iter()
            .map(|(owner, n)| format!("- {owner}: {n}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "# BN/ATI Report Brief\n\n- Run ID: `{}`\n- Generated: {}\n- A rows: {}\n- B rows: {}\n- C rows: {}\n- BC rows: {}\n- Matches: {} (strong {}, weak {})\n\n## Strong Matches by owner_org\n{}\n",
        meta.run_id,
        meta.generated_at,
        counts.a_rows,
        counts.b_rows,
        counts.c_rows,
        counts.bc_rows,
        counts.matches,
        counts.strong_matches,
        counts.weak_matches,
        owners
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(owner: &str, tracking_number: &str, sum: f64) -> MatchRecord {
        MatchRecord {
            owner_org: owner.into(),
            tracking_number: tracking_number.into(),
            request_number: "r1".into(),
            informal_requests_sum: sum,
            unique_identifiers: String::new(),
            summary_en: String::new(),
            summary_fr: String::new(),
        }
    }

    fn generated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 7, 0, 0).single().unwrap()
    }

    #[test]
    fn counts_cover_inputs_and_both_buckets() {
        let classified = ClassifiedMatches {
            strong: vec![record("dept1", "BN-1", 1.0), record("dept2", "BN-2", 2.0)],
            weak: vec![record("dept1", "na", 0.0)],
        };
        let inputs = InputCounts {
            a_rows: 10,
            b_rows: 20,
            c_rows: 30,
            bc_rows: 30,
        };
        let payload = assemble_report(Uuid::nil(), generated_at(), inputs, classified);
        let counts = payload.counts();

        assert_eq!(counts.a_rows, 10);
        assert_eq!(counts.bc_rows, 30);
        assert_eq!(counts.matches, 3);
        assert_eq!(counts.strong_matches, 2);
        assert_eq!(counts.weak_matches, 1);
        assert_eq!(counts.weak_matches + counts.strong_matches, counts.matches);
        assert_eq!(payload.weak.meta, payload.strong.meta);
        assert_eq!(
            payload.weak.rows,
            vec![WeakRow {
                owner_org: "dept1".into(),
                tracking_number: "na".into()
            }]
        );
    }

    #[test]
    fn non_finite_sums_are_zeroed() {
        let classified = ClassifiedMatches {
            strong: vec![record("dept1", "BN-1", f64::INFINITY), record("dept1", "BN-2", f64::NAN)],
            weak: vec![],
        };
        let payload = assemble_report(Uuid::nil(), generated_at(), InputCounts::default(), classified);
        assert!(payload
            .strong
            .rows
            .iter()
            .all(|r| r.informal_requests_sum == 0.0));
    }

    #[test]
    fn brief_lists_strong_matches_per_owner() {
        let classified = ClassifiedMatches {
            strong: vec![
                record("dept2", "BN-2", 2.0),
                record("dept1", "BN-1", 1.0),
                record("dept2", "BN-3", 2.0),
            ],
            weak: vec![],
        };
        let payload = assemble_report(Uuid::nil(), generated_at(), InputCounts::default(), classified);
        let brief = render_brief(&payload);

        assert!(brief.starts_with("# BN/ATI Report Brief"));
        assert!(brief.contains("- Matches: 3 (strong 3, weak 0)"));
        assert!(brief.contains("- dept1: 1\n- dept2: 2"));

        let empty = assemble_report(
            Uuid::nil(),
            generated_at(),
            InputCounts::default(),
            ClassifiedMatches::default(),
        );
        assert!(render_brief(&empty).contains("- none"));
    }
}
