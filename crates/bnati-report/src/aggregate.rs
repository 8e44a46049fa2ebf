//! Per-request aggregation of table B.

use std::collections::{BTreeMap, BTreeSet};

use bnati_core::columns::{B_INFORMAL_REQUESTS, B_REQUEST_NUMBER, B_UNIQUE_IDENTIFIER, OWNER_ORG};
use bnati_core::{AggregateRecord, SchemaError, Table};

pub const REQUIRED_COLUMNS: [&str; 4] = [
    OWNER_ORG,
    B_REQUEST_NUMBER,
    B_INFORMAL_REQUESTS,
    B_UNIQUE_IDENTIFIER,
];

#[derive(Default)]
struct GroupAccumulator<'a> {
    sum: f64,
    identifiers: BTreeSet<&'a str>,
}

/// Group B by the exact `(owner_org, Request Number)` pair.
///
/// Output is ordered by the group key.
pub fn aggregate_informal_requests(table: &Table) -> Result<Vec<AggregateRecord>, SchemaError> {
    table.require_columns(&REQUIRED_COLUMNS)?;

    let mut groups: BTreeMap<(&str, &str), GroupAccumulator<'_>> = BTreeMap::new();
    for row in table.rows() {
        let group = groups
            .entry((row.get(OWNER_ORG), row.get(B_REQUEST_NUMBER)))
            .or_default();
        group.sum += parse_measure(row.get(B_INFORMAL_REQUESTS));
        let identifier = row.get(B_UNIQUE_IDENTIFIER).trim();
        if !identifier.is_empty() {
            group.identifiers.insert(identifier);
        }
    }

    Ok(groups
        .into_iter()
        .map(|((owner_org, request_number), group)| AggregateRecord {
            owner_org: owner_org.to_string(),
            request_number: request_number.to_string(),
            request_number_key: request_number.to_lowercase(),
            informal_requests_sum: group.sum,
            identifiers: group.identifiers.into_iter().map(str::to_string).collect(),
        })
        .collect())
}

/// Numeric cell value; blanks, junk and non-finite values count as zero.
pub fn parse_measure(raw: &str) -> f64 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Trim, drop blanks, dedup, sort and join with `"; "`.
pub fn join_unique_identifiers<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    values
        .into_iter()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>()
        .join("; ")
}
