//! Left join of the B aggregates onto table C.

use std::collections::HashMap;

use bnati_core::columns::{C_REQUEST_NUMBER, OWNER_ORG, SUMMARY_EN, SUMMARY_FR};
use bnati_core::{AggregateRecord, JoinedRecord, Table};
use tracing::warn;

use crate::aggregate::join_unique_identifiers;

pub const EXPECTED_COLUMNS: [&str; 4] = [OWNER_ORG, C_REQUEST_NUMBER, SUMMARY_EN, SUMMARY_FR];

struct JoinTarget<'a> {
    sum: f64,
    identifiers: Vec<&'a str>,
}

/// Join C to the aggregates on `(owner_org, lowercase(request_number))`.
///
/// Produces exactly one record per row of C, in C's order. Aggregates whose
/// request numbers differ only by case collapse into a single join target.
pub fn join_requests(summaries: &Table, aggregates: &[AggregateRecord]) -> Vec<JoinedRecord> {
    let missing = summaries.missing_columns(&EXPECTED_COLUMNS);
    if !missing.is_empty() {
        warn!(
            table = summaries.name(),
            ?missing,
            "synthesizing absent columns as empty strings"
        );
    }

    let mut targets: HashMap<(&str, &str), JoinTarget<'_>> = HashMap::new();
    for aggregate in aggregates {
        let target = targets
            .entry((
                aggregate.owner_org.as_str(),
                aggregate.request_number_key.as_str(),
            ))
            .or_insert_with(|| JoinTarget {
                sum: 0.0,
                identifiers: Vec::new(),
            });
        target.sum += aggregate.informal_requests_sum;
        target
            .identifiers
            .extend(aggregate.identifiers.iter().map(String::as_str));
    }
    let targets: HashMap<(&str, &str), (f64, String)> = targets
        .into_iter()
        .map(|(key, target)| (key, (target.sum, join_unique_identifiers(target.identifiers))))
        .collect();

    summaries
        .rows()
        .iter()
        .map(|row| {
            let owner_org = row.get(OWNER_ORG);
            let request_number = row.get(C_REQUEST_NUMBER);
            let key = request_number.to_lowercase();
            let (informal_requests_sum, unique_identifiers) = targets
                .get(&(owner_org, key.as_str()))
                .cloned()
                .unwrap_or_default();
            let summary_en = row.get(SUMMARY_EN);
            let summary_fr = row.get(SUMMARY_FR);

            JoinedRecord {
                owner_org: owner_org.to_string(),
                request_number: request_number.to_string(),
                informal_requests_sum,
                unique_identifiers,
                summary_en: summary_en.to_string(),
                summary_fr: summary_fr.to_string(),
                haystack: format!("{summary_en} {summary_fr}").to_lowercase(),
            }
        })
        .collect()
}
