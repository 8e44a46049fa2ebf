//! Per-owner tracking number search over the joined summaries.
//!
//! Identifiers are lowercased and searched as plain substrings of the
//! lowercased haystack, in bounded chunks, each chunk compiled into one
//! Aho-Corasick automaton. No word boundaries apply: `ab12` matches `xab12y`.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use aho_corasick::AhoCorasick;
use bnati_core::columns::{OWNER_ORG, TRACKING_NUMBER};
use bnati_core::{JoinedRecord, MatchRecord, Table};
use tracing::{debug, info};

use crate::StageError;

pub const DEFAULT_CHUNK_SIZE: usize = 400;

pub const REQUIRED_COLUMNS: [&str; 2] = [OWNER_ORG, TRACKING_NUMBER];

/// Tracking numbers of one owner, keyed by their lowercase form.
///
/// The first original spelling seen for a lowercase form is its canonical casing.
#[derive(Debug, Clone, Default)]
pub struct IdentifierIndex {
    canonical: HashMap<String, String>,
    ordered: Vec<String>,
}

impl IdentifierIndex {
    pub fn insert(&mut self, original: &str) {
        let lowered = original.to_lowercase();
        if lowered.is_empty() || self.canonical.contains_key(&lowered) {
            return;
        }
        self.canonical.insert(lowered.clone(), original.to_string());
        self.ordered.push(lowered);
    }

    /// Distinct non-empty lowercase identifiers in first-seen order.
    pub fn identifiers(&self) -> &[String] {
        &self.ordered
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn canonical<'a>(&'a self, lowered: &'a str) -> &'a str {
        self.canonical
            .get(lowered)
            .map(String::as_str)
            .unwrap_or(lowered)
    }
}

/// Find every (tracking number, joined record) pair of the same owner where
/// the tracking number occurs in the record's haystack.
///
/// Owners are visited in ascending order; duplicates are dropped keeping the
/// first occurrence.
pub fn match_tracking_numbers(
    tracking: &Table,
    joined: &[JoinedRecord],
    chunk_size: usize,
) -> Result<Vec<MatchRecord>, StageError> {
    tracking.require_columns(&REQUIRED_COLUMNS)?;
    let chunk_size = chunk_size.max(1);

    let mut indexes: BTreeMap<&str, IdentifierIndex> = BTreeMap::new();
    for row in tracking.rows() {
        indexes
            .entry(row.get(OWNER_ORG))
            .or_default()
            .insert(row.get(TRACKING_NUMBER));
    }

    let mut records_by_owner: HashMap<&str, Vec<&JoinedRecord>> = HashMap::new();
    for record in joined {
        records_by_owner
            .entry(record.owner_org.as_str())
            .or_default()
            .push(record);
    }

    let owners: Vec<&str> = indexes
        .keys()
        .copied()
        .filter(|owner| records_by_owner.contains_key(owner))
        .collect();
    info!(owners = owners.len(), chunk_size, "matching across owner_org groups");

    let mut matches = Vec::new();
    for owner in owners {
        let index = &indexes[owner];
        if index.is_empty() {
            debug!(owner_org = owner, "no tracking numbers; skipping");
            continue;
        }
        let records = &records_by_owner[owner];
        let before = matches.len();
        match_owner(owner, index, records, chunk_size, &mut matches)?;
        debug!(
            owner_org = owner,
            identifiers = index.identifiers().len(),
            records = records.len(),
            matches = matches.len() - before,
            "owner matched"
        );
    }

    Ok(dedup_matches(matches))
}

fn match_owner(
    owner: &str,
    index: &IdentifierIndex,
    records: &[&JoinedRecord],
    chunk_size: usize,
    out: &mut Vec<MatchRecord>,
) -> Result<(), StageError> {
    for chunk in index.identifiers().chunks(chunk_size) {
        let automaton = AhoCorasick::new(chunk).map_err(|source| StageError::Automaton {
            owner_org: owner.to_string(),
            source,
        })?;

        for record in records {
            // Overlapping search reports every identifier, including ones
            // nested inside another match.
            let hits: BTreeSet<usize> = automaton
                .find_overlapping_iter(record.haystack.as_str())
                .map(|m| m.pattern().as_usize())
                .collect();

            for pattern in hits {
                out.push(MatchRecord {
                    owner_org: record.owner_org.clone(),
                    tracking_number: index.canonical(&chunk[pattern]).to_string(),
                    request_number: record.request_number.clone(),
                    informal_requests_sum: record.informal_requests_sum,
                    unique_identifiers: record.unique_identifiers.clone(),
                    summary_en: record.summary_en.clone(),
                    summary_fr: record.summary_fr.clone(),
                });
            }
        }
    }
    Ok(())
}

type MatchKey = (String, String, String, u64, String, String, String);

fn match_key(record: &MatchRecord) -> MatchKey {
    (
        record.owner_org.clone(),
        record.tracking_number.clone(),
        record.request_number.clone(),
        // +0.0 folds -0.0 into 0.0 so equal sums share a key.
        (record.informal_requests_sum + 0.0).to_bits(),
        record.unique_identifiers.clone(),
        record.summary_en.clone(),
        record.summary_fr.clone(),
    )
}

/// Remove exact full-row duplicates, keeping the first occurrence.
pub fn dedup_matches(matches: Vec<MatchRecord>) -> Vec<MatchRecord> {
    let mut seen: HashSet<MatchKey> = HashSet::with_capacity(matches.len());
    matches
        .into_iter()
        .filter(|record| seen.insert(match_key(record)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bnati_core::Row;

    fn a_table(rows: &[(&str, &str)]) -> Table {
        let mut table = Table::new(
            "A",
            REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
        );
        for (owner, tracking) in rows {
            let row: Row = [(OWNER_ORG, *owner), (TRACKING_NUMBER, *tracking)]
                .into_iter()
                .collect();
            table.push_row(row);
        }
        table
    }

    fn joined(owner: &str, request: &str, en: &str, fr: &str) -> JoinedRecord {
        JoinedRecord {
            owner_org: owner.to_string(),
            request_number: request.to_string(),
            informal_requests_sum: 1.0,
            unique_identifiers: String::new(),
            summary_en: en.to_string(),
            summary_fr: fr.to_string(),
            haystack: format!("{en} {fr}").to_lowercase(),
        }
    }

    fn tracking_numbers(matches: &[MatchRecord]) -> Vec<&str> {
        matches.iter().map(|m| m.tracking_number.as_str()).collect()
    }

    #[test]
    fn identifiers_match_inside_longer_tokens() {
        let tracking = a_table(&[("dept1", "AB12")]);
        let records = [joined("dept1", "r1", "see xAB12y", "")];
        let matches = match_tracking_numbers(&tracking, &records, DEFAULT_CHUNK_SIZE).expect("match");
        assert_eq!(tracking_numbers(&matches), vec!["AB12"]);
    }

    #[test]
    fn canonical_casing_is_restored() {
        let tracking = a_table(&[("X", "AB-99")]);
        let records = [joined("X", "r1", "mentions ab-99 here", "")];
        let matches = match_tracking_numbers(&tracking, &records, DEFAULT_CHUNK_SIZE).expect("match");
        assert_eq!(tracking_numbers(&matches), vec!["AB-99"]);
    }

    #[test]
    fn first_seen_spelling_is_canonical() {
        let mut index = IdentifierIndex::default();
        index.insert("Bn-7");
        index.insert("BN-7");
        index.insert("bn-7");
        index.insert("");
        assert_eq!(index.identifiers(), ["bn-7"]);
        assert_eq!(index.canonical("bn-7"), "Bn-7");
        assert_eq!(index.canonical("unknown"), "unknown");

        let tracking = a_table(&[("X", "Bn-7"), ("X", "BN-7")]);
        let records = [joined("X", "r1", "BN-7", "")];
        let matches = match_tracking_numbers(&tracking, &records, 1).expect("match");
        assert_eq!(tracking_numbers(&matches), vec!["Bn-7"]);
    }

    #[test]
    fn owners_never_match_across_groups() {
        let tracking = a_table(&[("X", "BN-1"), ("Y", "BN-2")]);
        let records = [
            joined("Y", "r1", "bn-1 is text of X", ""),
            joined("X", "r2", "bn-2 is text of Y", ""),
        ];
        let matches = match_tracking_numbers(&tracking, &records, DEFAULT_CHUNK_SIZE).expect("match");
        assert!(matches.is_empty());
    }

    #[test]
    fn every_distinct_identifier_in_a_haystack_is_emitted() {
        let tracking = a_table(&[("X", "AB"), ("X", "ABC"), ("X", "Q-1"), ("X", "zz")]);
        let records = [
            joined("X", "r1", "refers to abc and", "Q-1"),
            joined("X", "r2", "nothing", "ici"),
        ];
        let matches = match_tracking_numbers(&tracking, &records, DEFAULT_CHUNK_SIZE).expect("match");
        assert_eq!(tracking_numbers(&matches), vec!["AB", "ABC", "Q-1"]);
        assert!(matches.iter().all(|m| m.request_number == "r1"));
    }

    #[test]
    fn chunking_does_not_change_the_match_set() {
        let identifiers: Vec<(&str, &str)> = ["A-1", "A-2", "B-10", "b-1", "C", "zz9", "A-1"]
            .into_iter()
            .map(|t| ("X", t))
            .collect();
        let tracking = a_table(&identifiers);
        let records = [
            joined("X", "r1", "a-1 and b-10", ""),
            joined("X", "r2", "", "zz9 c"),
            joined("X", "r3", "none", "rien"),
            joined("X", "r1", "a-1 and b-10", ""),
        ];

        let as_set = |chunk_size| {
            match_tracking_numbers(&tracking, &records, chunk_size)
                .expect("match")
                .into_iter()
                .map(|m| (m.tracking_number, m.request_number))
                .collect::<BTreeSet<_>>()
        };
        let single = as_set(1);
        assert_eq!(single, as_set(identifiers.len()));
        assert_eq!(single, as_set(3));
        assert_eq!(single, as_set(0));
        assert!(single.contains(&("b-1".to_string(), "r1".to_string())));
        assert!(single.contains(&("C".to_string(), "r2".to_string())));
    }

    #[test]
    fn exact_duplicates_are_removed() {
        let tracking = a_table(&[("X", "BN-1"), ("X", "bn-1")]);
        let records = [
            joined("X", "r1", "bn-1", ""),
            joined("X", "r1", "bn-1", ""),
            joined("X", "r2", "bn-1", ""),
        ];
        let matches = match_tracking_numbers(&tracking, &records, 1).expect("match");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].request_number, "r1");
        assert_eq!(matches[1].request_number, "r2");
    }

    #[test]
    fn owners_without_identifiers_or_records_contribute_nothing() {
        let tracking = a_table(&[("X", ""), ("Y", "BN-1")]);
        let records = [joined("X", "r1", "bn-1", "")];
        let matches = match_tracking_numbers(&tracking, &records, DEFAULT_CHUNK_SIZE).expect("match");
        assert!(matches.is_empty());

        let matches = match_tracking_numbers(&tracking, &[], DEFAULT_CHUNK_SIZE).expect("match");
        assert!(matches.is_empty());
    }

    #[test]
    fn missing_tracking_column_is_a_schema_error() {
        let tracking = Table::new("A", vec![OWNER_ORG.to_string()]);
        let err = match_tracking_numbers(&tracking, &[], DEFAULT_CHUNK_SIZE).unwrap_err();
        assert!(matches!(err, StageError::Schema(_)));
        assert_eq!(
            err.to_string(),
            "A is missing expected columns: [\"tracking_number\"]"
        );
    }
}
