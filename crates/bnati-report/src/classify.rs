//! Weak/strong split of match records by a denylist of noisy tracking numbers.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use bnati_core::MatchRecord;
use serde::Deserialize;

/// Tracking numbers known to produce spurious substring hits: placeholders,
/// redaction markers, single characters.
pub const DEFAULT_WEAK_IDENTIFIERS: &[&str] = &[
    "",
    "a",
    "x",
    "0",
    "1",
    "na",
    "n/a",
    "-",
    "redacted",
    "[redacted]",
    "<tracking_number>",
];

pub const WEAK_IDENTIFIERS_RULES_PATH: &str = "rules/weak_identifiers.yaml";

pub const WEAK_IDENTIFIERS_RULES_VERSION: u32 = 1;

#[derive(Debug, Clone, Deserialize)]
struct WeakIdentifierRulesFile {
    version: u32,
    #[serde(default)]
    values: Vec<String>,
    #[serde(default)]
    extend_defaults: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeakIdentifierList {
    values: BTreeSet<String>,
}

impl Default for WeakIdentifierList {
    fn default() -> Self {
        Self::from_values(DEFAULT_WEAK_IDENTIFIERS.iter().copied())
    }
}

impl WeakIdentifierList {
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            values: values
                .into_iter()
                .map(|v| Self::normalize(v.as_ref()))
                .collect(),
        }
    }

    pub fn normalize(value: &str) -> String {
        value.trim().to_lowercase()
    }

    pub fn is_weak(&self, tracking_number: &str) -> bool {
        self.values.contains(&Self::normalize(tracking_number))
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: WeakIdentifierRulesFile =
            serde_yaml::from_str(text).context("parsing weak identifier rules")?;
        if file.version != WEAK_IDENTIFIERS_RULES_VERSION {
            bail!(
                "unsupported weak identifier rules version {} (expected {})",
                file.version,
                WEAK_IDENTIFIERS_RULES_VERSION
            );
        }
        let mut list = Self::from_values(&file.values);
        if file.extend_defaults {
            list.values.extend(Self::default().values);
        }
        Ok(list)
    }

    /// Load `rules/weak_identifiers.yaml` under `root`, or the built-in list when absent.
    pub fn from_workspace_root(root: &Path) -> Result<Self> {
        let path = root.join(WEAK_IDENTIFIERS_RULES_PATH);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifiedMatches {
    pub strong: Vec<MatchRecord>,
    pub weak: Vec<MatchRecord>,
}

impl ClassifiedMatches {
    pub fn total(&self) -> usize {
        self.strong.len() + self.weak.len()
    }
}

pub fn classify_matches(matches: Vec<MatchRecord>, weak: &WeakIdentifierList) -> ClassifiedMatches {
    let (weak_matches, strong): (Vec<_>, Vec<_>) = matches
        .into_iter()
        .partition(|m| weak.is_weak(&m.tracking_number));
    ClassifiedMatches {
        strong,
        weak: weak_matches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(tracking_number: &str) -> MatchRecord {
        MatchRecord {
            owner_org: "dept1".into(),
            tracking_number: tracking_number.into(),
            request_number: "r1".into(),
            informal_requests_sum: 0.0,
            unique_identifiers: String::new(),
            summary_en: String::new(),
            summary_fr: String::new(),
        }
    }

    #[test]
    fn membership_ignores_case_and_surrounding_space() {
        let list = WeakIdentifierList::default();
        assert!(list.is_weak("NA"));
        assert!(list.is_weak(" [REDACTED] "));
        assert!(list.is_weak("   "));
        assert!(list.is_weak("<Tracking_Number>"));
        assert!(!list.is_weak("BN-001"));
        assert!(!list.is_weak("nan"));
    }

    #[test]
    fn every_record_lands_in_exactly_one_bucket() {
        let list = WeakIdentifierList::default();
        let matches = vec![record("BN-001"), record("na"), record("1"), record("AB-99")];
        let classified = classify_matches(matches.clone(), &list);

        assert_eq!(classified.total(), matches.len());
        assert_eq!(
            classified
                .weak
                .iter()
                .map(|m| m.tracking_number.as_str())
                .collect::<Vec<_>>(),
            vec!["na", "1"]
        );
        assert_eq!(
            classified
                .strong
                .iter()
                .map(|m| m.tracking_number.as_str())
                .collect::<Vec<_>>(),
            vec!["BN-001", "AB-99"]
        );
    }

    #[test]
    fn yaml_rules_replace_or_extend_defaults() {
        let replaced = WeakIdentifierList::from_yaml_str("version: 1\nvalues: [\"TBD\", \" xx \"]\n")
            .expect("rules");
        assert_eq!(replaced.values().collect::<Vec<_>>(), vec!["tbd", "xx"]);
        assert!(!replaced.is_weak("na"));

        let extended = WeakIdentifierList::from_yaml_str(
            "version: 1\nextend_defaults: true\nvalues:\n  - TBD\n",
        )
        .expect("rules");
        assert!(extended.is_weak("tbd"));
        assert!(extended.is_weak("na"));
        assert_eq!(extended.len(), DEFAULT_WEAK_IDENTIFIERS.len() + 1);
    }

    #[test]
    fn rules_must_declare_a_supported_version() {
        let err =
            WeakIdentifierList::from_yaml_str("version: 2\nvalues: [\"tbd\"]\n").unwrap_err();
        assert!(err.to_string().contains("unsupported weak identifier rules version 2"));
        assert!(WeakIdentifierList::from_yaml_str("values: [\"tbd\"]\n").is_err());
    }

    #[test]
    fn workspace_without_rules_uses_builtin_list() {
        let dir = tempdir().expect("tempdir");
        let list = WeakIdentifierList::from_workspace_root(dir.path()).expect("load");
        assert_eq!(list, WeakIdentifierList::default());

        std::fs::create_dir_all(dir.path().join("rules")).expect("mkdir");
        std::fs::write(
            dir.path().join(WEAK_IDENTIFIERS_RULES_PATH),
            "version: 1\nvalues: [\"-\"]\n",
        )
        .expect("write rules");
        let list = WeakIdentifierList::from_workspace_root(dir.path()).expect("load");
        assert_eq!(list.values().collect::<Vec<_>>(), vec!["-"]);
    }
}
