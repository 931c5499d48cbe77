//! `AnnotationSet`: a mapping from annotation key to string value.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use super::duration::parse_duration;

/// Procedure-scoped annotation keys known to the engine. Unknown keys are
/// retained (never dropped) but flagged with a [`ValidationWarning`].
pub const PROCEDURE_KEYS: &[&str] = &[
    "jit-threshold",
    "no-jit",
    "timeout",
    "log-params",
    "deprecated",
];

/// Table-scoped annotation keys known to the engine.
pub const TABLE_KEYS: &[&str] = &[
    "isolated",
    "journal-mode",
    "cache-size",
    "synchronous",
    "read-only",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub key: String,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown annotation key {:?} (kept, not acted on)", self.key)
    }
}

/// Mapping from annotation key to string value. An empty value means
/// "flag present" per the data model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationSet {
    values: BTreeMap<String, String>,
}

impl AnnotationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from `(key, value)` pairs, returning validation
    /// warnings for keys that are neither procedure nor table keys.
    /// Unknown keys are still inserted — the spec requires they be
    /// retained, only flagged.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> (Self, Vec<ValidationWarning>) {
        let mut set = AnnotationSet::new();
        let mut warnings = Vec::new();
        for (k, v) in pairs {
            if !PROCEDURE_KEYS.contains(&k.as_str()) && !TABLE_KEYS.contains(&k.as_str()) {
                warnings.push(ValidationWarning { key: k.clone() });
            }
            set.values.insert(k, v);
        }
        (set, warnings)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.values
            .get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(default)
    }

    pub fn get_duration(&self, key: &str, default: Duration) -> Duration {
        self.values
            .get(key)
            .and_then(|v| parse_duration(v))
            .unwrap_or(default)
    }

    /// Serialise back to the `-- @aul:k[=v]` line form, one line per
    /// entry, in deterministic (sorted) key order. Round-tripping this
    /// through `extract_annotations`/`parse_block` reproduces an
    /// equivalent `AnnotationSet`.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.values {
            if v.is_empty() {
                out.push_str(&format!("-- @aul:{k}\n"));
            } else {
                out.push_str(&format!("-- @aul:{k}={v}\n"));
            }
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::extract_annotations;

    #[test]
    fn parse_serialize_reparse_round_trips() {
        let src = "-- @aul:isolated\n-- @aul:journal-mode=WAL\nCREATE TABLE t(id INT);\n";
        let blocks = extract_annotations(src);
        let set = blocks[0].set.clone();
        let serialized = set.serialize();
        let reparsed_src = format!("{serialized}CREATE TABLE t(id INT);\n");
        let reparsed = extract_annotations(&reparsed_src);
        assert_eq!(reparsed[0].set, set);
    }

    #[test]
    fn unknown_key_is_retained_with_warning() {
        let (set, warnings) =
            AnnotationSet::from_pairs(vec![("totally-unknown".to_string(), "x".to_string())]);
        assert!(set.get_bool("totally-unknown"));
        assert_eq!(set.get_string("totally-unknown", ""), "x");
        assert_eq!(warnings.len(), 1);
    }
}
