//! Incremental Merge
//!
//! Reconciles an incoming full state against the previously persisted one,
//! keyed by record id. Analyzed content of existing records survives a
//! re-ingestion of the raw form; every other field follows the incoming record.
//! [`merge_records`] is a pure function: same inputs, same output.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A persisted, identity-keyed state entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub id: String,
    #[serde(default)]
    pub content: Value,
    /// Every other field, kept verbatim.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl StateRecord {
    pub fn new(id: impl Into<String>, content: Value) -> Self {
        Self {
            id: id.into(),
            content,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Persisted state document: a record list plus any other top-level keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default)]
    pub records: Vec<StateRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StateDocument {
    pub fn new(records: Vec<StateRecord>) -> Self {
        Self {
            records,
            extra: Map::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&StateRecord> {
        self.records.iter().find(|r| r.id == id)
    }
}

/// When existing content counts as analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzedRule {
    /// A JSON object without the error marker
    #[default]
    Structured,
    /// Any non-null content that is not an error-marked object
    AnyNonError,
    /// Nothing is preserved; incoming always wins
    Never,
}

/// Configurable preservation policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePolicy {
    #[serde(default)]
    pub analyzed_rule: AnalyzedRule,
    /// Key whose presence in an object marks a failed analysis.
    #[serde(default = "default_error_marker")]
    pub error_marker: String,
    /// Restrict preservation to records of these data types. Empty = all.
    #[serde(default)]
    pub preserve_data_types: Vec<String>,
    #[serde(default = "default_data_type_field")]
    pub data_type_field: String,
}

fn default_error_marker() -> String {
    "error".to_string()
}

fn default_data_type_field() -> String {
    "dataType".to_string()
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            analyzed_rule: AnalyzedRule::default(),
            error_marker: default_error_marker(),
            preserve_data_types: Vec::new(),
            data_type_field: default_data_type_field(),
        }
    }
}

impl MergePolicy {
    /// Only image records keep their analysis.
    pub fn images_only() -> Self {
        Self {
            preserve_data_types: vec!["image".to_string()],
            ..Self::default()
        }
    }

    fn is_error(&self, content: &Value) -> bool {
        content
            .as_object()
            .is_some_and(|obj| obj.contains_key(&self.error_marker))
    }

    /// Whether `content` is a completed analysis under this policy.
    pub fn is_analyzed_content(&self, content: &Value) -> bool {
        match self.analyzed_rule {
            AnalyzedRule::Never => false,
            AnalyzedRule::Structured => content.is_object() && !self.is_error(content),
            AnalyzedRule::AnyNonError => !content.is_null() && !self.is_error(content),
        }
    }

    /// Whether the record's data type is subject to preservation.
    pub fn applies_to(&self, record: &StateRecord) -> bool {
        if self.preserve_data_types.is_empty() {
            return true;
        }
        record
            .field_str(&self.data_type_field)
            .is_some_and(|t| self.preserve_data_types.iter().any(|p| p == t))
    }

    pub fn is_analyzed(&self, record: &StateRecord) -> bool {
        self.applies_to(record) && self.is_analyzed_content(&record.content)
    }
}

/// What a merge did, by record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    /// Matched ids whose analyzed content was kept
    pub preserved: Vec<String>,
    /// Matched ids whose content was replaced by the incoming one
    pub replaced: Vec<String>,
    /// Ids not present in the existing state
    pub added: Vec<String>,
    /// Existing ids absent from the incoming state
    pub dropped: Vec<String>,
}

/// Merge `incoming` over `existing`. Output order is the incoming order.
pub fn merge_records(
    existing: &[StateRecord],
    incoming: &[StateRecord],
    policy: &MergePolicy,
) -> Vec<StateRecord> {
    merge_with_summary(existing, incoming, policy).0
}

/// [`merge_records`] plus a per-id account of the decisions.
pub fn merge_with_summary(
    existing: &[StateRecord],
    incoming: &[StateRecord],
    policy: &MergePolicy,
) -> (Vec<StateRecord>, MergeSummary) {
    // Later duplicates win, matching a plain id -> record mapping.
    let by_id: HashMap<&str, &StateRecord> =
        existing.iter().map(|r| (r.id.as_str(), r)).collect();
    let mut summary = MergeSummary::default();

    let merged = incoming
        .iter()
        .map(|record| match by_id.get(record.id.as_str()) {
            None => {
                summary.added.push(record.id.clone());
                record.clone()
            }
            Some(prior) if policy.is_analyzed(prior) => {
                summary.preserved.push(record.id.clone());
                StateRecord {
                    id: record.id.clone(),
                    content: prior.content.clone(),
                    fields: record.fields.clone(),
                }
            }
            Some(_) => {
                summary.replaced.push(record.id.clone());
                record.clone()
            }
        })
        .collect();

    let incoming_ids: std::collections::HashSet<&str> =
        incoming.iter().map(|r| r.id.as_str()).collect();
    summary.dropped = existing
        .iter()
        .filter(|r| !incoming_ids.contains(r.id.as_str()))
        .map(|r| r.id.clone())
        .collect();

    (merged, summary)
}

/// Merge whole documents. Top-level keys other than `records` follow the
/// incoming document.
pub fn merge_document(
    existing: &StateDocument,
    incoming: &StateDocument,
    policy: &MergePolicy,
) -> (StateDocument, MergeSummary) {
    let (records, summary) = merge_with_summary(&existing.records, &incoming.records, policy);
    (
        StateDocument {
            records,
            extra: incoming.extra.clone(),
        },
        summary,
    )
}
