use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::wizard::{BlockMode, WizardId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncRunId(pub String);

impl std::fmt::Display for SyncRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derived, ephemeral projection of a wizard's template plus answers into
/// the operations the executor will perform, in execution order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub custom_fields: Vec<FieldOp>,
    pub custom_values: Vec<ValueOp>,
    pub trigger_links: Vec<LinkOp>,
    pub tags: Vec<TagOp>,
    pub media: Vec<MediaOp>,
}

impl SyncPayload {
    pub fn is_empty(&self) -> bool {
        self.custom_fields.is_empty()
            && self.custom_values.is_empty()
            && self.trigger_links.is_empty()
            && self.tags.is_empty()
            && self.media.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldOp {
    pub block_id: String,
    pub mode: BlockMode,
    pub config: FieldConfig,
    /// Captured answer. Carried through for creation-mode fields; updates
    /// to existing fields are recorded as skipped by the executor.
    #[serde(default)]
    pub value: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    pub data_type: String,
    pub placeholder: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueOp {
    pub block_id: String,
    pub mode: BlockMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkOp {
    pub block_id: String,
    pub mode: BlockMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    pub name: String,
    pub redirect_to: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TagOp {
    pub block_id: String,
    pub names: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaOp {
    pub block_id: String,
    pub storage_key: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Per-category audit of what one run actually did against the CRM.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub fields: Vec<DiffEntry>,
    pub values: Vec<DiffEntry>,
    pub trigger_links: Vec<DiffEntry>,
    pub tags: Vec<DiffEntry>,
    pub media: Vec<DiffEntry>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub block_id: String,
    #[serde(default)]
    pub request: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl DiffEntry {
    pub fn succeeded(block_id: impl Into<String>, request: Value, response: Value) -> Self {
        Self {
            block_id: block_id.into(),
            request,
            response: Some(response),
            ..Self::default()
        }
    }

    pub fn failed(block_id: impl Into<String>, request: Value, error: impl Into<String>) -> Self {
        Self {
            block_id: block_id.into(),
            request,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn skipped(block_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { block_id: block_id.into(), skipped: Some(reason.into()), ..Self::default() }
    }

    pub fn with_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Pending,
    Success,
    Failed,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Audit record of one synchronization run. Created pending at job start,
/// finalized exactly once, immutable afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: SyncRunId,
    pub wizard_id: WizardId,
    pub status: SyncRunStatus,
    pub diff: Option<Diff>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
