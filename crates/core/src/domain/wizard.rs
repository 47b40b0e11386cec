use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WizardId(pub String);

impl std::fmt::Display for WizardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal sync state surfaced to the end customer. A wizard exposes only
/// its latest run's outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "synced" => Some(Self::Synced),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// The page/block schema an agency authors. Stored as JSON on the wizard
/// row; page and block order is meaningful and drives sync order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WizardTemplate {
    #[serde(default)]
    pub pages: Vec<Page>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default)]
    pub mode: BlockMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub new_entity: NewEntity,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    CustomField,
    CustomValue,
    TriggerLink,
    Tag,
    Media,
    Text,
    /// Template authors can ship block types this engine does not sync
    /// (instructions, embeds). They decode without error and are skipped.
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockMode {
    #[default]
    Existing,
    Create,
}

/// Creation parameters for `create`-mode blocks. Every field is optional
/// in authored templates; consumers default them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
}

/// One customer's submitted answers: a record per page, each mapping
/// block id to the captured answer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseSet {
    #[serde(default)]
    pub pages: HashMap<String, HashMap<String, Answer>>,
}

impl ResponseSet {
    pub fn answer(&self, page_id: &str, block_id: &str) -> Option<&Answer> {
        self.pages.get(page_id).and_then(|answers| answers.get(block_id))
    }

    pub fn insert(&mut self, page_id: &str, block_id: &str, answer: Answer) {
        self.pages
            .entry(page_id.to_string())
            .or_default()
            .insert(block_id.to_string(), answer);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uploads: Vec<Upload>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl Answer {
    pub fn text(value: impl Into<String>) -> Self {
        Self { value: Value::String(value.into()), ..Self::default() }
    }

    /// Trimmed string form of the answer value, if any. Non-string scalars
    /// stringify; arrays/objects and empty strings yield `None`.
    pub fn trimmed_text(&self) -> Option<String> {
        let text = match &self.value {
            Value::String(text) => text.trim().to_string(),
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            Value::Null | Value::Array(_) | Value::Object(_) => return None,
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    pub storage_key: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A wizard as the engine sees it: identity, routing, template, answers,
/// and the user-visible sync state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Wizard {
    pub id: WizardId,
    pub owner_id: String,
    pub location_id: String,
    pub name: String,
    pub template: WizardTemplate,
    pub responses: ResponseSet,
    pub sync_status: SyncStatus,
}
