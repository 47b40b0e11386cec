//! Projects a wizard template plus the customer's answers into the five
//! operation lists the executor performs. Deterministic and free of side
//! effects: template page/block order drives operation order, answers for
//! blocks missing from the template are never consulted.

use serde_json::Value;

use crate::domain::sync::{FieldConfig, FieldOp, LinkOp, MediaOp, SyncPayload, TagOp, ValueOp};
use crate::domain::wizard::{Answer, Block, BlockKind, ResponseSet, WizardTemplate};

const DEFAULT_FIELD_DATA_TYPE: &str = "TEXT";

pub fn build_sync_payload(template: &WizardTemplate, responses: &ResponseSet) -> SyncPayload {
    let mut payload = SyncPayload::default();
    let empty = Answer::default();

    for page in &template.pages {
        for block in &page.blocks {
            let answer = responses.answer(&page.id, &block.id).unwrap_or(&empty);
            match block.kind {
                BlockKind::CustomField => payload.custom_fields.push(field_op(block, answer)),
                BlockKind::CustomValue => {
                    if let Some(op) = value_op(block, answer) {
                        payload.custom_values.push(op);
                    }
                }
                BlockKind::TriggerLink => {
                    if let Some(op) = link_op(block, answer) {
                        payload.trigger_links.push(op);
                    }
                }
                BlockKind::Tag => {
                    if let Some(op) = tag_op(block, answer) {
                        payload.tags.push(op);
                    }
                }
                BlockKind::Media => {
                    payload.media.extend(media_ops(block, answer));
                }
                BlockKind::Text | BlockKind::Unknown => {}
            }
        }
    }

    payload
}

fn field_op(block: &Block, answer: &Answer) -> FieldOp {
    FieldOp {
        block_id: block.id.clone(),
        mode: block.mode,
        config: FieldConfig {
            name: block.new_entity.name.clone().unwrap_or_default(),
            data_type: block
                .new_entity
                .data_type
                .clone()
                .unwrap_or_else(|| DEFAULT_FIELD_DATA_TYPE.to_string()),
            placeholder: block.new_entity.placeholder.clone().unwrap_or_default(),
            options: block.new_entity.options.clone(),
        },
        value: answer.value.clone(),
    }
}

fn value_op(block: &Block, answer: &Answer) -> Option<ValueOp> {
    let value = answer.trimmed_text()?;
    Some(ValueOp {
        block_id: block.id.clone(),
        mode: block.mode,
        reference_id: block.reference_id.clone(),
        name: block.new_entity.name.clone().unwrap_or_default(),
        value,
    })
}

fn link_op(block: &Block, answer: &Answer) -> Option<LinkOp> {
    let redirect_to = answer.trimmed_text().or_else(|| {
        block
            .new_entity
            .redirect_to
            .as_deref()
            .map(str::trim)
            .filter(|target| !target.is_empty())
            .map(str::to_string)
    })?;

    Some(LinkOp {
        block_id: block.id.clone(),
        mode: block.mode,
        reference_id: block.reference_id.clone(),
        name: block.new_entity.name.clone().unwrap_or_default(),
        redirect_to,
    })
}

fn tag_op(block: &Block, answer: &Answer) -> Option<TagOp> {
    let names = tag_names(&answer.value);
    if names.is_empty() {
        return None;
    }
    Some(TagOp { block_id: block.id.clone(), names })
}

/// Tag answers arrive either as a list or as one comma-separated string.
/// Names are trimmed and empties dropped; duplicates are preserved.
fn tag_names(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(name) => Some(name.clone()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(joined) => joined.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };

    raw.iter().map(|name| name.trim()).filter(|name| !name.is_empty()).map(str::to_string).collect()
}

fn media_ops(block: &Block, answer: &Answer) -> Vec<MediaOp> {
    answer
        .uploads
        .iter()
        .filter(|upload| !upload.storage_key.trim().is_empty())
        .map(|upload| MediaOp {
            block_id: block.id.clone(),
            storage_key: upload.storage_key.clone(),
            file_name: if upload.file_name.trim().is_empty() {
                upload.storage_key.clone()
            } else {
                upload.file_name.clone()
            },
            mime_type: upload.mime_type.clone(),
        })
        .collect()
}
