//! Walks a sync payload against the CRM, accumulating the run diff. The
//! whole batch runs as one unit inside the caller's backoff wrapper;
//! progress is checkpointed per category so a retried attempt never
//! repeats a category that already completed.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use onboardly_core::domain::sync::{
    Diff, DiffEntry, FieldOp, LinkOp, MediaOp, SyncPayload, TagOp, ValueOp,
};
use onboardly_core::domain::wizard::BlockMode;

use crate::client::{paths, CrmApiError, CrmClient};
use crate::storage::{FileStore, StorageError};

const SKIP_EXISTING_FIELDS: &str = "existing field operations not implemented";

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Api(#[from] CrmApiError),
    #[error("file storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Observer for per-category progress; the recorder persists each partial
/// diff so a failed run still shows what completed.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn category_completed(&self, diff: &Diff);
}

pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn category_completed(&self, _diff: &Diff) {}
}

/// Completed-category results, kept across retry attempts of one run.
#[derive(Debug, Default)]
pub struct Checkpoint {
    fields: Option<Vec<DiffEntry>>,
    values: Option<Vec<DiffEntry>>,
    trigger_links: Option<Vec<DiffEntry>>,
    tags: Option<Vec<DiffEntry>>,
    media: Option<Vec<DiffEntry>>,
}

impl Checkpoint {
    fn diff(&self) -> Diff {
        Diff {
            fields: self.fields.clone().unwrap_or_default(),
            values: self.values.clone().unwrap_or_default(),
            trigger_links: self.trigger_links.clone().unwrap_or_default(),
            tags: self.tags.clone().unwrap_or_default(),
            media: self.media.clone().unwrap_or_default(),
        }
    }
}

pub struct SyncExecutor {
    client: CrmClient,
    files: Arc<dyn FileStore>,
    location_id: String,
    checkpoint: Mutex<Checkpoint>,
}

impl SyncExecutor {
    pub fn new(client: CrmClient, files: Arc<dyn FileStore>, location_id: impl Into<String>) -> Self {
        Self { client, files, location_id: location_id.into(), checkpoint: Mutex::new(Checkpoint::default()) }
    }

    /// Perform one attempt over the payload. Categories run in the fixed
    /// order fields, values, trigger links, tags, media; a category that
    /// completed on a prior attempt is skipped. Any propagated error
    /// aborts the attempt and leaves the checkpoint in place for the next
    /// one. Completed remote creates are not rolled back.
    pub async fn execute(
        &self,
        payload: &SyncPayload,
        progress: &dyn ProgressSink,
    ) -> Result<Diff, ExecutorError> {
        let mut checkpoint = self.checkpoint.lock().await;

        if checkpoint.fields.is_none() {
            let entries = self.sync_fields(&payload.custom_fields).await?;
            checkpoint.fields = Some(entries);
            progress.category_completed(&checkpoint.diff()).await;
        }

        if checkpoint.values.is_none() {
            let entries = self.sync_values(&payload.custom_values).await?;
            checkpoint.values = Some(entries);
            progress.category_completed(&checkpoint.diff()).await;
        }

        if checkpoint.trigger_links.is_none() {
            let entries = self.sync_trigger_links(&payload.trigger_links).await?;
            checkpoint.trigger_links = Some(entries);
            progress.category_completed(&checkpoint.diff()).await;
        }

        if checkpoint.tags.is_none() {
            let entries = self.sync_tags(&payload.tags).await;
            checkpoint.tags = Some(entries);
            progress.category_completed(&checkpoint.diff()).await;
        }

        if checkpoint.media.is_none() {
            let entries = self.sync_media(&payload.media).await?;
            checkpoint.media = Some(entries);
            progress.category_completed(&checkpoint.diff()).await;
        }

        Ok(checkpoint.diff())
    }

    async fn sync_fields(&self, ops: &[FieldOp]) -> Result<Vec<DiffEntry>, ExecutorError> {
        let mut entries = Vec::with_capacity(ops.len());
        for op in ops {
            if op.mode != BlockMode::Create {
                entries.push(DiffEntry::skipped(&op.block_id, SKIP_EXISTING_FIELDS));
                continue;
            }

            let request = json!({
                "name": op.config.name,
                "dataType": op.config.data_type,
                "placeholder": op.config.placeholder,
                "options": op.config.options,
            });
            debug!(block_id = %op.block_id, category = "fields", "creating custom field");
            let response =
                self.client.post(&paths::custom_fields(&self.location_id), &request).await?;
            entries.push(DiffEntry::succeeded(&op.block_id, request, response));
        }
        Ok(entries)
    }

    async fn sync_values(&self, ops: &[ValueOp]) -> Result<Vec<DiffEntry>, ExecutorError> {
        let mut entries = Vec::with_capacity(ops.len());
        for op in ops {
            let request = json!({"name": op.name, "value": op.value});

            let reference_id = op.reference_id.as_deref().filter(|id| !id.trim().is_empty());
            let entry = match (op.mode, reference_id) {
                (BlockMode::Existing, Some(reference_id)) => {
                    let path = paths::custom_value(&self.location_id, reference_id);
                    match self.client.put(&path, &request).await {
                        Ok(response) => DiffEntry::succeeded(&op.block_id, request, response),
                        Err(error) if error.is_not_found() => {
                            warn!(
                                block_id = %op.block_id,
                                reference_id,
                                "custom value reference vanished; falling back to create"
                            );
                            let response = self
                                .client
                                .post(&paths::custom_values(&self.location_id), &request)
                                .await?;
                            DiffEntry::succeeded(&op.block_id, request, response).with_fallback()
                        }
                        Err(error) => return Err(error.into()),
                    }
                }
                _ => {
                    let response = self
                        .client
                        .post(&paths::custom_values(&self.location_id), &request)
                        .await?;
                    DiffEntry::succeeded(&op.block_id, request, response)
                }
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn sync_trigger_links(&self, ops: &[LinkOp]) -> Result<Vec<DiffEntry>, ExecutorError> {
        let mut entries = Vec::with_capacity(ops.len());
        for op in ops {
            let request = json!({
                "locationId": self.location_id,
                "name": op.name,
                "redirectTo": op.redirect_to,
            });

            let reference_id = op.reference_id.as_deref().filter(|id| !id.trim().is_empty());
            let entry = match (op.mode, reference_id) {
                (BlockMode::Existing, Some(reference_id)) => {
                    match self.client.put(&paths::trigger_link(reference_id), &request).await {
                        Ok(response) => DiffEntry::succeeded(&op.block_id, request, response),
                        Err(error) if error.is_not_found() => {
                            warn!(
                                block_id = %op.block_id,
                                reference_id,
                                "trigger link reference vanished; falling back to create"
                            );
                            let response =
                                self.client.post(&paths::trigger_links(), &request).await?;
                            DiffEntry::succeeded(&op.block_id, request, response).with_fallback()
                        }
                        Err(error) => return Err(error.into()),
                    }
                }
                _ => {
                    let response = self.client.post(&paths::trigger_links(), &request).await?;
                    DiffEntry::succeeded(&op.block_id, request, response)
                }
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Tags are the one category with per-item error isolation: a failed
    /// name is recorded in the diff and the remaining names still post.
    async fn sync_tags(&self, ops: &[TagOp]) -> Vec<DiffEntry> {
        let mut entries = Vec::new();
        for op in ops {
            for name in &op.names {
                let request = json!({"name": name});
                match self.client.post(&paths::tags(&self.location_id), &request).await {
                    Ok(response) => {
                        entries.push(DiffEntry::succeeded(&op.block_id, request, response));
                    }
                    Err(error) => {
                        warn!(block_id = %op.block_id, tag = %name, error = %error, "tag create failed");
                        entries.push(DiffEntry::failed(&op.block_id, request, error.to_string()));
                    }
                }
            }
        }
        entries
    }

    async fn sync_media(&self, ops: &[MediaOp]) -> Result<Vec<DiffEntry>, ExecutorError> {
        let mut entries = Vec::with_capacity(ops.len());
        for op in ops {
            let request = json!({
                "storageKey": op.storage_key,
                "fileName": op.file_name,
                "mimeType": op.mime_type,
            });

            debug!(block_id = %op.block_id, storage_key = %op.storage_key, "uploading media");
            let bytes = self.files.download(&op.storage_key).await?;
            let response = self
                .client
                .upload_media(&op.file_name, op.mime_type.as_deref(), bytes)
                .await?;
            entries.push(DiffEntry::succeeded(&op.block_id, request, response));
        }
        Ok(entries)
    }
}
