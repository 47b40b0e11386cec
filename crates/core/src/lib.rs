pub mod config;
pub mod domain;
pub mod payload;
pub mod retry;

pub use domain::connection::{ConnectionId, SavedConnection};
pub use domain::credential::{
    Credential, OauthCredential, PrivateTokenCredential, ScopeLevel, TokenGrant,
};
pub use domain::sync::{
    Diff, DiffEntry, FieldConfig, FieldOp, LinkOp, MediaOp, SyncPayload, SyncRun, SyncRunId,
    SyncRunStatus, TagOp, ValueOp,
};
pub use domain::wizard::{
    Answer, Block, BlockKind, BlockMode, NewEntity, Page, ResponseSet, SyncStatus, Upload, Wizard,
    WizardId, WizardTemplate,
};
pub use payload::build_sync_payload;
pub use retry::run_with_backoff;
