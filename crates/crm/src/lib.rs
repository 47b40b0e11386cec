pub mod client;
pub mod executor;
pub mod oauth;
pub mod storage;

pub use client::{CrmApiError, CrmClient};
pub use executor::{Checkpoint, ExecutorError, NoopProgress, ProgressSink, SyncExecutor};
pub use oauth::{refresh, OAuthError};
pub use storage::{FileStore, InMemoryFileStore, StorageError};
