pub mod engine;
pub mod queue;
pub mod recorder;
pub mod resolver;

pub use engine::{EngineError, SyncEngine, WizardSyncHandler};
pub use queue::{EnqueueOutcome, SyncQueue};
pub use recorder::RunRecorder;
pub use resolver::{resolve_credential, Resolution};
