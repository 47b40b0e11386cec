//! In-process, single-worker sync queue. One queue instance owns its
//! pending list and busy flag; nothing is ambient, so tests can run
//! independent queues side by side. At most one wizard synchronizes at a
//! time per instance; ids drain in FIFO order.
//!
//! Duplicate policy: an id already sitting in the pending list coalesces
//! to a no-op (that run will pick up the latest answers anyway), while an
//! id that is currently running is re-queued behind the in-flight run so
//! changes made mid-run are not lost.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use onboardly_core::domain::wizard::WizardId;

use crate::engine::WizardSyncHandler;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    Coalesced,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<WizardId>,
    busy: bool,
    running: Option<WizardId>,
}

pub struct SyncQueue {
    handler: Arc<dyn WizardSyncHandler>,
    state: Mutex<QueueState>,
}

impl SyncQueue {
    pub fn new(handler: Arc<dyn WizardSyncHandler>) -> Arc<Self> {
        Arc::new(Self { handler, state: Mutex::new(QueueState::default()) })
    }

    pub async fn enqueue(self: &Arc<Self>, wizard_id: WizardId) -> EnqueueOutcome {
        let mut state = self.state.lock().await;

        if state.pending.contains(&wizard_id) {
            debug!(wizard_id = %wizard_id, "sync already queued; coalescing");
            return EnqueueOutcome::Coalesced;
        }

        state.pending.push_back(wizard_id);
        if !state.busy {
            state.busy = true;
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                queue.drain().await;
            });
        }
        EnqueueOutcome::Queued
    }

    /// Worker loop: pop one id at a time and run it to completion. A
    /// failed wizard is logged and never stops the loop.
    async fn drain(self: Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state.lock().await;
                match state.pending.pop_front() {
                    Some(id) => {
                        state.running = Some(id.clone());
                        id
                    }
                    None => {
                        state.busy = false;
                        state.running = None;
                        break;
                    }
                }
            };

            info!(wizard_id = %next, "dequeued wizard for sync");
            if let Err(err) = self.handler.sync_wizard(&next).await {
                error!(wizard_id = %next, error = %err, "wizard sync failed");
            }

            let mut state = self.state.lock().await;
            state.running = None;
        }
    }

    pub async fn is_idle(&self) -> bool {
        let state = self.state.lock().await;
        !state.busy && state.pending.is_empty()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}
