//! Handles for a batch running in the background.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::session::{CancelReason, SessionControl};
use crate::types::{ProgressEvent, Response};
use crate::{Error, Result};

/// Cancels one session. Cheap to clone; safe to call from any task, any number of times.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    session_id: Uuid,
    control: Arc<SessionControl>,
}

impl CancelHandle {
    pub(crate) fn new(session_id: Uuid, control: Arc<SessionControl>) -> Self {
        Self {
            session_id,
            control,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn cancel(&self) {
        self.control.cancel(CancelReason::Cancelled);
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }
}

/// A batch started with [`super::RequestDispatcher::start_batch`].
///
/// Progress events arrive in completion order on a bounded channel. The batch waits
/// while the channel is full; dropping the receiver (or calling [`BatchHandle::join`])
/// stops reporting without stopping the batch.
#[derive(Debug)]
pub struct BatchHandle {
    pub(crate) progress: mpsc::Receiver<ProgressEvent>,
    pub(crate) cancel: CancelHandle,
    pub(crate) task: JoinHandle<HashMap<String, Response>>,
}

impl BatchHandle {
    pub fn session_id(&self) -> Uuid {
        self.cancel.session_id()
    }

    /// Next progress event, or `None` once the batch has reported everything.
    pub async fn next_progress(&mut self) -> Option<ProgressEvent> {
        self.progress.recv().await
    }

    pub fn progress_mut(&mut self) -> &mut mpsc::Receiver<ProgressEvent> {
        &mut self.progress
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the final response map. Undelivered progress events are discarded.
    pub async fn join(self) -> Result<HashMap<String, Response>> {
        let BatchHandle { progress, task, .. } = self;
        drop(progress);
        match task.await {
            Ok(responses) => Ok(responses),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            // Only reachable when the runtime shuts down under the batch.
            Err(_) => Err(Error::Closed),
        }
    }

    pub fn into_parts(
        self,
    ) -> (
        mpsc::Receiver<ProgressEvent>,
        CancelHandle,
        JoinHandle<HashMap<String, Response>>,
    ) {
        (self.progress, self.cancel, self.task)
    }
}
