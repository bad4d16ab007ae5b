//! Supervised background sessions
//!
//! A session is normally launched as a detached task so the caller (an
//! HTTP handler) can return immediately while progress flows through the
//! sink. The handle supports awaiting the result and best-effort
//! cancellation, which the engine honors between stages only.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;
use uuid::Uuid;

use super::{ReportEngine, RunRequest, WorkflowResult};

/// Handle to a detached workflow session.
pub struct SessionHandle {
    session_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<WorkflowResult>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Request cancellation; takes effect at the next stage boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Await the session's terminal result.
    ///
    /// A panicked task is captured as a failed result instead of
    /// propagating, so a crashing session never takes the caller down.
    pub async fn join(self) -> WorkflowResult {
        match self.handle.await {
            Ok(result) => result,
            Err(err) => {
                error!(session = %self.session_id, error = %err, "session task died");
                WorkflowResult::aborted(
                    self.session_id,
                    format!("session task died: {}", err),
                )
            }
        }
    }
}

/// Spawn a workflow session as a detached supervised task.
pub fn spawn_session(engine: Arc<ReportEngine>, mut request: RunRequest) -> SessionHandle {
    let session_id = request
        .session_id
        .get_or_insert_with(|| Uuid::new_v4().to_string())
        .clone();
    let cancel = CancellationToken::new();

    let task_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        engine.run_with_cancellation(request, task_cancel).await
    });

    SessionHandle {
        session_id,
        cancel,
        handle,
    }
}
