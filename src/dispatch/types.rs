use crate::error::RouterError;
use crate::registry::types::{CorrelationId, WorkerHandle};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

pub type CallResult = Result<Vec<u8>, RouterError>;

/// A dispatched call that has not been resolved yet.
pub struct InFlightCall {
    pub correlation_id: CorrelationId,
    pub worker: Arc<WorkerHandle>,
    pub function_name: String,
    pub started_at: Instant,
    /// Fixed at dispatch time. Later config updates do not move it.
    pub deadline: Instant,
    pub timeout_ms: u32,
    reply_tx: oneshot::Sender<CallResult>,
}

impl InFlightCall {
    pub fn new(
        correlation_id: CorrelationId,
        worker: Arc<WorkerHandle>,
        function_name: String,
        timeout_ms: u32,
        reply_tx: oneshot::Sender<CallResult>,
    ) -> Self {
        let started_at = Instant::now();
        Self {
            correlation_id,
            worker,
            function_name,
            started_at,
            deadline: started_at + Duration::from_millis(u64::from(timeout_ms)),
            timeout_ms,
            reply_tx,
        }
    }

    pub fn is_overdue(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Frees the worker slot and hands `result` to the waiting caller, if any.
    ///
    /// Must only be called on an entry that was just removed from the in-flight table.
    pub(crate) fn resolve(self, result: CallResult) {
        self.worker.release();
        if self.reply_tx.send(result).is_err() {
            tracing::debug!(
                "Caller for {} went away before resolution",
                self.correlation_id
            );
        }
    }
}

/// A call the supervisor timed out.
#[derive(Debug)]
pub struct ExpiredCall {
    pub correlation_id: CorrelationId,
    pub worker: Arc<WorkerHandle>,
    pub function_name: String,
    pub elapsed: Duration,
}
