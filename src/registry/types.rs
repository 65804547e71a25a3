use crate::error::RouterError;
use crate::protocol::messages::{ControlMessage, DataMessage};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, watch};

pub const MAX_FUNCTION_NAME_LEN: usize = 255;

/// Router-assigned worker identifier. Ordered so that selection ties break
/// towards the oldest worker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Correlates a request on a data channel with its reply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Identifier of a function's data-channel listener.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteId(pub u32);

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A validated function definition.
///
/// Built from the signed wire values of a `RegisterConfig` through
/// [`FunctionConfig::validate`]; never constructed from unchecked input elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionConfig {
    pub function_name: String,
    /// Hard limit in ms for a single execution.
    pub timeout_ms: u32,
    /// Maximum concurrent executions on each worker.
    pub max_concurrency: u32,
}

impl FunctionConfig {
    pub fn validate(
        function_name: &str,
        timeout_ms: i32,
        max_concurrency: i32,
    ) -> Result<Self, RouterError> {
        if function_name.is_empty() {
            return Err(RouterError::InvalidConfig(
                "function name must not be empty".to_string(),
            ));
        }
        if function_name.len() > MAX_FUNCTION_NAME_LEN {
            return Err(RouterError::InvalidConfig(format!(
                "function name is {} bytes, limit is {}",
                function_name.len(),
                MAX_FUNCTION_NAME_LEN
            )));
        }
        if timeout_ms <= 0 {
            return Err(RouterError::InvalidConfig(format!(
                "timeout_ms must be positive, got {}",
                timeout_ms
            )));
        }
        if max_concurrency <= 0 {
            return Err(RouterError::InvalidConfig(format!(
                "max_concurrency must be positive, got {}",
                max_concurrency
            )));
        }

        Ok(Self {
            function_name: function_name.to_string(),
            timeout_ms: timeout_ms as u32,
            max_concurrency: max_concurrency as u32,
        })
    }
}

/// Lifecycle of a worker connection as seen by the binder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    ControlConnected,
    ConfigReceived,
    /// Registered and attached to a binding, data channel not yet connected.
    Bound,
    /// Eligible for dispatch.
    Active,
    Removed,
}

/// One connected worker instance.
///
/// The handle is shared between the registry (its owner), in-flight calls and the
/// connection tasks. `active` is only ever changed through [`WorkerHandle::try_acquire`]
/// and [`WorkerHandle::release`].
pub struct WorkerHandle {
    pub id: WorkerId,
    /// Instance uuid declared by the worker, or generated for it.
    pub uuid: String,
    /// The config the worker declared when it registered.
    pub declared: FunctionConfig,
    active: AtomicU32,
    data_tx: OnceLock<mpsc::Sender<DataMessage>>,
    control_tx: mpsc::Sender<ControlMessage>,
    closed: watch::Sender<bool>,
}

impl WorkerHandle {
    pub fn new(
        id: WorkerId,
        uuid: String,
        declared: FunctionConfig,
        control_tx: mpsc::Sender<ControlMessage>,
    ) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            id,
            uuid,
            declared,
            active: AtomicU32::new(0),
            data_tx: OnceLock::new(),
            control_tx,
            closed,
        })
    }

    pub fn function_name(&self) -> &str {
        &self.declared.function_name
    }

    pub fn active_count(&self) -> u32 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> WorkerState {
        if self.is_closed() {
            WorkerState::Removed
        } else if self.data_tx.get().is_some() {
            WorkerState::Active
        } else {
            WorkerState::Bound
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == WorkerState::Active
    }

    /// Claims one execution slot if the worker is below `limit`.
    pub fn try_acquire(&self, limit: u32) -> bool {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < limit).then_some(current + 1)
            })
            .is_ok()
    }

    /// Frees a slot claimed by `try_acquire`.
    pub fn release(&self) {
        let released = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(1)
            });
        if released.is_err() {
            tracing::error!("Worker {} released a slot it did not hold", self.id);
        }
    }

    /// Attaches the data channel. Returns `false` if one was already attached.
    pub(crate) fn attach_data_channel(&self, data_tx: mpsc::Sender<DataMessage>) -> bool {
        self.data_tx.set(data_tx).is_ok()
    }

    pub(crate) fn data_channel(&self) -> Option<&mpsc::Sender<DataMessage>> {
        self.data_tx.get()
    }

    /// Queues a control message without waiting. Used for best-effort signals.
    pub fn try_send_control(&self, msg: ControlMessage) -> bool {
        match self.control_tx.try_send(msg) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dropped control message for worker {}: {}", self.id, e);
                false
            }
        }
    }

    /// Queues a control message, waiting for room in the channel.
    pub async fn send_control(&self, msg: ControlMessage) -> bool {
        self.control_tx.send(msg).await.is_ok()
    }

    /// Marks the worker removed and wakes every task watching its connections.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn subscribe_closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("uuid", &self.uuid)
            .field("function", &self.declared.function_name)
            .field("active", &self.active_count())
            .field("state", &self.state())
            .finish()
    }
}

/// Waits until the handle behind `closed` is closed.
pub async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    // An error means the handle itself was dropped, which also ends the worker.
    let _ = closed.wait_for(|closed| *closed).await;
}

/// Routable state of one function.
///
/// Cloning yields a consistent snapshot; the worker handles inside are shared.
#[derive(Debug, Clone)]
pub struct FunctionBinding {
    /// Effective config. Last registration wins.
    pub config: FunctionConfig,
    /// Assigned when the first worker binds, kept while the binding is inactive.
    pub route: Option<RouteId>,
    pub workers: BTreeMap<WorkerId, Arc<WorkerHandle>>,
}

impl FunctionBinding {
    pub fn new(config: FunctionConfig) -> Self {
        Self {
            config,
            route: None,
            workers: BTreeMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.workers.is_empty()
    }

    pub fn function_name(&self) -> &str {
        &self.config.function_name
    }
}

/// Serializable view of one worker's load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerSummary {
    pub worker_id: WorkerId,
    pub uuid: String,
    pub state: WorkerState,
    pub active: u32,
}

/// Serializable view of one binding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionSummary {
    pub config: FunctionConfig,
    pub route: Option<RouteId>,
    pub workers: Vec<WorkerSummary>,
}

impl From<&FunctionBinding> for FunctionSummary {
    fn from(binding: &FunctionBinding) -> Self {
        Self {
            config: binding.config.clone(),
            route: binding.route,
            workers: binding
                .workers
                .values()
                .map(|worker| WorkerSummary {
                    worker_id: worker.id,
                    uuid: worker.uuid.clone(),
                    state: worker.state(),
                    active: worker.active_count(),
                })
                .collect(),
        }
    }
}
