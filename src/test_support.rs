//! Helpers shared by the unit tests.

use crate::protocol::messages::{ControlMessage, DataMessage};
use crate::registry::registry::FunctionRegistry;
use crate::registry::types::{FunctionConfig, WorkerHandle, WorkerId};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub fn config(name: &str, timeout_ms: i32, max_concurrency: i32) -> FunctionConfig {
    FunctionConfig::validate(name, timeout_ms, max_concurrency).expect("valid test config")
}

/// A worker bound and activated without sockets. Requests arrive on `data_rx`,
/// kill signals on `control_rx`.
pub struct TestWorker {
    pub handle: Arc<WorkerHandle>,
    pub data_rx: mpsc::Receiver<DataMessage>,
    pub control_rx: mpsc::Receiver<ControlMessage>,
}

pub fn bound_worker(
    registry: &FunctionRegistry,
    id: u64,
    config: &FunctionConfig,
) -> (Arc<WorkerHandle>, mpsc::Receiver<ControlMessage>) {
    let (control_tx, control_rx) = mpsc::channel(64);
    let handle = WorkerHandle::new(
        WorkerId(id),
        format!("test-worker-{}", id),
        config.clone(),
        control_tx,
    );
    registry
        .bind_worker(&config.function_name, handle.clone())
        .expect("bind test worker");
    (handle, control_rx)
}

pub fn active_worker(registry: &FunctionRegistry, id: u64, config: &FunctionConfig) -> TestWorker {
    let (handle, control_rx) = bound_worker(registry, id, config);
    let (data_tx, data_rx) = mpsc::channel(64);
    registry
        .activate_worker(WorkerId(id), data_tx)
        .expect("activate test worker");

    TestWorker {
        handle,
        data_rx,
        control_rx,
    }
}

/// Polls `condition` every 10ms for up to 3 seconds.
pub async fn wait_until<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    for _ in 0..300 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
