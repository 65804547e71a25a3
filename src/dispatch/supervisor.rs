//! Timeout Supervisor
//!
//! A fixed-interval scan over the in-flight table. Overdue calls are failed with
//! `Timeout`, their slots are freed, and the worker is told to abandon the execution.
//! The kill signal is fire-and-forget: the slot is released without waiting for the
//! worker to acknowledge.

use super::dispatcher::Dispatcher;
use crate::protocol::messages::ControlMessage;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(50);

pub struct TimeoutSupervisor {
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
}

impl TimeoutSupervisor {
    pub fn new(dispatcher: Arc<Dispatcher>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            interval,
        })
    }

    /// Spawns the scan loop. It runs until the returned handle is aborted.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tracing::info!("Starting timeout supervisor (scan every {:?})", self.interval);

        tokio::spawn(async move {
            self.scan_loop().await;
        })
    }

    async fn scan_loop(&self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let expired = self.scan();
            if expired > 0 {
                tracing::debug!("Timeout scan expired {} calls", expired);
            }
        }
    }

    /// Runs one scan. Returns how many calls were timed out.
    pub fn scan(&self) -> usize {
        let expired = self.dispatcher.expire_overdue(Instant::now());

        for call in &expired {
            tracing::warn!(
                "Call {} for '{}' on worker {} timed out after {:?}, sending kill",
                call.correlation_id,
                call.function_name,
                call.worker.id,
                call.elapsed
            );

            call.worker.try_send_control(ControlMessage::Kill {
                correlation_id: call.correlation_id,
            });
        }

        expired.len()
    }
}
