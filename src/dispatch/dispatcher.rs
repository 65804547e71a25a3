//! Dispatcher
//!
//! Picks a worker for each call, forwards it on the worker's data channel and
//! matches replies back to their callers.

use super::types::*;
use crate::error::RouterError;
use crate::protocol::codec::MAX_PAYLOAD_LEN;
use crate::protocol::messages::DataMessage;
use crate::registry::registry::FunctionRegistry;
use crate::registry::types::*;

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;

pub struct Dispatcher {
    registry: Arc<FunctionRegistry>,
    in_flight: DashMap<CorrelationId, InFlightCall>,
    next_correlation: AtomicU64,
}

impl Dispatcher {
    pub fn new(registry: Arc<FunctionRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            in_flight: DashMap::new(),
            next_correlation: AtomicU64::new(1),
        })
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// Sends `payload` to the least-busy worker of `function_name` and waits for
    /// the call to resolve.
    ///
    /// Fails immediately with `PayloadTooLarge`, `UnknownFunction`,
    /// `NoWorkersAvailable` or `Saturated`.
    /// Otherwise the call resolves with the worker's reply, `WorkerFailed`,
    /// `WorkerDisconnected`, or `Timeout` once the supervisor finds it overdue.
    pub async fn dispatch(&self, function_name: &str, payload: Vec<u8>) -> CallResult {
        // Requests must fit in one data-channel frame.
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(RouterError::PayloadTooLarge {
                len: payload.len(),
                limit: MAX_PAYLOAD_LEN,
            });
        }

        let binding = self.registry.lookup(function_name)?;
        let worker = select_worker(&binding)?;
        let timeout_ms = binding.config.timeout_ms;

        let correlation_id = CorrelationId(self.next_correlation.fetch_add(1, Ordering::SeqCst));
        let (reply_tx, reply_rx) = oneshot::channel();

        self.in_flight.insert(
            correlation_id,
            InFlightCall::new(
                correlation_id,
                worker.clone(),
                function_name.to_string(),
                timeout_ms,
                reply_tx,
            ),
        );

        tracing::debug!(
            "Dispatching {} for '{}' to worker {} ({} active, deadline {}ms)",
            correlation_id,
            function_name,
            worker.id,
            worker.active_count(),
            timeout_ms
        );

        // Retirement fails calls it can see; one inserted after its scan lands here.
        if worker.is_closed() {
            self.resolve(correlation_id, Err(RouterError::WorkerDisconnected(worker.id)));
        } else if let Err(e) = self.forward(&worker, correlation_id, payload).await {
            tracing::warn!("Failed to forward {} to worker {}: {}", correlation_id, worker.id, e);
            self.resolve(correlation_id, Err(e));
        }

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(RouterError::WorkerDisconnected(worker.id)),
        }
    }

    async fn forward(
        &self,
        worker: &WorkerHandle,
        correlation_id: CorrelationId,
        payload: Vec<u8>,
    ) -> Result<(), RouterError> {
        let data_tx = worker
            .data_channel()
            .ok_or(RouterError::WorkerDisconnected(worker.id))?;

        data_tx
            .send(DataMessage::Request {
                correlation_id,
                payload,
            })
            .await
            .map_err(|_| RouterError::WorkerDisconnected(worker.id))
    }

    /// Resolves a call with the worker's reply.
    ///
    /// Returns `false` for replies that no longer match an in-flight call: late
    /// replies after a timeout, or replies from a worker the call was not sent to.
    pub fn complete(
        &self,
        worker_id: WorkerId,
        correlation_id: CorrelationId,
        result: Result<Vec<u8>, String>,
    ) -> bool {
        match self
            .in_flight
            .remove_if(&correlation_id, |_, call| call.worker.id == worker_id)
        {
            Some((_, call)) => {
                tracing::debug!(
                    "Completed {} for '{}' on worker {} in {:?}",
                    correlation_id,
                    call.function_name,
                    worker_id,
                    call.started_at.elapsed()
                );
                call.resolve(result.map_err(RouterError::WorkerFailed));
                true
            }
            None => {
                tracing::debug!(
                    "Discarding reply {} from worker {}: no matching call",
                    correlation_id,
                    worker_id
                );
                false
            }
        }
    }

    /// Removes every call whose deadline has passed at `now` and fails it with
    /// `Timeout`. Slots are freed before this returns.
    pub fn expire_overdue(&self, now: Instant) -> Vec<ExpiredCall> {
        let overdue: Vec<CorrelationId> = self
            .in_flight
            .iter()
            .filter(|entry| entry.value().is_overdue(now))
            .map(|entry| *entry.key())
            .collect();

        let mut expired = Vec::with_capacity(overdue.len());
        for correlation_id in overdue {
            // A reply may have won the race since the scan above.
            let Some((_, call)) = self
                .in_flight
                .remove_if(&correlation_id, |_, call| call.is_overdue(now))
            else {
                continue;
            };

            let record = ExpiredCall {
                correlation_id,
                worker: call.worker.clone(),
                function_name: call.function_name.clone(),
                elapsed: now.duration_since(call.started_at),
            };
            let timeout_ms = call.timeout_ms;
            call.resolve(Err(RouterError::Timeout {
                correlation_id,
                timeout_ms,
            }));
            expired.push(record);
        }

        expired
    }

    /// Fails every in-flight call on `worker_id` with `WorkerDisconnected`.
    pub fn fail_worker_calls(&self, worker_id: WorkerId) -> usize {
        let doomed: Vec<CorrelationId> = self
            .in_flight
            .iter()
            .filter(|entry| entry.value().worker.id == worker_id)
            .map(|entry| *entry.key())
            .collect();

        let mut failed = 0;
        for correlation_id in doomed {
            if let Some((_, call)) = self.in_flight.remove(&correlation_id) {
                call.resolve(Err(RouterError::WorkerDisconnected(worker_id)));
                failed += 1;
            }
        }

        failed
    }

    /// Takes a worker out of service: closes its handle, unbinds it and fails its
    /// in-flight calls. Safe to call more than once.
    pub fn retire_worker(&self, worker: &WorkerHandle) {
        worker.close();
        let was_bound = self.registry.unbind_worker(worker.id).is_some();
        let failed = self.fail_worker_calls(worker.id);

        if was_bound || failed > 0 {
            tracing::info!(
                "Retired worker {} of '{}' ({} in-flight calls failed)",
                worker.id,
                worker.function_name(),
                failed
            );
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of in-flight calls referencing `worker_id`.
    pub fn in_flight_for(&self, worker_id: WorkerId) -> usize {
        self.in_flight
            .iter()
            .filter(|entry| entry.value().worker.id == worker_id)
            .count()
    }

    fn resolve(&self, correlation_id: CorrelationId, result: CallResult) {
        if let Some((_, call)) = self.in_flight.remove(&correlation_id) {
            call.resolve(result);
        }
    }
}

/// Claims a slot on the least-busy active worker of `binding`.
///
/// Candidates are ordered by `(active, worker id)` from one snapshot of their
/// counters; if a claim loses a race the next candidate is tried.
pub fn select_worker(binding: &FunctionBinding) -> Result<Arc<WorkerHandle>, RouterError> {
    let limit = binding.config.max_concurrency;

    let mut candidates: Vec<(u32, &Arc<WorkerHandle>)> = binding
        .workers
        .values()
        .filter(|worker| worker.is_active())
        .map(|worker| (worker.active_count(), worker))
        .collect();

    if candidates.is_empty() {
        return Err(RouterError::NoWorkersAvailable(
            binding.function_name().to_string(),
        ));
    }

    candidates.sort_by_key(|(active, worker)| (*active, worker.id));

    for (_, worker) in candidates {
        if worker.try_acquire(limit) {
            return Ok(worker.clone());
        }
    }

    Err(RouterError::Saturated(binding.function_name().to_string()))
}
