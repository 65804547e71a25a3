//! Function Registry
//!
//! In-memory map from function names to their bindings. Each binding lives in its
//! own `DashMap` entry, so mutations serialize per function and a lookup always
//! clones a binding that is not mid-update.

use super::types::*;
use crate::error::RouterError;
use crate::protocol::messages::DataMessage;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

/// Whether `register_function` created a binding or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    Updated,
}

pub struct FunctionRegistry {
    bindings: DashMap<String, FunctionBinding>,
    /// Reverse index used by `unbind_worker`.
    worker_index: DashMap<WorkerId, String>,
    next_route: AtomicU32,
}

impl FunctionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates the binding for `config.function_name`, or replaces its config.
    ///
    /// Calls already in flight keep the deadline they were dispatched with; a lower
    /// `max_concurrency` only affects future admissions.
    pub fn register_function(&self, config: FunctionConfig) -> (Registration, FunctionBinding) {
        match self.bindings.entry(config.function_name.clone()) {
            Entry::Occupied(mut entry) => {
                let binding = entry.get_mut();
                if binding.config != config {
                    tracing::info!(
                        "Updated function '{}': timeout {}ms -> {}ms, max_concurrency {} -> {}",
                        config.function_name,
                        binding.config.timeout_ms,
                        config.timeout_ms,
                        binding.config.max_concurrency,
                        config.max_concurrency
                    );
                }
                binding.config = config;
                (Registration::Updated, binding.clone())
            }
            Entry::Vacant(entry) => {
                tracing::info!(
                    "Registered function '{}' (timeout {}ms, max_concurrency {})",
                    config.function_name,
                    config.timeout_ms,
                    config.max_concurrency
                );
                let binding = entry.insert(FunctionBinding::new(config));
                (Registration::Created, binding.clone())
            }
        }
    }

    /// Attaches a worker to the binding for `function_name`, creating the binding
    /// from the worker's declared config if needed. The first worker of a binding
    /// without a route gets one assigned.
    pub fn bind_worker(
        &self,
        function_name: &str,
        worker: Arc<WorkerHandle>,
    ) -> Result<FunctionBinding, RouterError> {
        match self.worker_index.entry(worker.id) {
            Entry::Occupied(entry) => {
                return Err(RouterError::DuplicateFunction {
                    worker_id: worker.id,
                    function_name: entry.get().clone(),
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(function_name.to_string());
            }
        }

        let mut binding = self
            .bindings
            .entry(function_name.to_string())
            .or_insert_with(|| FunctionBinding::new(worker.declared.clone()));

        let route = match binding.route {
            Some(route) => route,
            None => {
                let route = RouteId(self.next_route.fetch_add(1, Ordering::SeqCst));
                binding.route = Some(route);
                tracing::info!("Assigned route {} to function '{}'", route, function_name);
                route
            }
        };

        binding.workers.insert(worker.id, worker.clone());

        tracing::info!(
            "Bound worker {} ({}) to '{}' on route {} ({} workers)",
            worker.id,
            worker.uuid,
            function_name,
            route,
            binding.workers.len()
        );

        Ok(binding.clone())
    }

    /// Detaches a worker. The binding stays behind, inactive, when it was the last one.
    pub fn unbind_worker(&self, worker_id: WorkerId) -> Option<Arc<WorkerHandle>> {
        let (_, function_name) = self.worker_index.remove(&worker_id)?;
        let mut binding = self.bindings.get_mut(&function_name)?;
        let worker = binding.workers.remove(&worker_id);

        if worker.is_some() {
            tracing::info!(
                "Unbound worker {} from '{}' ({} workers left)",
                worker_id,
                function_name,
                binding.workers.len()
            );
            if binding.workers.is_empty() {
                tracing::info!("Function '{}' has no workers, binding inactive", function_name);
            }
        }

        worker
    }

    /// Returns a snapshot of the binding for `function_name`.
    pub fn lookup(&self, function_name: &str) -> Result<FunctionBinding, RouterError> {
        let binding = self
            .bindings
            .get(function_name)
            .ok_or_else(|| RouterError::UnknownFunction(function_name.to_string()))?;

        if !binding.is_active() {
            return Err(RouterError::NoWorkersAvailable(function_name.to_string()));
        }

        Ok(binding.clone())
    }

    /// Moves a bound worker to `Active` by attaching its data channel.
    pub fn activate_worker(
        &self,
        worker_id: WorkerId,
        data_tx: mpsc::Sender<DataMessage>,
    ) -> anyhow::Result<Arc<WorkerHandle>> {
        let worker = self
            .worker(worker_id)
            .ok_or_else(|| anyhow::anyhow!("Worker {} is not bound", worker_id))?;

        if worker.is_closed() {
            return Err(anyhow::anyhow!("Worker {} was removed", worker_id));
        }
        if !worker.attach_data_channel(data_tx) {
            return Err(anyhow::anyhow!(
                "Worker {} already has a data channel",
                worker_id
            ));
        }

        tracing::info!(
            "Worker {} active for '{}'",
            worker_id,
            worker.function_name()
        );

        Ok(worker)
    }

    pub fn worker(&self, worker_id: WorkerId) -> Option<Arc<WorkerHandle>> {
        let function_name = self.worker_index.get(&worker_id)?.value().clone();
        let binding = self.bindings.get(&function_name)?;
        binding.workers.get(&worker_id).cloned()
    }

    pub fn route_of(&self, function_name: &str) -> Option<RouteId> {
        self.bindings.get(function_name).and_then(|b| b.route)
    }

    /// Summaries of every binding, active or not, sorted by function name.
    pub fn functions(&self) -> Vec<FunctionSummary> {
        let mut functions: Vec<FunctionSummary> = self
            .bindings
            .iter()
            .map(|entry| FunctionSummary::from(entry.value()))
            .collect();
        functions.sort_by(|a, b| a.config.function_name.cmp(&b.config.function_name));
        functions
    }

    pub fn function_count(&self) -> usize {
        self.bindings.len()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_index.len()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self {
            bindings: DashMap::new(),
            worker_index: DashMap::new(),
            next_route: AtomicU32::new(0),
        }
    }
}
