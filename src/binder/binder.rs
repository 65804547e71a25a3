//! Worker Binder
//!
//! Drives the control-channel handshake:
//! `ControlConnected -> ConfigReceived -> Bound -> Active`.
//!
//! 1. The worker connects and sends `RegisterConfig`.
//! 2. The config is validated; invalid configs are answered with `Rejected` and the
//!    connection is closed.
//! 3. The function is registered, the worker is bound and the data plane makes sure
//!    the function's route has a listener.
//! 4. `BoundConfig` is sent back. The worker becomes `Active` once its data channel
//!    says `Hello` (see `data_plane`).
//!
//! Losing the control connection in any state retires the worker.

use super::data_plane::DataPlane;
use crate::dispatch::dispatcher::Dispatcher;
use crate::error::RouterError;
use crate::protocol::codec::{pump_frames, read_frame, write_frame};
use crate::protocol::messages::ControlMessage;
use crate::registry::types::*;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub struct WorkerBinder {
    dispatcher: Arc<Dispatcher>,
    data_plane: Arc<DataPlane>,
    handshake_timeout: Duration,
    channel_capacity: usize,
    next_worker_id: AtomicU64,
}

impl WorkerBinder {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        data_plane: Arc<DataPlane>,
        handshake_timeout: Duration,
        channel_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            data_plane,
            handshake_timeout,
            channel_capacity,
            next_worker_id: AtomicU64::new(1),
        })
    }

    /// Accepts control connections until the task is dropped.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let binder = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = binder.handle_connection(stream, peer).await {
                            tracing::warn!("Control connection from {} ended: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept control connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    pub async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();
        log_transition(peer, None, WorkerState::ControlConnected);

        let first = tokio::time::timeout(
            self.handshake_timeout,
            read_frame::<_, ControlMessage>(&mut reader),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Timed out waiting for RegisterConfig"))??;

        let (function_name, timeout_ms, max_concurrency, worker_uuid) = match first {
            Some(ControlMessage::RegisterConfig {
                function_name,
                timeout_ms,
                max_concurrency,
                worker_uuid,
            }) => (function_name, timeout_ms, max_concurrency, worker_uuid),
            Some(other) => {
                return Err(anyhow::anyhow!("Expected RegisterConfig, got {:?}", other));
            }
            None => return Ok(()),
        };

        let config = match FunctionConfig::validate(&function_name, timeout_ms, max_concurrency) {
            Ok(config) => config,
            Err(e) => {
                reject(&mut writer, &e).await;
                return Err(e.into());
            }
        };
        log_transition(peer, None, WorkerState::ConfigReceived);

        let worker_id = WorkerId(self.next_worker_id.fetch_add(1, Ordering::SeqCst));
        let uuid = worker_uuid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let (control_tx, mut control_rx) = mpsc::channel(self.channel_capacity);
        let worker = WorkerHandle::new(worker_id, uuid, config.clone(), control_tx);

        let bound = match self.bind(&worker, config).await {
            Ok(bound) => bound,
            Err(e) => {
                self.dispatcher.retire_worker(&worker);
                return Err(e);
            }
        };
        log_transition(peer, Some(worker_id), WorkerState::Bound);

        if let Err(e) = write_frame(&mut writer, &bound).await {
            self.dispatcher.retire_worker(&worker);
            return Err(e);
        }

        let writer_task = {
            let worker = worker.clone();
            tokio::spawn(async move {
                let mut closed = worker.subscribe_closed();
                if let Err(e) = pump_frames(&mut writer, &mut control_rx, &mut closed).await {
                    tracing::warn!("Control write to worker {} failed: {}", worker.id, e);
                }
            })
        };

        let result = self.read_control(&worker, &mut reader).await;

        writer_task.abort();
        self.dispatcher.retire_worker(&worker);
        log_transition(peer, Some(worker_id), WorkerState::Removed);

        result
    }

    /// Registers the function, binds the worker and opens the route's listener.
    /// Returns the `BoundConfig` to send to the worker.
    async fn bind(
        &self,
        worker: &Arc<WorkerHandle>,
        config: FunctionConfig,
    ) -> Result<ControlMessage> {
        let registry = self.dispatcher.registry();
        let function_name = config.function_name.clone();

        registry.register_function(config);
        let binding = registry.bind_worker(&function_name, worker.clone())?;
        let route = binding
            .route
            .ok_or_else(|| anyhow::anyhow!("Binding for '{}' has no route", function_name))?;
        let data_addr = self.data_plane.ensure_listener(route, &function_name).await?;

        Ok(bound_config(worker.id, &binding.config, route, data_addr))
    }

    async fn read_control(
        &self,
        worker: &WorkerHandle,
        reader: &mut OwnedReadHalf,
    ) -> Result<()> {
        let mut closed = worker.subscribe_closed();

        loop {
            let frame = tokio::select! {
                frame = read_frame::<_, ControlMessage>(reader) => frame?,
                _ = wait_closed(&mut closed) => return Ok(()),
            };

            match frame {
                Some(ControlMessage::RegisterConfig {
                    function_name,
                    timeout_ms,
                    max_concurrency,
                    ..
                }) => {
                    let reply = match self.reregister(
                        worker,
                        &function_name,
                        timeout_ms,
                        max_concurrency,
                    ) {
                        Ok(bound) => bound,
                        Err(e) => {
                            tracing::warn!(
                                "Rejected re-registration from worker {}: {}",
                                worker.id,
                                e
                            );
                            ControlMessage::Rejected {
                                reason: e.to_string(),
                            }
                        }
                    };
                    if !worker.send_control(reply).await {
                        return Ok(());
                    }
                }
                Some(other) => {
                    tracing::warn!(
                        "Ignoring unexpected control frame from worker {}: {:?}",
                        worker.id,
                        other
                    );
                }
                None => {
                    tracing::info!("Worker {} closed its control channel", worker.id);
                    return Ok(());
                }
            }
        }
    }

    /// Applies a config update sent by an already bound worker.
    fn reregister(
        &self,
        worker: &WorkerHandle,
        function_name: &str,
        timeout_ms: i32,
        max_concurrency: i32,
    ) -> Result<ControlMessage, RouterError> {
        let config = FunctionConfig::validate(function_name, timeout_ms, max_concurrency)?;

        if config.function_name != worker.function_name() {
            return Err(RouterError::DuplicateFunction {
                worker_id: worker.id,
                function_name: worker.function_name().to_string(),
            });
        }

        let (_, binding) = self.dispatcher.registry().register_function(config);
        let route = binding
            .route
            .ok_or_else(|| RouterError::NoWorkersAvailable(function_name.to_string()))?;
        let data_addr = self
            .data_plane
            .address_of(route)
            .ok_or_else(|| RouterError::NoWorkersAvailable(function_name.to_string()))?;

        Ok(bound_config(worker.id, &binding.config, route, data_addr))
    }
}

fn bound_config(
    worker_id: WorkerId,
    config: &FunctionConfig,
    route: RouteId,
    data_addr: SocketAddr,
) -> ControlMessage {
    ControlMessage::BoundConfig {
        worker_id,
        function_name: config.function_name.clone(),
        timeout_ms: config.timeout_ms,
        max_concurrency: config.max_concurrency,
        route,
        data_addr,
    }
}

async fn reject<W>(writer: &mut W, error: &RouterError)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    tracing::warn!("Rejecting registration: {}", error);
    let msg = ControlMessage::Rejected {
        reason: error.to_string(),
    };
    if let Err(e) = write_frame(writer, &msg).await {
        tracing::debug!("Could not deliver rejection: {}", e);
    }
}

fn log_transition(peer: SocketAddr, worker_id: Option<WorkerId>, state: WorkerState) {
    match worker_id {
        Some(worker_id) => tracing::debug!("Worker {} at {} -> {:?}", worker_id, peer, state),
        None => tracing::debug!("Control connection {} -> {:?}", peer, state),
    }
}
