//! Data Plane
//!
//! One TCP listener per function route. A worker connects to its function's
//! listener after receiving `BoundConfig`, sends `Hello`, and becomes `Active`.
//! Replies read from the connection are handed to the dispatcher; losing the
//! connection retires the worker.

use crate::dispatch::dispatcher::Dispatcher;
use crate::protocol::codec::{pump_frames, read_frame};
use crate::protocol::messages::DataMessage;
use crate::registry::types::{RouteId, WorkerHandle, wait_closed};

use anyhow::Result;
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};

pub struct DataPlane {
    dispatcher: Arc<Dispatcher>,
    host: IpAddr,
    /// Route `n` listens on `port_base + n`. Zero binds ephemeral ports.
    port_base: u16,
    handshake_timeout: Duration,
    channel_capacity: usize,
    listeners: DashMap<RouteId, SocketAddr>,
    bind_lock: Mutex<()>,
}

impl DataPlane {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        host: IpAddr,
        port_base: u16,
        handshake_timeout: Duration,
        channel_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            host,
            port_base,
            handshake_timeout,
            channel_capacity,
            listeners: DashMap::new(),
            bind_lock: Mutex::new(()),
        })
    }

    /// Returns the listener address for `route`, binding it on first use.
    pub async fn ensure_listener(
        self: &Arc<Self>,
        route: RouteId,
        function_name: &str,
    ) -> Result<SocketAddr> {
        if let Some(addr) = self.address_of(route) {
            return Ok(addr);
        }

        let _guard = self.bind_lock.lock().await;
        if let Some(addr) = self.address_of(route) {
            return Ok(addr);
        }

        let port = self.port_for(route)?;
        let listener = TcpListener::bind(SocketAddr::new(self.host, port)).await?;
        let addr = listener.local_addr()?;
        self.listeners.insert(route, addr);

        tracing::info!(
            "Data channel for '{}' (route {}) listening on {}",
            function_name,
            route,
            addr
        );

        let plane = self.clone();
        tokio::spawn(async move {
            plane.accept_loop(route, listener).await;
        });

        Ok(addr)
    }

    pub fn address_of(&self, route: RouteId) -> Option<SocketAddr> {
        self.listeners.get(&route).map(|addr| *addr)
    }

    fn port_for(&self, route: RouteId) -> Result<u16> {
        if self.port_base == 0 {
            return Ok(0);
        }

        u16::try_from(route.0)
            .ok()
            .and_then(|offset| self.port_base.checked_add(offset))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Route {} does not fit in the port range starting at {}",
                    route,
                    self.port_base
                )
            })
    }

    async fn accept_loop(self: Arc<Self>, route: RouteId, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let plane = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = plane.handle_connection(route, stream).await {
                            tracing::warn!(
                                "Data connection from {} on route {} ended: {}",
                                peer,
                                route,
                                e
                            );
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to accept data connection on route {}: {}",
                        route,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_connection(&self, route: RouteId, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        let hello = tokio::time::timeout(
            self.handshake_timeout,
            read_frame::<_, DataMessage>(&mut reader),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Timed out waiting for Hello"))??;

        let worker_id = match hello {
            Some(DataMessage::Hello { worker_id }) => worker_id,
            Some(other) => return Err(anyhow::anyhow!("Expected Hello, got {:?}", other)),
            None => return Ok(()),
        };

        let registry = self.dispatcher.registry();
        let worker = registry
            .worker(worker_id)
            .ok_or_else(|| anyhow::anyhow!("Worker {} is not bound", worker_id))?;

        if registry.route_of(worker.function_name()) != Some(route) {
            return Err(anyhow::anyhow!(
                "Worker {} of '{}' connected to route {}",
                worker_id,
                worker.function_name(),
                route
            ));
        }

        let (data_tx, mut data_rx) = mpsc::channel(self.channel_capacity);
        let worker = registry.activate_worker(worker_id, data_tx)?;

        let writer_task = {
            let worker = worker.clone();
            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                let mut closed = worker.subscribe_closed();
                if let Err(e) = pump_frames(&mut writer, &mut data_rx, &mut closed).await {
                    tracing::warn!("Data channel write to worker {} failed: {}", worker.id, e);
                    dispatcher.retire_worker(&worker);
                }
            })
        };

        let result = self.read_replies(&worker, &mut reader).await;

        writer_task.abort();
        self.dispatcher.retire_worker(&worker);

        result
    }

    async fn read_replies(&self, worker: &WorkerHandle, reader: &mut OwnedReadHalf) -> Result<()> {
        let mut closed = worker.subscribe_closed();

        loop {
            let frame = tokio::select! {
                frame = read_frame::<_, DataMessage>(reader) => frame?,
                _ = wait_closed(&mut closed) => return Ok(()),
            };

            match frame {
                Some(DataMessage::Reply {
                    correlation_id,
                    result,
                }) => {
                    self.dispatcher.complete(worker.id, correlation_id, result);
                }
                Some(other) => {
                    return Err(anyhow::anyhow!(
                        "Unexpected data frame from worker {}: {:?}",
                        worker.id,
                        other
                    ));
                }
                None => {
                    tracing::info!("Worker {} closed its data channel", worker.id);
                    return Ok(());
                }
            }
        }
    }
}
