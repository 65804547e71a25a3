use crate::protocol::codec::{read_frame, write_frame};
use crate::protocol::messages::{ControlMessage, DataMessage};
use crate::registry::types::{CorrelationId, RouteId, WorkerId};

use anyhow::Result;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Type-erased async handler: request payload in, reply payload or error message out.
pub type CallHandlerFn = Arc<
    dyn Fn(Vec<u8>) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, String>> + Send>>
        + Send
        + Sync,
>;

const QUEUE_CAPACITY: usize = 1024;

type Executions = Arc<DashMap<CorrelationId, JoinHandle<()>>>;

pub struct FunctionWorker {
    function_name: String,
    timeout_ms: i32,
    max_concurrency: i32,
    worker_uuid: Option<String>,
    handler: CallHandlerFn,
}

impl FunctionWorker {
    pub fn new<F, Fut>(
        function_name: &str,
        timeout_ms: i32,
        max_concurrency: i32,
        handler: F,
    ) -> Self
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, String>> + Send + 'static,
    {
        let handler: CallHandlerFn = Arc::new(move |payload: Vec<u8>| {
            Box::pin(handler(payload))
                as Pin<Box<dyn Future<Output = Result<Vec<u8>, String>> + Send>>
        });

        Self {
            function_name: function_name.to_string(),
            timeout_ms,
            max_concurrency,
            worker_uuid: None,
            handler,
        }
    }

    pub fn with_uuid(mut self, uuid: &str) -> Self {
        self.worker_uuid = Some(uuid.to_string());
        self
    }

    /// Registers with the router at `control_addr`, opens the data channel and
    /// starts serving requests in the background.
    pub async fn connect(self, control_addr: SocketAddr) -> Result<ConnectedWorker> {
        let control = TcpStream::connect(control_addr).await?;
        control.set_nodelay(true)?;
        let (mut control_reader, mut control_writer) = control.into_split();

        write_frame(
            &mut control_writer,
            &ControlMessage::RegisterConfig {
                function_name: self.function_name.clone(),
                timeout_ms: self.timeout_ms,
                max_concurrency: self.max_concurrency,
                worker_uuid: self.worker_uuid.clone(),
            },
        )
        .await?;

        let (worker_id, route, data_addr) =
            match read_frame::<_, ControlMessage>(&mut control_reader).await? {
                Some(ControlMessage::BoundConfig {
                    worker_id,
                    route,
                    data_addr,
                    ..
                }) => (worker_id, route, data_addr),
                Some(ControlMessage::Rejected { reason }) => {
                    return Err(anyhow::anyhow!("Registration rejected: {}", reason));
                }
                Some(other) => {
                    return Err(anyhow::anyhow!("Expected BoundConfig, got {:?}", other));
                }
                None => return Err(anyhow::anyhow!("Router closed the control channel")),
            };

        // Listeners bound to the unspecified address are reached through the router's host.
        let data_addr = if data_addr.ip().is_unspecified() {
            SocketAddr::new(control_addr.ip(), data_addr.port())
        } else {
            data_addr
        };

        let data = TcpStream::connect(data_addr).await?;
        data.set_nodelay(true)?;
        let (data_reader, mut data_writer) = data.into_split();
        write_frame(&mut data_writer, &DataMessage::Hello { worker_id }).await?;

        tracing::info!(
            "Worker {} serving '{}' via {} (route {})",
            worker_id,
            self.function_name,
            data_addr,
            route
        );

        let (control_tx, control_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (reply_tx, reply_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(QUEUE_CAPACITY);
        let kills = Arc::new(AtomicUsize::new(0));
        let running: Executions = Arc::new(DashMap::new());

        let tasks = vec![
            tokio::spawn(write_all(control_writer, control_rx)),
            tokio::spawn(write_all(data_writer, reply_rx)),
            tokio::spawn(read_all(control_reader, event_tx.clone(), Event::Control)),
            tokio::spawn(read_all(data_reader, event_tx, Event::Data)),
        ];

        let event_loop = tokio::spawn(run_events(
            worker_id,
            event_rx,
            reply_tx,
            self.handler.clone(),
            kills.clone(),
            running.clone(),
        ));

        Ok(ConnectedWorker {
            worker_id,
            route,
            data_addr,
            function_name: self.function_name,
            control_tx,
            kills,
            running,
            tasks,
            event_loop,
        })
    }
}

/// A worker registered with a router and serving its data channel.
pub struct ConnectedWorker {
    pub worker_id: WorkerId,
    pub route: RouteId,
    pub data_addr: SocketAddr,
    function_name: String,
    control_tx: mpsc::Sender<ControlMessage>,
    kills: Arc<AtomicUsize>,
    running: Executions,
    tasks: Vec<JoinHandle<Result<()>>>,
    event_loop: JoinHandle<()>,
}

impl ConnectedWorker {
    /// Number of kill signals received so far.
    pub fn kills_received(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    /// Number of requests currently executing in this worker.
    pub fn executions_in_progress(&self) -> usize {
        self.running.len()
    }

    /// Re-sends the registration with a new config. The router answers on the
    /// control channel; the answer is only logged here.
    pub async fn update_config(&self, timeout_ms: i32, max_concurrency: i32) -> Result<()> {
        self.control_tx
            .send(ControlMessage::RegisterConfig {
                function_name: self.function_name.clone(),
                timeout_ms,
                max_concurrency,
                worker_uuid: None,
            })
            .await
            .map_err(|_| anyhow::anyhow!("Control channel closed"))
    }

    /// Drops both connections immediately.
    pub fn disconnect(self) {
        for task in &self.tasks {
            task.abort();
        }
        self.event_loop.abort();
    }

    /// Waits until the router closes the connections.
    pub async fn join(self) -> Result<()> {
        let _ = self.event_loop.await;
        for task in &self.tasks {
            task.abort();
        }
        Ok(())
    }
}

enum Event {
    Control(ControlMessage),
    Data(DataMessage),
}

async fn write_all<W, T>(mut writer: W, mut rx: mpsc::Receiver<T>) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    while let Some(msg) = rx.recv().await {
        write_frame(&mut writer, &msg).await?;
    }
    Ok(())
}

async fn read_all<R, T>(
    mut reader: R,
    tx: mpsc::Sender<Event>,
    wrap: fn(T) -> Event,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    while let Some(frame) = read_frame::<_, T>(&mut reader).await? {
        if tx.send(wrap(frame)).await.is_err() {
            break;
        }
    }
    Ok(())
}

async fn run_events(
    worker_id: WorkerId,
    mut events: mpsc::Receiver<Event>,
    reply_tx: mpsc::Sender<DataMessage>,
    handler: CallHandlerFn,
    kills: Arc<AtomicUsize>,
    running: Executions,
) {
    // Ends once both readers have stopped.
    while let Some(event) = events.recv().await {
        match event {
            Event::Data(DataMessage::Request {
                correlation_id,
                payload,
            }) => {
                let handler = handler.clone();
                let reply_tx = reply_tx.clone();
                let registered = running.clone();
                let (registered_tx, registered_rx) = oneshot::channel::<()>();

                // The execution waits until its handle is in `running`, so its own
                // removal always comes after the insert.
                let execution = tokio::spawn(async move {
                    if registered_rx.await.is_err() {
                        return;
                    }
                    let result = handler(payload).await;
                    let _ = reply_tx
                        .send(DataMessage::Reply {
                            correlation_id,
                            result,
                        })
                        .await;
                    registered.remove(&correlation_id);
                });

                running.insert(correlation_id, execution);
                let _ = registered_tx.send(());
            }
            Event::Control(ControlMessage::Kill { correlation_id }) => {
                kills.fetch_add(1, Ordering::SeqCst);
                match running.remove(&correlation_id) {
                    Some((_, execution)) => {
                        execution.abort();
                        tracing::info!("Worker {} aborted {}", worker_id, correlation_id);
                    }
                    None => {
                        tracing::debug!(
                            "Worker {} has nothing to kill for {}",
                            worker_id,
                            correlation_id
                        );
                    }
                }
            }
            Event::Control(ControlMessage::BoundConfig {
                timeout_ms,
                max_concurrency,
                ..
            }) => {
                tracing::info!(
                    "Worker {} config now timeout={}ms max_concurrency={}",
                    worker_id,
                    timeout_ms,
                    max_concurrency
                );
            }
            Event::Control(ControlMessage::Rejected { reason }) => {
                tracing::warn!("Worker {} update rejected: {}", worker_id, reason);
            }
            Event::Control(other) => {
                tracing::warn!("Worker {} ignoring control frame {:?}", worker_id, other);
            }
            Event::Data(other) => {
                tracing::warn!("Worker {} ignoring data frame {:?}", worker_id, other);
            }
        }
    }

    for entry in running.iter() {
        entry.value().abort();
    }
    running.clear();
}
