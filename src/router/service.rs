use crate::binder::binder::WorkerBinder;
use crate::binder::data_plane::DataPlane;
use crate::config::RouterConfig;
use crate::dispatch::dispatcher::Dispatcher;
use crate::dispatch::supervisor::TimeoutSupervisor;
use crate::http::handlers::{handle_health, handle_invoke, handle_list_functions};
use crate::http::protocol::{ENDPOINT_FUNCTIONS, ENDPOINT_HEALTH, ENDPOINT_INVOKE};
use crate::registry::registry::FunctionRegistry;

use anyhow::Result;
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub struct FunctionRouter {
    pub config: RouterConfig,
    pub registry: Arc<FunctionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub supervisor: Arc<TimeoutSupervisor>,
    pub binder: Arc<WorkerBinder>,
}

/// Addresses of a started router and the tasks serving them.
pub struct RunningRouter {
    pub control_addr: SocketAddr,
    pub http_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningRouter {
    /// Stops accepting connections and stops the background loops.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

impl FunctionRouter {
    pub fn new(config: RouterConfig) -> Arc<Self> {
        let registry = FunctionRegistry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let supervisor = TimeoutSupervisor::new(dispatcher.clone(), config.scan_interval);
        let data_plane = DataPlane::new(
            dispatcher.clone(),
            config.data_host,
            config.data_port_base,
            config.handshake_timeout,
            config.channel_capacity,
        );
        let binder = WorkerBinder::new(
            dispatcher.clone(),
            data_plane,
            config.handshake_timeout,
            config.channel_capacity,
        );

        Arc::new(Self {
            config,
            registry,
            dispatcher,
            supervisor,
            binder,
        })
    }

    pub fn http_app(&self) -> Router {
        Router::new()
            .route(ENDPOINT_INVOKE, post(handle_invoke))
            .route(ENDPOINT_FUNCTIONS, get(handle_list_functions))
            .route(ENDPOINT_HEALTH, get(handle_health))
            .layer(Extension(self.dispatcher.clone()))
    }

    /// Binds both listeners and spawns every background task.
    pub async fn start(&self) -> Result<RunningRouter> {
        let mut tasks = Vec::new();

        // 1. Timeout supervision:
        tasks.push(self.supervisor.clone().start());

        // 2. Worker control channel:
        let control_listener = TcpListener::bind(self.config.control_addr).await?;
        let control_addr = control_listener.local_addr()?;
        tracing::info!("Control channel listening on {}", control_addr);

        let binder = self.binder.clone();
        tasks.push(tokio::spawn(async move {
            binder.serve(control_listener).await;
        }));

        // 3. Stats reporter:
        if let Some(interval) = self.config.stats_interval {
            tasks.push(self.spawn_stats_reporter(interval));
        }

        // 4. HTTP front end:
        let http_listener = TcpListener::bind(self.config.http_addr).await?;
        let http_addr = http_listener.local_addr()?;
        tracing::info!("HTTP server listening on {}", http_addr);

        let app = self.http_app();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(http_listener, app).await {
                tracing::error!("HTTP server stopped: {}", e);
            }
        }));

        Ok(RunningRouter {
            control_addr,
            http_addr,
            tasks,
        })
    }

    fn spawn_stats_reporter(&self, period: Duration) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;
                let functions = dispatcher.registry().functions();
                tracing::info!(
                    "Router stats: {} functions, {} workers, {} calls in flight",
                    functions.len(),
                    dispatcher.registry().worker_count(),
                    dispatcher.in_flight_count()
                );
                for function in functions {
                    tracing::info!(
                        "  - '{}' route={:?} timeout={}ms max_concurrency={} workers={}",
                        function.config.function_name,
                        function.route,
                        function.config.timeout_ms,
                        function.config.max_concurrency,
                        function.workers.len()
                    );
                    for worker in function.workers {
                        tracing::info!(
                            "      {} ({}) {:?} active={}",
                            worker.worker_id,
                            worker.uuid,
                            worker.state,
                            worker.active
                        );
                    }
                }
            }
        })
    }
}
