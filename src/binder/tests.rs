//! Binder Module Tests
//!
//! Real loopback sockets: a `WorkerBinder` accepting control connections and
//! `FunctionWorker` clients registering against it.

#[cfg(test)]
mod tests {
    use crate::binder::binder::WorkerBinder;
    use crate::binder::data_plane::DataPlane;
    use crate::dispatch::dispatcher::Dispatcher;
    use crate::error::RouterError;
    use crate::protocol::codec::write_frame;
    use crate::protocol::messages::DataMessage;
    use crate::registry::registry::FunctionRegistry;
    use crate::registry::types::{WorkerId, WorkerState};
    use crate::test_support::wait_until;
    use crate::worker::FunctionWorker;

    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    struct Harness {
        registry: Arc<FunctionRegistry>,
        dispatcher: Arc<Dispatcher>,
        control_addr: SocketAddr,
        server: JoinHandle<()>,
    }

    async fn start(handshake_timeout: Duration) -> Harness {
        let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let registry = FunctionRegistry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let data_plane = DataPlane::new(dispatcher.clone(), loopback, 0, handshake_timeout, 64);
        let binder = WorkerBinder::new(dispatcher.clone(), data_plane, handshake_timeout, 64);

        let listener = TcpListener::bind(SocketAddr::new(loopback, 0)).await.unwrap();
        let control_addr = listener.local_addr().unwrap();
        let server = tokio::spawn(binder.serve(listener));

        Harness {
            registry,
            dispatcher,
            control_addr,
            server,
        }
    }

    fn echo(name: &str, timeout_ms: i32, max_concurrency: i32) -> FunctionWorker {
        FunctionWorker::new(name, timeout_ms, max_concurrency, |payload| async move {
            Ok(payload)
        })
    }

    fn is_active(registry: &FunctionRegistry, worker_id: WorkerId) -> bool {
        registry
            .worker(worker_id)
            .is_some_and(|worker| worker.state() == WorkerState::Active)
    }

    // ============================================================
    // REGISTRATION
    // ============================================================

    #[tokio::test]
    async fn test_registered_worker_becomes_active_and_serves() {
        let harness = start(Duration::from_secs(5)).await;

        let worker = echo("echo", 1_000, 2)
            .with_uuid("7d1c")
            .connect(harness.control_addr)
            .await
            .unwrap();

        assert!(wait_until(|| is_active(&harness.registry, worker.worker_id)).await);
        let handle = harness.registry.worker(worker.worker_id).unwrap();
        assert_eq!(handle.uuid, "7d1c");
        assert_eq!(harness.registry.route_of("echo"), Some(worker.route));

        let reply = harness.dispatcher.dispatch("echo", b"ping".to_vec()).await;
        assert_eq!(reply, Ok(b"ping".to_vec()));

        harness.server.abort();
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let harness = start(Duration::from_secs(5)).await;

        let result = echo("echo", 0, 2).connect(harness.control_addr).await;

        let error = result.err().unwrap().to_string();
        assert!(error.contains("Registration rejected"), "got: {}", error);
        assert_eq!(harness.registry.function_count(), 0);
        assert_eq!(harness.registry.worker_count(), 0);

        harness.server.abort();
    }

    #[tokio::test]
    async fn test_workers_of_one_function_share_a_route() {
        let harness = start(Duration::from_secs(5)).await;

        let first = echo("echo", 1_000, 1).connect(harness.control_addr).await.unwrap();
        let second = echo("echo", 1_000, 1).connect(harness.control_addr).await.unwrap();
        let other = echo("other", 1_000, 1).connect(harness.control_addr).await.unwrap();

        assert_ne!(first.worker_id, second.worker_id);
        assert_eq!(first.route, second.route);
        assert_eq!(first.data_addr, second.data_addr);
        assert_ne!(first.route, other.route);
        assert_ne!(first.data_addr, other.data_addr);

        assert!(wait_until(|| harness.registry.worker_count() == 3).await);
        harness.server.abort();
    }

    #[tokio::test]
    async fn test_update_config_on_live_connection() {
        let harness = start(Duration::from_secs(5)).await;
        let worker = echo("echo", 1_000, 1).connect(harness.control_addr).await.unwrap();

        worker.update_config(2_500, 4).await.unwrap();

        assert!(
            wait_until(|| harness
                .registry
                .lookup("echo")
                .is_ok_and(|binding| binding.config.timeout_ms == 2_500
                    && binding.config.max_concurrency == 4))
            .await
        );
        assert!(harness.registry.worker(worker.worker_id).is_some());

        harness.server.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_finished_executions_are_forgotten() {
        let harness = start(Duration::from_secs(5)).await;
        let worker = echo("echo", 5_000, 8).connect(harness.control_addr).await.unwrap();
        assert!(wait_until(|| is_active(&harness.registry, worker.worker_id)).await);

        let mut calls = Vec::new();
        for i in 0..400u32 {
            let dispatcher = harness.dispatcher.clone();
            calls.push(tokio::spawn(async move {
                dispatcher.dispatch("echo", i.to_be_bytes().to_vec()).await
            }));
        }
        let mut ok = 0;
        for call in calls {
            match call.await.unwrap() {
                Ok(_) => ok += 1,
                Err(RouterError::Saturated(_)) => {}
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }

        // Every finished execution leaves the table.
        assert!(ok > 0);
        assert!(wait_until(|| worker.executions_in_progress() == 0).await);

        harness.server.abort();
    }

    // ============================================================
    // DISCONNECTS
    // ============================================================

    #[tokio::test]
    async fn test_disconnect_retires_worker() {
        let harness = start(Duration::from_secs(5)).await;
        let worker = echo("echo", 1_000, 1).connect(harness.control_addr).await.unwrap();
        let worker_id = worker.worker_id;
        assert!(wait_until(|| is_active(&harness.registry, worker_id)).await);

        worker.disconnect();

        assert!(wait_until(|| harness.registry.worker(worker_id).is_none()).await);
        assert_eq!(
            harness.dispatcher.dispatch("echo", vec![]).await,
            Err(RouterError::NoWorkersAvailable("echo".to_string()))
        );

        harness.server.abort();
    }

    #[tokio::test]
    async fn test_reconnect_reuses_route_and_listener() {
        let harness = start(Duration::from_secs(5)).await;
        let first = echo("echo", 1_000, 1).connect(harness.control_addr).await.unwrap();
        let (route, data_addr, first_id) = (first.route, first.data_addr, first.worker_id);
        first.disconnect();
        assert!(wait_until(|| harness.registry.worker(first_id).is_none()).await);

        let second = echo("echo", 1_000, 1).connect(harness.control_addr).await.unwrap();

        assert_ne!(second.worker_id, first_id);
        assert_eq!(second.route, route);
        assert_eq!(second.data_addr, data_addr);
        assert!(wait_until(|| is_active(&harness.registry, second.worker_id)).await);
        assert_eq!(
            harness.dispatcher.dispatch("echo", b"again".to_vec()).await,
            Ok(b"again".to_vec())
        );

        harness.server.abort();
    }

    // ============================================================
    // HANDSHAKES
    // ============================================================

    #[tokio::test]
    async fn test_silent_control_connection_times_out() {
        let harness = start(Duration::from_millis(100)).await;
        let mut stream = TcpStream::connect(harness.control_addr).await.unwrap();

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await;

        // The router hangs up: EOF or reset, but not a hang.
        assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));
        assert_eq!(harness.registry.worker_count(), 0);

        harness.server.abort();
    }

    #[tokio::test]
    async fn test_data_hello_from_unknown_worker_is_dropped() {
        let harness = start(Duration::from_secs(5)).await;
        let worker = echo("echo", 1_000, 1).connect(harness.control_addr).await.unwrap();
        assert!(wait_until(|| is_active(&harness.registry, worker.worker_id)).await);

        let mut stream = TcpStream::connect(worker.data_addr).await.unwrap();
        write_frame(
            &mut stream,
            &DataMessage::Hello {
                worker_id: WorkerId(999),
            },
        )
        .await
        .unwrap();

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await;

        assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));
        assert!(is_active(&harness.registry, worker.worker_id));

        harness.server.abort();
    }
}
