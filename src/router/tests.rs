//! Router End-to-End Tests
//!
//! A full router on loopback ports, real `FunctionWorker` clients, and HTTP calls
//! through `reqwest`.

#[cfg(test)]
mod tests {
    use crate::config::RouterConfig;
    use crate::error::RouterError;
    use crate::http::handlers::status_for;
    use crate::http::protocol::{ErrorResponse, FunctionsResponse};
    use crate::registry::types::{CorrelationId, WorkerId, WorkerState};
    use crate::router::service::{FunctionRouter, RunningRouter};
    use crate::test_support::wait_until;
    use crate::worker::{ConnectedWorker, FunctionWorker};

    use axum::http::StatusCode;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    async fn start_router() -> (Arc<FunctionRouter>, RunningRouter) {
        let router = FunctionRouter::new(RouterConfig::local());
        let running = router.start().await.unwrap();
        (router, running)
    }

    async fn connect_active(
        router: &FunctionRouter,
        running: &RunningRouter,
        worker: FunctionWorker,
    ) -> ConnectedWorker {
        let connected = worker.connect(running.control_addr).await.unwrap();
        let worker_id = connected.worker_id;
        assert!(
            wait_until(|| router
                .registry
                .worker(worker_id)
                .is_some_and(|w| w.state() == WorkerState::Active))
            .await
        );
        connected
    }

    fn url(running: &RunningRouter, path: &str) -> String {
        format!("http://{}{}", running.http_addr, path)
    }

    // ============================================================
    // INVOKE
    // ============================================================

    #[tokio::test]
    async fn test_invoke_round_trip() {
        let (router, running) = start_router().await;
        let worker = FunctionWorker::new("echo", 1_000, 2, |payload| async move {
            let mut reply = b"echo:".to_vec();
            reply.extend(payload);
            Ok(reply)
        });
        let _worker = connect_active(&router, &running, worker).await;

        let response = reqwest::Client::new()
            .post(url(&running, "/invoke/echo"))
            .body("hello")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.bytes().await.unwrap().as_ref(), b"echo:hello");
        assert_eq!(router.dispatcher.in_flight_count(), 0);

        running.shutdown();
    }

    #[tokio::test]
    async fn test_invoke_unknown_function() {
        let (_router, running) = start_router().await;

        let response = reqwest::Client::new()
            .post(url(&running, "/invoke/missing"))
            .body("x")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 404);
        let body: ErrorResponse = response.json().await.unwrap();
        assert_eq!(body.kind, "unknown_function");

        running.shutdown();
    }

    #[tokio::test]
    async fn test_invoke_worker_error() {
        let (router, running) = start_router().await;
        let worker = FunctionWorker::new("fragile", 1_000, 1, |_| async move {
            Err("bad input".to_string())
        });
        let _worker = connect_active(&router, &running, worker).await;

        let response = reqwest::Client::new()
            .post(url(&running, "/invoke/fragile"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 500);
        let body: ErrorResponse = response.json().await.unwrap();
        assert_eq!(body.kind, "worker_failed");
        assert!(body.error.contains("bad input"));

        running.shutdown();
    }

    #[tokio::test]
    async fn test_slow_worker_times_out_and_is_killed() {
        let (router, running) = start_router().await;
        let worker = FunctionWorker::new("slow", 100, 1, |payload| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(payload)
        });
        let worker = connect_active(&router, &running, worker).await;

        let started = Instant::now();
        let response = reqwest::Client::new()
            .post(url(&running, "/invoke/slow"))
            .body("x")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 504);
        assert!(started.elapsed() >= Duration::from_millis(100));
        let body: ErrorResponse = response.json().await.unwrap();
        assert_eq!(body.kind, "timeout");

        assert!(wait_until(|| worker.kills_received() == 1).await);
        let handle = router.registry.worker(worker.worker_id).unwrap();
        assert_eq!(handle.active_count(), 0);

        running.shutdown();
    }

    #[tokio::test]
    async fn test_busy_worker_saturates() {
        let (router, running) = start_router().await;
        let worker = FunctionWorker::new("busy", 5_000, 1, |payload| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(payload)
        });
        let _worker = connect_active(&router, &running, worker).await;

        let client = reqwest::Client::new();
        let first = tokio::spawn(client.post(url(&running, "/invoke/busy")).body("a").send());
        assert!(wait_until(|| router.dispatcher.in_flight_count() == 1).await);

        let second = client
            .post(url(&running, "/invoke/busy"))
            .body("b")
            .send()
            .await
            .unwrap();

        assert_eq!(second.status(), 429);
        assert_eq!(first.await.unwrap().unwrap().status(), 200);

        running.shutdown();
    }

    #[tokio::test]
    async fn test_worker_leaving_makes_function_unavailable() {
        let (router, running) = start_router().await;
        let worker = FunctionWorker::new("echo", 1_000, 1, |payload| async move { Ok(payload) });
        let worker = connect_active(&router, &running, worker).await;
        let worker_id = worker.worker_id;

        worker.disconnect();
        assert!(wait_until(|| router.registry.worker(worker_id).is_none()).await);

        let response = reqwest::Client::new()
            .post(url(&running, "/invoke/echo"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 503);

        running.shutdown();
    }

    // ============================================================
    // INTROSPECTION
    // ============================================================

    #[tokio::test]
    async fn test_list_functions() {
        let (router, running) = start_router().await;
        let worker = FunctionWorker::new("resize", 750, 3, |payload| async move { Ok(payload) })
            .with_uuid("resize-1");
        let worker = connect_active(&router, &running, worker).await;

        let body: FunctionsResponse = reqwest::get(url(&running, "/functions"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body.in_flight, 0);
        assert_eq!(body.functions.len(), 1);
        let function = &body.functions[0];
        assert_eq!(function.config.function_name, "resize");
        assert_eq!(function.config.timeout_ms, 750);
        assert_eq!(function.config.max_concurrency, 3);
        assert_eq!(function.route, Some(worker.route));
        assert_eq!(function.workers.len(), 1);
        assert_eq!(function.workers[0].uuid, "resize-1");
        assert_eq!(function.workers[0].state, WorkerState::Active);

        running.shutdown();
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let (_router, running) = start_router().await;

        let response = reqwest::Client::new()
            .post(url(&running, "/invoke/missing"))
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = response.json().await.unwrap();

        assert_eq!(body["kind"], "unknown_function");
        assert_eq!(body["error"], "unknown function 'missing'");

        running.shutdown();
    }

    #[tokio::test]
    async fn test_health() {
        let (_router, running) = start_router().await;

        let response = reqwest::get(url(&running, "/health")).await.unwrap();

        assert_eq!(response.status(), 200);
        running.shutdown();
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (RouterError::UnknownFunction("f".into()), StatusCode::NOT_FOUND),
            (
                RouterError::NoWorkersAvailable("f".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (RouterError::Saturated("f".into()), StatusCode::TOO_MANY_REQUESTS),
            (
                RouterError::Timeout {
                    correlation_id: CorrelationId(1),
                    timeout_ms: 10,
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                RouterError::WorkerDisconnected(WorkerId(1)),
                StatusCode::BAD_GATEWAY,
            ),
            (
                RouterError::WorkerFailed("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (RouterError::InvalidConfig("x".into()), StatusCode::BAD_REQUEST),
            (
                RouterError::PayloadTooLarge { len: 10, limit: 5 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(status_for(&error), status, "{:?}", error);
        }
    }
}
