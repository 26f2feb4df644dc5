//! Server lifecycle tests.
//!
//! Most tests drive [`HttpServer`] with a scripted listener whose runs end
//! however the test says; the last group serves real HTTP over loopback.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use axum::Router;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use user_service_runtime::{RestartPolicy, RetryPolicy};
use user_service_web::handlers::heartbeat_router;
use user_service_web::{AxumListener, HttpServer, Listen, ServeError};

/// What one scripted run does.
enum Run {
    /// Return this error right away
    Fail(io::ErrorKind),
    /// Serve until shutdown, then return `Ok`
    UntilShutdown,
    /// Ignore shutdown for this long, then return `Ok`
    Linger(Duration),
}

/// Listener that plays back a script, then serves until shutdown.
struct ScriptedListener {
    script: Mutex<VecDeque<Run>>,
    calls: AtomicU64,
}

impl ScriptedListener {
    fn new(script: impl IntoIterator<Item = Run>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicU64::new(0),
        }
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Listen for ScriptedListener {
    async fn listen_and_serve(
        &self,
        _handler: Router,
        shutdown: CancellationToken,
    ) -> Result<(), ServeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Run::UntilShutdown);
        match next {
            Run::Fail(kind) => Err(ServeError::Serve(io::Error::from(kind))),
            Run::UntilShutdown => {
                shutdown.cancelled().await;
                Ok(())
            }
            Run::Linger(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
        }
    }
}

async fn wait_for_calls(listener: &ScriptedListener, calls: u64) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while listener.calls() < calls {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("listener was not called often enough");
}

fn scripted(script: impl IntoIterator<Item = Run>) -> HttpServer<ScriptedListener> {
    let server = HttpServer::with_listener(ScriptedListener::new(script));
    server.use_handler(Router::new());
    server
}

#[tokio::test]
async fn transient_failures_are_retried_until_a_clean_shutdown() {
    let server = scripted([
        Run::Fail(io::ErrorKind::AddrInUse),
        Run::Fail(io::ErrorKind::ConnectionReset),
    ]);

    assert!(server.start().unwrap());
    wait_for_calls(server.listener(), 3).await;
    server.stop().await;

    assert!(!server.is_running());
    assert_eq!(server.listener().calls(), 3);
    assert_eq!(server.iterations(), 3);
    assert_eq!(server.runs(), 1);
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let server = scripted([]);

    assert!(server.start().unwrap());
    assert!(!server.start().unwrap());
    wait_for_calls(server.listener(), 1).await;

    server.stop().await;
    server.stop().await;

    assert_eq!(server.runs(), 1);
    assert_eq!(server.listener().calls(), 1);
    assert!(!server.is_running());
}

#[tokio::test]
async fn start_without_handler_is_rejected() {
    let server = HttpServer::with_listener(ScriptedListener::new([]));

    let err = server.start().unwrap_err();

    assert!(matches!(err, ServeError::MissingHandler));
    assert!(!server.is_running());
    assert_eq!(server.runs(), 0);
}

#[tokio::test]
async fn server_can_be_restarted_after_stop() {
    let server = scripted([]);

    server.start().unwrap();
    wait_for_calls(server.listener(), 1).await;
    server.stop().await;

    assert!(server.start().unwrap());
    wait_for_calls(server.listener(), 2).await;
    server.stop().await;

    assert_eq!(server.runs(), 2);
    assert_eq!(server.listener().calls(), 2);
}

#[tokio::test]
async fn slow_shutdown_is_bounded_by_the_timeout() {
    let server = HttpServer::with_listener(ScriptedListener::new([Run::Linger(
        Duration::from_millis(500),
    )]))
    .shutdown_timeout(Duration::from_millis(50));
    server.use_handler(Router::new());

    server.start().unwrap();
    wait_for_calls(server.listener(), 1).await;

    let started = tokio::time::Instant::now();
    server.stop().await;
    assert!(started.elapsed() < Duration::from_millis(400));

    // The lingering run still finishes and the loop then exits.
    tokio::time::timeout(Duration::from_secs(2), server.wait_stopped())
        .await
        .unwrap();
    assert_eq!(server.listener().calls(), 1);
}

#[tokio::test]
async fn backoff_sleep_is_interrupted_by_stop() {
    let policy = RetryPolicy::builder()
        .initial_delay(Duration::from_secs(30))
        .jitter(false)
        .build();
    let server = HttpServer::with_listener(ScriptedListener::new([Run::Fail(
        io::ErrorKind::AddrInUse,
    )]))
    .restart_policy(RestartPolicy::Backoff(policy));
    server.use_handler(Router::new());

    server.start().unwrap();
    wait_for_calls(server.listener(), 1).await;

    let started = tokio::time::Instant::now();
    server.stop().await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(server.listener().calls(), 1);
    assert!(!server.is_running());
}

fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

#[tokio::test]
async fn axum_listener_serves_the_heartbeat() {
    let server = HttpServer::bind(loopback());
    server.use_handler(heartbeat_router());
    server.start().unwrap();

    let addr = tokio::time::timeout(Duration::from_secs(2), server.listener().bound())
        .await
        .unwrap()
        .unwrap();

    let body = reqwest::get(format!("http://{addr}/ping"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "pong");

    server.stop().await;
    assert!(!server.is_running());
    assert_eq!(server.listener().local_addr(), None);
}

#[tokio::test]
async fn bind_failures_are_retried_with_backoff() {
    let occupied = std::net::TcpListener::bind(loopback()).unwrap();
    let addr = occupied.local_addr().unwrap();

    let policy = RetryPolicy::builder()
        .initial_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(20))
        .jitter(false)
        .build();
    let server = HttpServer::bind(addr).restart_policy(RestartPolicy::Backoff(policy));
    server.use_handler(heartbeat_router());
    server.start().unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while server.iterations() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert!(server.is_running());
    assert_eq!(server.listener().local_addr(), None);

    server.stop().await;
    assert!(!server.is_running());
    drop(occupied);
}
