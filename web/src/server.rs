//! Server lifecycle manager.
//!
//! [`HttpServer`] owns a listener and keeps it serving from a background
//! loop driven by a [`LoopController`]. One iteration is one call to
//! [`Listen::listen_and_serve`]:
//!
//! - a clean return after [`HttpServer::stop`] ends the iteration quietly and
//!   the loop exits at its next check;
//! - an error (bind failure, socket error) is logged and the listener is run
//!   again, immediately or after a backoff depending on the
//!   [`RestartPolicy`].
//!
//! `stop` flips the run flag, triggers graceful shutdown and waits for the
//! loop to exit for at most the shutdown timeout. Requests still in flight
//! after that are left to finish on their own.

use crate::error::ServeError;
use async_trait::async_trait;
use axum::Router;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use user_service_core::Context;
use user_service_runtime::metrics::SERVER_RESTARTS;
use user_service_runtime::{Iteration, LoopController, RestartPolicy, bounded_teardown_async};

/// Default bound on graceful shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A blocking listen-and-serve primitive.
///
/// Implementations serve `handler` until `shutdown` is cancelled, then
/// return `Ok(())`. Any other way of ending is an error.
#[async_trait]
pub trait Listen: Send + Sync + 'static {
    /// Serve until `shutdown` fires or the listener fails.
    async fn listen_and_serve(
        &self,
        handler: Router,
        shutdown: CancellationToken,
    ) -> Result<(), ServeError>;
}

/// TCP listener serving an axum [`Router`].
#[derive(Debug)]
pub struct AxumListener {
    addr: SocketAddr,
    bound: watch::Sender<Option<SocketAddr>>,
}

impl AxumListener {
    /// Listener for `addr`. Port 0 picks a free port on every bind.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        let (bound, _) = watch::channel(None);
        Self { addr, bound }
    }

    /// The configured address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The address currently bound, if the listener is serving.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.borrow()
    }

    /// Wait until the listener is bound and return the bound address.
    pub async fn bound(&self) -> Option<SocketAddr> {
        let mut rx = self.bound.subscribe();
        rx.wait_for(Option::is_some).await.ok().and_then(|addr| *addr)
    }
}

#[async_trait]
impl Listen for AxumListener {
    async fn listen_and_serve(
        &self,
        handler: Router,
        shutdown: CancellationToken,
    ) -> Result<(), ServeError> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|source| ServeError::Bind {
                addr: self.addr,
                source,
            })?;
        let local = listener.local_addr()?;
        self.bound.send_replace(Some(local));
        info!(addr = %local, "HTTP server listening");

        let served = axum::serve(listener, handler)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;

        self.bound.send_replace(None);
        served.map_err(ServeError::Serve)
    }
}

/// Start/stop lifecycle around a [`Listen`] implementation.
///
/// # Example
///
/// ```ignore
/// let server = HttpServer::bind(([0, 0, 0, 0], 8080).into());
/// server.use_handler(router);
/// server.start()?;
/// // ...
/// server.stop().await;
/// ```
pub struct HttpServer<L: Listen = AxumListener> {
    listener: Arc<L>,
    handler: RwLock<Option<Router>>,
    controller: LoopController,
    /// Token of the current run; replaced on every launch
    shutdown: Mutex<CancellationToken>,
    shutdown_timeout: Duration,
    restart: RestartPolicy,
}

impl HttpServer<AxumListener> {
    /// Server listening on `addr` over TCP.
    #[must_use]
    pub fn bind(addr: SocketAddr) -> Self {
        Self::with_listener(AxumListener::new(addr))
    }
}

impl<L: Listen> HttpServer<L> {
    /// Server around a custom listener.
    #[must_use]
    pub fn with_listener(listener: L) -> Self {
        Self {
            listener: Arc::new(listener),
            handler: RwLock::new(None),
            controller: LoopController::new("http_server"),
            shutdown: Mutex::new(CancellationToken::new()),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            restart: RestartPolicy::default(),
        }
    }

    /// Bound on graceful shutdown (default: 5 seconds).
    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// What to do between a failed run and the next one.
    #[must_use]
    pub const fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    /// Attach the request handler. Takes effect on the next `start`.
    pub fn use_handler(&self, handler: Router) {
        *self
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Start serving in the background if the server is idle.
    ///
    /// Returns whether a new serve loop was launched.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::MissingHandler`] if [`use_handler`](Self::use_handler)
    /// was never called.
    pub fn start(&self) -> Result<bool, ServeError> {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ServeError::MissingHandler)?;

        let mut shutdown = self.shutdown.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.controller.start(|| {
            *shutdown = CancellationToken::new();
            ServeLoop {
                listener: Arc::clone(&self.listener),
                handler,
                shutdown: shutdown.clone(),
                restart: self.restart.clone(),
                attempts: 0,
                failures: 0,
            }
        }))
    }

    /// Stop serving, waiting at most the shutdown timeout.
    ///
    /// A shutdown that does not finish in time is logged, not returned.
    pub async fn stop(&self) {
        self.stop_within(&Context::background()).await;
    }

    /// Like [`stop`](Self::stop), also bounded by `parent`.
    pub async fn stop_within(&self, parent: &Context) {
        {
            let shutdown = self.shutdown.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.controller.stop() {
                debug!("HTTP server already stopped");
                return;
            }
            shutdown.cancel();
        }

        let ctx = parent.child_with_timeout(self.shutdown_timeout);
        let stopped = self.controller.wait_stopped();
        match bounded_teardown_async(&ctx, async move {
            stopped.await;
            Ok::<(), Infallible>(())
        })
        .await
        {
            Ok(()) => info!("HTTP server stopped"),
            Err(e) => warn!(
                error = %e,
                timeout_ms = u64::try_from(self.shutdown_timeout.as_millis()).unwrap_or(u64::MAX),
                "HTTP server shutdown did not complete"
            ),
        }
    }

    /// Resolves once the latest serve loop has exited.
    pub fn wait_stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        self.controller.wait_stopped()
    }

    /// Whether the serve loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }

    /// Number of serve loops launched so far.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.controller.runs()
    }

    /// Number of completed listen-and-serve calls.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.controller.iterations()
    }

    /// The listener.
    #[must_use]
    pub const fn listener(&self) -> &Arc<L> {
        &self.listener
    }
}

impl<L: Listen> std::fmt::Debug for HttpServer<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("controller", &self.controller)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("restart", &self.restart)
            .finish_non_exhaustive()
    }
}

struct ServeLoop<L> {
    listener: Arc<L>,
    handler: Router,
    shutdown: CancellationToken,
    restart: RestartPolicy,
    attempts: u64,
    failures: u32,
}

#[async_trait]
impl<L: Listen> Iteration for ServeLoop<L> {
    async fn run_once(&mut self) {
        if let Some(delay) = self.restart.delay_after(self.failures) {
            debug!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                failures = self.failures,
                "Waiting before restarting HTTP server"
            );
            tokio::select! {
                () = self.shutdown.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
        if self.shutdown.is_cancelled() {
            return;
        }

        if self.attempts > 0 {
            metrics::counter!(SERVER_RESTARTS).increment(1);
        }
        self.attempts += 1;

        match self
            .listener
            .listen_and_serve(self.handler.clone(), self.shutdown.clone())
            .await
        {
            Ok(()) => {
                self.failures = 0;
                debug!(attempt = self.attempts, "HTTP server shut down");
            }
            Err(e) => {
                self.failures = self.failures.saturating_add(1);
                error!(error = %e, attempt = self.attempts, "HTTP server failed, restarting");
            }
        }
    }
}
