//! Application lifecycle.
//!
//! [`App`] wires the HTTP server and the ticket consumer together:
//!
//! 1. **Start**: attach the router, start the server, subscribe the ticket
//!    subscriber (which starts consumption)
//! 2. **Run**: until [`wait_for_signal`] returns
//! 3. **Stop**: stop the server, then stop the consumer and close its
//!    source, all under one outer deadline

use crate::config::Settings;
use crate::routes::{AppState, build_router};
use crate::tickets::{TicketLedger, book_message_subscriber};
use crate::users::UserStore;
use anyhow::Context as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};
use user_service_core::{Context, ContextProvider, MessageSource};
use user_service_redpanda::{ConsumerOptions, Redpanda, RedpandaSource};
use user_service_runtime::{ConsumptionEngine, MetricsExporter};
use user_service_web::{AxumListener, HttpServer, Listen, ServeError};

/// The running service: one HTTP server and one consumer.
pub struct App<S: MessageSource, L: Listen = AxumListener> {
    server: HttpServer<L>,
    consumer: ConsumptionEngine<S>,
    ledger: Arc<TicketLedger>,
    users: Arc<UserStore>,
    metrics: MetricsExporter,
    subscribed: AtomicBool,
}

impl App<RedpandaSource> {
    /// Build the service from settings, connecting the consumer to the brokers.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer cannot be created.
    pub fn from_settings(settings: &Settings, metrics: MetricsExporter) -> anyhow::Result<Self> {
        let consumer = Redpanda::new(settings.kafka.brokers.iter().cloned())
            .consumer(
                ContextProvider::timeout(settings.consumer.read_timeout()),
                ConsumerOptions::new(settings.kafka.topics.user_tickets.clone())
                    .group_id(settings.kafka.group_id.clone()),
            )
            .context("could not create ticket consumer")?;

        let server = HttpServer::bind(SocketAddr::from(([0, 0, 0, 0], settings.port)))
            .shutdown_timeout(settings.shutdown.server_timeout())
            .restart_policy(settings.server.restart.policy());

        Ok(Self::new(server, consumer, metrics))
    }
}

impl<S: MessageSource, L: Listen> App<S, L> {
    /// Assemble the service from its parts.
    #[must_use]
    pub fn new(
        server: HttpServer<L>,
        consumer: ConsumptionEngine<S>,
        metrics: MetricsExporter,
    ) -> Self {
        Self {
            server,
            consumer,
            ledger: Arc::new(TicketLedger::new()),
            users: Arc::new(UserStore::new()),
            metrics,
            subscribed: AtomicBool::new(false),
        }
    }

    /// Start serving HTTP and consuming ticket events.
    ///
    /// Calling it again while running changes nothing. [`stop`](Self::stop)
    /// closes the consumer's source, so a stopped app is not restarted.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError`] if the server cannot start.
    pub fn start(&self) -> Result<(), ServeError> {
        self.server.use_handler(build_router(AppState {
            ledger: Arc::clone(&self.ledger),
            users: Arc::clone(&self.users),
            metrics: self.metrics.clone(),
        }));
        self.server.start()?;

        if !self.subscribed.swap(true, Ordering::AcqRel) {
            self.consumer
                .subscribe(book_message_subscriber(Arc::clone(&self.ledger)));
        }

        info!("User service started");
        Ok(())
    }

    /// Stop the server and the consumer within `ctx`.
    ///
    /// Failures are logged; the consumer is closed even if the server did
    /// not shut down in time.
    pub async fn stop(&self, ctx: &Context) {
        info!("Stopping user service");
        self.server.stop_within(ctx).await;

        if let Err(e) = self.consumer.close(ctx).await {
            warn!(error = %e, "Ticket consumer did not close cleanly");
        }
        info!("User service stopped");
    }

    /// The ticket ledger.
    #[must_use]
    pub const fn ledger(&self) -> &Arc<TicketLedger> {
        &self.ledger
    }

    /// The user store.
    #[must_use]
    pub const fn users(&self) -> &Arc<UserStore> {
        &self.users
    }

    /// The HTTP server.
    #[must_use]
    pub const fn server(&self) -> &HttpServer<L> {
        &self.server
    }

    /// The ticket consumer.
    #[must_use]
    pub const fn consumer(&self) -> &ConsumptionEngine<S> {
        &self.consumer
    }
}

/// Wait for Ctrl+C or SIGTERM.
///
/// # Errors
///
/// Returns an error if a signal handler cannot be installed.
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
