//! User service HTTP server and ticket consumer.

use anyhow::Context as _;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use user_service::{App, Settings, wait_for_signal};
use user_service_core::Context;
use user_service_runtime::MetricsExporter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "user_service=info,user_service_runtime=info,user_service_web=info,tower_http=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting user service");

    let settings = Settings::load().context("failed to load settings")?;

    let metrics = if settings.metrics.enabled {
        MetricsExporter::install().context("failed to install metrics exporter")?
    } else {
        MetricsExporter::default()
    };

    let app = App::from_settings(&settings, metrics)?;
    app.start().context("failed to start HTTP server")?;
    info!(port = settings.port, "User service running");

    wait_for_signal()
        .await
        .context("failed to listen for shutdown signals")?;

    let ctx = Context::with_timeout(settings.shutdown.process_timeout());
    app.stop(&ctx).await;

    info!("Shutdown complete");
    Ok(())
}
