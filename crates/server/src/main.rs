mod bootstrap;
#[cfg(test)]
mod end_to_end;
mod health;
mod webhook;
mod worker;

use std::time::Duration;

use anyhow::{Context, Result};
use oi_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;
use uuid::Uuid;

use crate::health::HealthState;
use crate::webhook::WebhookState;
use crate::worker::{SubscriptionWorker, WorkerSettings};

fn init_logging(config: &AppConfig) {
    use oi_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap(config).await?;
    let server = app.config.server.clone();
    // The first subscription is consumed here; any others belong to external consumers.
    let subscription = app
        .config
        .bus
        .subscriptions
        .first()
        .cloned()
        .context("bus.subscriptions must name at least one subscription")?;

    let (stop, shutdown) = watch::channel(false);

    health::spawn(
        &server.bind_address,
        server.health_check_port,
        HealthState::new(app.db_pool.clone(), app.bus_admin.clone(), &subscription),
        shutdown.clone(),
    )
    .await?;

    let worker_id = format!("oi-server-{}", Uuid::new_v4());
    let worker = tokio::spawn(
        SubscriptionWorker::new(
            app.subscriber.clone(),
            app.handler.clone(),
            WorkerSettings::from_config(&app.config.bus, &subscription, &worker_id),
        )
        .run(shutdown.clone()),
    );

    let address = format!("{}:{}", server.bind_address, server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("could not bind command listener on {address}"))?;
    let router = webhook::router(
        &server.command_path,
        WebhookState::new(app.authenticator.clone(), app.publisher.clone()),
    );

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        command_path = %server.command_path,
        subscription = %subscription,
        worker_id = %worker_id,
        "oi-server accepting slash commands"
    );

    let mut serve_shutdown = shutdown.clone();
    let serving = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = serve_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = server.graceful_shutdown_secs,
        "oi-server stopping"
    );
    let _ = stop.send(true);

    let grace = Duration::from_secs(server.graceful_shutdown_secs);
    let drained = tokio::time::timeout(grace, async {
        let served = serving.await;
        let worked = worker.await;
        (served, worked)
    })
    .await;

    match drained {
        Ok((served, worked)) => {
            served.context("command listener task failed")??;
            worked.context("subscription worker task failed")?;
        }
        Err(_) => tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = server.graceful_shutdown_secs,
            "in-flight work did not finish within the grace period; unacknowledged deliveries will be redelivered"
        ),
    }

    app.db_pool.close().await;
    tracing::info!(event_name = "system.server.stopped", correlation_id = "shutdown", "oi-server stopped");

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
