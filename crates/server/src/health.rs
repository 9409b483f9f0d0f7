use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use oi_core::bus::BusAdmin;
use oi_db::{ping, DbPool};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    bus_admin: Arc<dyn BusAdmin>,
    subscription: String,
}

impl HealthState {
    pub fn new(db_pool: DbPool, bus_admin: Arc<dyn BusAdmin>, subscription: &str) -> Self {
        Self { db_pool, bus_admin, subscription: subscription.to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub bus: HealthCheck,
    pub backlog: Option<u64>,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    state: HealthState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        let stopped = async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        };
        if let Err(error) =
            axum::serve(listener, router(state)).with_graceful_shutdown(stopped).await
        {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let (bus, backlog) = bus_check(state.bus_admin.as_ref(), &state.subscription).await;
    let ready = database.status == "ready" && bus.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck { status: "ready", detail: "oi-server runtime initialized".to_string() },
        database,
        bus,
        backlog,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn bus_check(admin: &dyn BusAdmin, subscription: &str) -> (HealthCheck, Option<u64>) {
    match admin.backlog(subscription).await {
        Ok(backlog) => (
            HealthCheck {
                status: "ready",
                detail: format!("subscription `{subscription}` has {backlog} pending deliveries"),
            },
            Some(backlog),
        ),
        Err(error) => (
            HealthCheck { status: "degraded", detail: format!("backlog query failed: {error}") },
            None,
        ),
    }
}
