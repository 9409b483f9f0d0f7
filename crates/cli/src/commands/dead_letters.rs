use oi_core::bus::{BusAdmin, BusError};
use oi_core::config::{AppConfig, BusBackend};
use oi_core::domain::delivery::{Delivery, DeliveryId};
use oi_db::{DbPool, SqlEventBus};
use serde::Serialize;

use crate::commands::{load_config, open_pool, runtime, CommandResult, Failure};

const COMMAND: &str = "dead-letters";

#[derive(Debug, Serialize)]
struct DeadLetterSummary {
    id: String,
    user_id: String,
    attempt: u32,
    last_error: Option<String>,
    dead_lettered_at: String,
}

impl From<Delivery> for DeadLetterSummary {
    fn from(delivery: Delivery) -> Self {
        Self {
            user_id: delivery.event.user_id().to_string(),
            id: delivery.id.0,
            attempt: delivery.attempt,
            last_error: delivery.last_error,
            dead_lettered_at: delivery.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DeadLetterReport {
    command: &'static str,
    status: &'static str,
    subscription: String,
    count: usize,
    deliveries: Vec<DeadLetterSummary>,
}

pub fn list(subscription: Option<&str>, limit: u32) -> CommandResult {
    let outcome = load_config().and_then(|config| {
        ensure_durable_backend(&config)?;
        let subscription = subscription
            .map(str::to_string)
            .or_else(|| config.bus.subscriptions.first().cloned())
            .ok_or_else(|| {
                ("config_validation", "no bus subscriptions configured".to_string(), 2)
            })?;

        runtime()?.block_on(async move {
            let pool = open_pool(&config).await?;
            let listed = sql_bus(&config, &pool).dead_letters(&subscription, limit).await;
            pool.close().await;
            let deliveries = listed.map_err(|error| bus_failure(&error))?;
            Ok::<_, Failure>((subscription, deliveries))
        })
    });

    match outcome {
        Ok((subscription, deliveries)) => {
            let deliveries: Vec<DeadLetterSummary> =
                deliveries.into_iter().map(DeadLetterSummary::from).collect();
            CommandResult::report(
                0,
                &DeadLetterReport {
                    command: COMMAND,
                    status: "ok",
                    subscription,
                    count: deliveries.len(),
                    deliveries,
                },
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}

pub fn requeue(id: &str) -> CommandResult {
    let delivery_id = DeliveryId(id.trim().to_string());
    let outcome = load_config().and_then(|config| {
        ensure_durable_backend(&config)?;

        runtime()?.block_on(async move {
            let pool = open_pool(&config).await?;
            let requeued = sql_bus(&config, &pool).requeue(&delivery_id).await;
            pool.close().await;
            requeued.map_err(|error| bus_failure(&error))
        })
    });

    match outcome {
        Ok(delivery) => CommandResult::success(
            COMMAND,
            format!(
                "requeued delivery `{}` on `{}`; state is now {}",
                delivery.id,
                delivery.subscription,
                delivery.state.as_str()
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}

/// Dead letters only survive in the sqlite backend.
fn ensure_durable_backend(config: &AppConfig) -> Result<(), Failure> {
    if matches!(config.bus.backend, BusBackend::Memory) {
        return Err((
            "unsupported_backend",
            "bus.backend is `memory`; dead letters are only kept by the sqlite backend".to_string(),
            2,
        ));
    }
    Ok(())
}

fn sql_bus(config: &AppConfig, pool: &DbPool) -> SqlEventBus {
    SqlEventBus::new(pool.clone(), config.bus.delivery_policy(), config.bus.subscriptions.clone())
}

fn bus_failure(error: &BusError) -> Failure {
    match error {
        BusError::NotFound(id) => ("not_found", format!("no delivery with id `{id}`"), 6),
        BusError::Transition(_) | BusError::Conflict(_) => {
            ("requeue_rejected", error.to_string(), 6)
        }
        _ => ("bus_query", format!("{error} (run `oi migrate`?)"), 5),
    }
}
