use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use oi_core::bus::{
    BusAdmin, BusError, ClaimOutcome, Clock, DeliveryPolicy, EventPublisher, EventSubscriber,
    SystemClock, DEFAULT_TOPIC,
};
use oi_core::domain::command::CommandEvent;
use oi_core::domain::delivery::{Delivery, DeliveryId, DeliveryState};

use super::RepositoryError;
use crate::DbPool;

/// Lost optimistic races tolerated per `claim_next` call before reporting an empty queue.
const CLAIM_CONTENTION_RETRIES: usize = 8;

/// Durable bus backed by the `command_event_delivery` table.
///
/// Timestamps are stored as fixed-width RFC3339 strings with microsecond
/// precision, so lexical comparison in SQL matches chronological order.
/// Acknowledged deliveries are deleted; dead letters stay until requeued.
pub struct SqlEventBus {
    pool: DbPool,
    policy: DeliveryPolicy,
    subscriptions: Vec<String>,
    clock: Arc<dyn Clock>,
}

impl SqlEventBus {
    pub fn new(pool: DbPool, policy: DeliveryPolicy, subscriptions: Vec<String>) -> Self {
        Self { pool, policy, subscriptions, clock: Arc::new(SystemClock) }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn find_by_id(&self, id: &DeliveryId) -> Result<Option<Delivery>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                subscription,
                payload_json,
                state,
                attempt,
                max_attempts,
                available_at,
                claimed_by,
                claimed_at,
                last_error,
                state_version,
                created_at,
                updated_at
             FROM command_event_delivery
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(delivery_from_row).transpose()
    }

    async fn next_candidate(
        &self,
        subscription: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                subscription,
                payload_json,
                state,
                attempt,
                max_attempts,
                available_at,
                claimed_by,
                claimed_at,
                last_error,
                state_version,
                created_at,
                updated_at
             FROM command_event_delivery
             WHERE subscription = ?
               AND (
                    (state IN ('pending', 'retry_scheduled') AND available_at <= ?)
                    OR (state = 'in_flight' AND claimed_at < ?)
               )
             ORDER BY available_at ASC, created_at ASC
             LIMIT 1",
        )
        .bind(subscription)
        .bind(format_timestamp(now))
        .bind(format_timestamp(self.policy.stale_claim_threshold(now)))
        .fetch_optional(&self.pool)
        .await?;

        row.map(delivery_from_row).transpose()
    }

    /// Writes `delivery` only if the stored row is still at `expected_version`.
    async fn update_if_version(
        &self,
        delivery: &Delivery,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE command_event_delivery SET
                state = ?,
                attempt = ?,
                max_attempts = ?,
                available_at = ?,
                claimed_by = ?,
                claimed_at = ?,
                last_error = ?,
                state_version = ?,
                updated_at = ?
             WHERE id = ? AND state_version = ?",
        )
        .bind(delivery.state.as_str())
        .bind(i64::from(delivery.attempt))
        .bind(i64::from(delivery.max_attempts))
        .bind(format_timestamp(delivery.available_at))
        .bind(delivery.claimed_by.as_deref())
        .bind(delivery.claimed_at.map(format_timestamp))
        .bind(delivery.last_error.as_deref())
        .bind(i64::from(delivery.state_version))
        .bind(format_timestamp(delivery.updated_at))
        .bind(&delivery.id.0)
        .bind(i64::from(expected_version))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_if_version(
        &self,
        id: &DeliveryId,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM command_event_delivery
             WHERE id = ? AND state = 'in_flight' AND state_version = ?",
        )
        .bind(&id.0)
        .bind(i64::from(expected_version))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn row_count(&self) -> Result<u64, RepositoryError> {
        let count = sqlx::query("SELECT COUNT(*) AS count FROM command_event_delivery")
            .fetch_one(&self.pool)
            .await?
            .try_get::<i64, _>("count")?;

        u64::try_from(count)
            .map_err(|_| RepositoryError::Decode(format!("negative row count: {count}")))
    }
}

#[async_trait]
impl EventPublisher for SqlEventBus {
    async fn publish(&self, event: CommandEvent) -> Result<Vec<DeliveryId>, BusError> {
        if self.subscriptions.is_empty() {
            return Err(BusError::NoSubscriptions(DEFAULT_TOPIC.to_string()));
        }

        let payload_json =
            serde_json::to_string(&event).map_err(|error| BusError::Encode(error.to_string()))?;
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        let mut ids = Vec::with_capacity(self.subscriptions.len());

        for subscription in &self.subscriptions {
            let delivery = self.policy.create(subscription, event.clone(), now);
            sqlx::query(
                "INSERT INTO command_event_delivery (
                    id,
                    subscription,
                    user_id,
                    payload_json,
                    state,
                    attempt,
                    max_attempts,
                    available_at,
                    claimed_by,
                    claimed_at,
                    last_error,
                    state_version,
                    created_at,
                    updated_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&delivery.id.0)
            .bind(&delivery.subscription)
            .bind(delivery.event.user_id())
            .bind(&payload_json)
            .bind(delivery.state.as_str())
            .bind(i64::from(delivery.attempt))
            .bind(i64::from(delivery.max_attempts))
            .bind(format_timestamp(delivery.available_at))
            .bind(delivery.claimed_by.as_deref())
            .bind(delivery.claimed_at.map(format_timestamp))
            .bind(delivery.last_error.as_deref())
            .bind(i64::from(delivery.state_version))
            .bind(format_timestamp(delivery.created_at))
            .bind(format_timestamp(delivery.updated_at))
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;

            ids.push(delivery.id);
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(ids)
    }
}

#[async_trait]
impl EventSubscriber for SqlEventBus {
    async fn claim_next(
        &self,
        subscription: &str,
        worker_id: &str,
    ) -> Result<Option<Delivery>, BusError> {
        let mut lost_races = 0;
        while lost_races < CLAIM_CONTENTION_RETRIES {
            let now = self.clock.now();
            let Some(candidate) = self.next_candidate(subscription, now).await? else {
                return Ok(None);
            };

            let expected_version = candidate.state_version;
            let outcome = match self.policy.claim_or_expire(candidate, worker_id, now) {
                Ok(outcome) => outcome,
                Err(_) => {
                    lost_races += 1;
                    continue;
                }
            };

            match outcome {
                ClaimOutcome::Claimed(claimed) => {
                    if self.update_if_version(&claimed, expected_version).await? {
                        return Ok(Some(claimed));
                    }
                    lost_races += 1;
                }
                ClaimOutcome::Expired(dead) => {
                    if !self.update_if_version(&dead, expected_version).await? {
                        lost_races += 1;
                    }
                }
            }
        }

        Ok(None)
    }

    async fn acknowledge(&self, delivery: &Delivery) -> Result<Delivery, BusError> {
        let acknowledged = self.policy.acknowledge(delivery.clone(), self.clock.now())?;
        if !self.delete_if_version(&delivery.id, delivery.state_version).await? {
            return Err(BusError::Conflict(delivery.id.clone()));
        }
        Ok(acknowledged)
    }

    async fn reject(&self, delivery: &Delivery, error: &str) -> Result<Delivery, BusError> {
        let rejected = self.policy.reject(delivery.clone(), error, self.clock.now())?;
        if !self.update_if_version(&rejected, delivery.state_version).await? {
            return Err(BusError::Conflict(delivery.id.clone()));
        }
        Ok(rejected)
    }
}

#[async_trait]
impl BusAdmin for SqlEventBus {
    async fn backlog(&self, subscription: &str) -> Result<u64, BusError> {
        let count = sqlx::query(
            "SELECT COUNT(*) AS count
             FROM command_event_delivery
             WHERE subscription = ?
               AND state IN ('pending', 'in_flight', 'retry_scheduled')",
        )
        .bind(subscription)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?
        .try_get::<i64, _>("count")
        .map_err(RepositoryError::from)?;

        u64::try_from(count)
            .map_err(|_| BusError::Decode(format!("negative backlog count: {count}")))
    }

    async fn dead_letters(
        &self,
        subscription: &str,
        limit: u32,
    ) -> Result<Vec<Delivery>, BusError> {
        let rows = sqlx::query(
            "SELECT
                id,
                subscription,
                payload_json,
                state,
                attempt,
                max_attempts,
                available_at,
                claimed_by,
                claimed_at,
                last_error,
                state_version,
                created_at,
                updated_at
             FROM command_event_delivery
             WHERE subscription = ? AND state = 'dead_lettered'
             ORDER BY updated_at DESC, id ASC
             LIMIT ?",
        )
        .bind(subscription)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(delivery_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn requeue(&self, id: &DeliveryId) -> Result<Delivery, BusError> {
        let Some(delivery) = self.find_by_id(id).await? else {
            return Err(BusError::NotFound(id.clone()));
        };

        let expected_version = delivery.state_version;
        let requeued = self.policy.requeue(delivery, self.clock.now())?;
        if !self.update_if_version(&requeued, expected_version).await? {
            return Err(BusError::Conflict(id.clone()));
        }
        Ok(requeued)
    }
}

fn delivery_from_row(row: SqliteRow) -> Result<Delivery, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = DeliveryState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown delivery state `{state_raw}`")))?;

    let payload_json = row.try_get::<String, _>("payload_json")?;
    let event = serde_json::from_str::<CommandEvent>(&payload_json)
        .map_err(|error| RepositoryError::Decode(format!("invalid command event payload: {error}")))?;

    Ok(Delivery {
        id: DeliveryId(row.try_get("id")?),
        subscription: row.try_get("subscription")?,
        event,
        state,
        attempt: parse_u32("attempt", row.try_get("attempt")?)?,
        max_attempts: parse_u32("max_attempts", row.try_get("max_attempts")?)?,
        available_at: parse_timestamp("available_at", row.try_get("available_at")?)?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: parse_optional_timestamp("claimed_at", row.try_get("claimed_at")?)?,
        last_error: row.try_get("last_error")?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}
