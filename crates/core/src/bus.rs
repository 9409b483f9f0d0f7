//! Event bus contract between the webhook and the worker.
//!
//! The bus is at-least-once: a delivery that is claimed but never
//! acknowledged becomes claimable again once its ack deadline passes, and a
//! rejected delivery is retried with exponential backoff until it runs out of
//! attempts and is dead-lettered. Consumers must tolerate seeing the same
//! event more than once.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::command::CommandEvent;
use crate::domain::delivery::{Delivery, DeliveryId, DeliveryState};

pub const DEFAULT_TOPIC: &str = "oi-events";
pub const DEFAULT_SUBSCRIPTION: &str = "oi-events";
pub const ACK_DEADLINE_EXCEEDED: &str = "ack deadline exceeded";

/// Redelivery rules shared by every bus backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Total handler invocations allowed before dead-lettering.
    pub max_attempts: u32,
    /// How long a claim is honoured before the delivery is handed out again.
    pub ack_deadline_seconds: i64,
    pub retry_base_delay_seconds: i64,
    pub retry_backoff_multiplier: u32,
    pub retry_max_delay_seconds: i64,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            ack_deadline_seconds: 300,
            retry_base_delay_seconds: 5,
            retry_backoff_multiplier: 2,
            retry_max_delay_seconds: 600,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid delivery transition from {from:?} to {to:?}: {reason}")]
    InvalidTransition { from: DeliveryState, to: DeliveryState, reason: String },
    #[error("delivery {0} is already claimed by {1}")]
    ClaimConflict(DeliveryId, String),
    #[error("delivery {0} is not yet available")]
    NotYetAvailable(DeliveryId),
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("event bus storage failure: {0}")]
    Storage(String),
    #[error("event bus encode failure: {0}")]
    Encode(String),
    #[error("event bus decode failure: {0}")]
    Decode(String),
    #[error("delivery not found: {0}")]
    NotFound(DeliveryId),
    #[error("delivery {0} was modified concurrently")]
    Conflict(DeliveryId),
    #[error("no subscriptions are registered for topic `{0}`")]
    NoSubscriptions(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// What happened to a claimable delivery offered to a worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(Delivery),
    /// A stale claim with no attempts left; the delivery was dead-lettered
    /// instead of being handed out again.
    Expired(Delivery),
}

impl DeliveryPolicy {
    pub fn create(&self, subscription: &str, event: CommandEvent, now: DateTime<Utc>) -> Delivery {
        Delivery {
            id: DeliveryId(Uuid::new_v4().to_string()),
            subscription: subscription.to_owned(),
            event,
            state: DeliveryState::Pending,
            attempt: 0,
            max_attempts: self.max_attempts.max(1),
            available_at: now,
            claimed_by: None,
            claimed_at: None,
            last_error: None,
            state_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Claims older than this instant are considered abandoned.
    pub fn stale_claim_threshold(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        Duration::try_seconds(self.ack_deadline_seconds)
            .and_then(|deadline| now.checked_sub_signed(deadline))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_claimable(&self, delivery: &Delivery, now: DateTime<Utc>) -> bool {
        match delivery.state {
            DeliveryState::Pending | DeliveryState::RetryScheduled => delivery.available_at <= now,
            DeliveryState::InFlight => delivery
                .claimed_at
                .is_some_and(|claimed_at| claimed_at < self.stale_claim_threshold(now)),
            DeliveryState::Acknowledged | DeliveryState::DeadLettered => false,
        }
    }

    /// Pending|RetryScheduled|stale InFlight -> InFlight.
    pub fn claim(
        &self,
        mut delivery: Delivery,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Delivery, TransitionError> {
        match delivery.state {
            DeliveryState::Pending | DeliveryState::RetryScheduled => {
                if now < delivery.available_at {
                    return Err(TransitionError::NotYetAvailable(delivery.id));
                }
            }
            DeliveryState::InFlight => {
                if !self.is_claimable(&delivery, now) {
                    return Err(TransitionError::ClaimConflict(
                        delivery.id,
                        delivery.claimed_by.unwrap_or_default(),
                    ));
                }
                if delivery.attempt >= delivery.max_attempts {
                    return Err(TransitionError::InvalidTransition {
                        from: delivery.state,
                        to: DeliveryState::InFlight,
                        reason: "stale claim has no attempts left".to_owned(),
                    });
                }
            }
            DeliveryState::Acknowledged | DeliveryState::DeadLettered => {
                return Err(TransitionError::InvalidTransition {
                    from: delivery.state,
                    to: DeliveryState::InFlight,
                    reason: "delivery already in terminal state".to_owned(),
                });
            }
        }

        delivery.state = DeliveryState::InFlight;
        delivery.attempt += 1;
        delivery.claimed_by = Some(worker_id.to_owned());
        delivery.claimed_at = Some(now);
        delivery.state_version += 1;
        delivery.updated_at = now;
        Ok(delivery)
    }

    /// Claims `delivery`, or dead-letters it when it is a stale claim whose
    /// attempt budget is already spent.
    pub fn claim_or_expire(
        &self,
        delivery: Delivery,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, TransitionError> {
        let exhausted_stale_claim = delivery.state == DeliveryState::InFlight
            && delivery.attempt >= delivery.max_attempts
            && self.is_claimable(&delivery, now);
        if exhausted_stale_claim {
            return self.expire(delivery, now).map(ClaimOutcome::Expired);
        }

        self.claim(delivery, worker_id, now).map(ClaimOutcome::Claimed)
    }

    /// Stale InFlight -> DeadLettered.
    pub fn expire(
        &self,
        mut delivery: Delivery,
        now: DateTime<Utc>,
    ) -> Result<Delivery, TransitionError> {
        require_in_flight(&delivery, DeliveryState::DeadLettered)?;
        if !self.is_claimable(&delivery, now) {
            return Err(TransitionError::ClaimConflict(
                delivery.id,
                delivery.claimed_by.unwrap_or_default(),
            ));
        }

        delivery.state = DeliveryState::DeadLettered;
        delivery.last_error = Some(ACK_DEADLINE_EXCEEDED.to_owned());
        delivery.claimed_by = None;
        delivery.claimed_at = None;
        delivery.state_version += 1;
        delivery.updated_at = now;
        Ok(delivery)
    }

    /// InFlight -> Acknowledged.
    pub fn acknowledge(
        &self,
        mut delivery: Delivery,
        now: DateTime<Utc>,
    ) -> Result<Delivery, TransitionError> {
        require_in_flight(&delivery, DeliveryState::Acknowledged)?;

        delivery.state = DeliveryState::Acknowledged;
        delivery.claimed_by = None;
        delivery.claimed_at = None;
        delivery.state_version += 1;
        delivery.updated_at = now;
        Ok(delivery)
    }

    /// InFlight -> RetryScheduled, or DeadLettered once attempts are spent.
    pub fn reject(
        &self,
        mut delivery: Delivery,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Delivery, TransitionError> {
        require_in_flight(&delivery, DeliveryState::RetryScheduled)?;

        if delivery.attempt < delivery.max_attempts {
            delivery.state = DeliveryState::RetryScheduled;
            delivery.available_at = now
                .checked_add_signed(self.retry_delay(delivery.attempt))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
        } else {
            delivery.state = DeliveryState::DeadLettered;
        }

        delivery.last_error = Some(error.to_owned());
        delivery.claimed_by = None;
        delivery.claimed_at = None;
        delivery.state_version += 1;
        delivery.updated_at = now;
        Ok(delivery)
    }

    /// DeadLettered -> Pending with a fresh attempt budget.
    pub fn requeue(
        &self,
        mut delivery: Delivery,
        now: DateTime<Utc>,
    ) -> Result<Delivery, TransitionError> {
        if delivery.state != DeliveryState::DeadLettered {
            return Err(TransitionError::InvalidTransition {
                from: delivery.state,
                to: DeliveryState::Pending,
                reason: "only dead-lettered deliveries can be requeued".to_owned(),
            });
        }

        delivery.state = DeliveryState::Pending;
        delivery.attempt = 0;
        delivery.max_attempts = self.max_attempts.max(1);
        delivery.available_at = now;
        delivery.state_version += 1;
        delivery.updated_at = now;
        Ok(delivery)
    }

    /// Backoff applied after the given (1-based) attempt failed.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let multiplier = i64::from(self.retry_backoff_multiplier.max(1)).saturating_pow(exponent);
        let seconds = self
            .retry_base_delay_seconds
            .saturating_mul(multiplier)
            .min(self.retry_max_delay_seconds);
        Duration::try_seconds(seconds.max(0)).unwrap_or(Duration::MAX)
    }
}

fn require_in_flight(delivery: &Delivery, to: DeliveryState) -> Result<(), TransitionError> {
    if delivery.state == DeliveryState::InFlight {
        return Ok(());
    }

    Err(TransitionError::InvalidTransition {
        from: delivery.state.clone(),
        to,
        reason: "delivery is not in flight".to_owned(),
    })
}

/// Source of "now" for bus backends, replaceable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Stores one delivery per subscription and returns their ids.
    async fn publish(&self, event: CommandEvent) -> Result<Vec<DeliveryId>, BusError>;
}

#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn claim_next(
        &self,
        subscription: &str,
        worker_id: &str,
    ) -> Result<Option<Delivery>, BusError>;

    /// Marks the handling as complete and discards the delivery.
    async fn acknowledge(&self, delivery: &Delivery) -> Result<Delivery, BusError>;

    async fn reject(&self, delivery: &Delivery, error: &str) -> Result<Delivery, BusError>;
}

/// Operator-facing queries over a subscription.
#[async_trait]
pub trait BusAdmin: Send + Sync {
    /// Deliveries that have not reached a terminal state.
    async fn backlog(&self, subscription: &str) -> Result<u64, BusError>;

    async fn dead_letters(
        &self,
        subscription: &str,
        limit: u32,
    ) -> Result<Vec<Delivery>, BusError>;

    async fn requeue(&self, id: &DeliveryId) -> Result<Delivery, BusError>;
}

/// Receives each delivered event. Returning an error marks the delivery as
/// failed and makes it eligible for redelivery.
#[async_trait]
pub trait EventHandler: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn on_event(&self, event: &CommandEvent) -> Result<(), Self::Error>;
}
