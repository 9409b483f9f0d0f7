use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use oi_core::bus::{
    BusAdmin, BusError, ClaimOutcome, Clock, DeliveryPolicy, EventPublisher, EventSubscriber,
    SystemClock, DEFAULT_TOPIC,
};
use oi_core::domain::command::CommandEvent;
use oi_core::domain::delivery::{Delivery, DeliveryId, DeliveryState};

/// Process-local bus with the same delivery rules as [`super::SqlEventBus`].
/// Deliveries are lost on restart and dropped as soon as they are acknowledged.
pub struct InMemoryEventBus {
    deliveries: RwLock<HashMap<String, Delivery>>,
    policy: DeliveryPolicy,
    subscriptions: Vec<String>,
    clock: Arc<dyn Clock>,
}

impl InMemoryEventBus {
    pub fn new(policy: DeliveryPolicy, subscriptions: Vec<String>) -> Self {
        Self {
            deliveries: RwLock::new(HashMap::new()),
            policy,
            subscriptions,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn find_by_id(&self, id: &DeliveryId) -> Option<Delivery> {
        self.deliveries.read().await.get(&id.0).cloned()
    }

    /// Deliveries still held, in any state.
    pub async fn retained(&self) -> usize {
        self.deliveries.read().await.len()
    }

    async fn store_if_version(
        &self,
        updated: Delivery,
        expected_version: u32,
    ) -> Result<Delivery, BusError> {
        let mut deliveries = self.deliveries.write().await;
        let Some(stored) = deliveries.get_mut(&updated.id.0) else {
            return Err(BusError::NotFound(updated.id));
        };
        if stored.state_version != expected_version {
            return Err(BusError::Conflict(updated.id));
        }

        *stored = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: CommandEvent) -> Result<Vec<DeliveryId>, BusError> {
        if self.subscriptions.is_empty() {
            return Err(BusError::NoSubscriptions(DEFAULT_TOPIC.to_string()));
        }

        let now = self.clock.now();
        let mut deliveries = self.deliveries.write().await;
        let mut ids = Vec::with_capacity(self.subscriptions.len());
        for subscription in &self.subscriptions {
            let delivery = self.policy.create(subscription, event.clone(), now);
            ids.push(delivery.id.clone());
            deliveries.insert(delivery.id.0.clone(), delivery);
        }

        Ok(ids)
    }
}

#[async_trait]
impl EventSubscriber for InMemoryEventBus {
    async fn claim_next(
        &self,
        subscription: &str,
        worker_id: &str,
    ) -> Result<Option<Delivery>, BusError> {
        let now = self.clock.now();
        let mut deliveries = self.deliveries.write().await;

        loop {
            let candidate = deliveries
                .values()
                .filter(|delivery| delivery.subscription == subscription)
                .filter(|delivery| self.policy.is_claimable(delivery, now))
                .min_by(|left, right| {
                    (left.available_at, left.created_at)
                        .cmp(&(right.available_at, right.created_at))
                })
                .cloned();

            let Some(candidate) = candidate else {
                return Ok(None);
            };

            match self.policy.claim_or_expire(candidate, worker_id, now)? {
                ClaimOutcome::Claimed(claimed) => {
                    deliveries.insert(claimed.id.0.clone(), claimed.clone());
                    return Ok(Some(claimed));
                }
                ClaimOutcome::Expired(dead) => {
                    deliveries.insert(dead.id.0.clone(), dead);
                }
            }
        }
    }

    async fn acknowledge(&self, delivery: &Delivery) -> Result<Delivery, BusError> {
        let acknowledged = self.policy.acknowledge(delivery.clone(), self.clock.now())?;
        let mut deliveries = self.deliveries.write().await;
        match deliveries.get(&delivery.id.0) {
            None => return Err(BusError::NotFound(delivery.id.clone())),
            Some(stored) if stored.state_version != delivery.state_version => {
                return Err(BusError::Conflict(delivery.id.clone()));
            }
            Some(_) => {}
        }

        deliveries.remove(&delivery.id.0);
        Ok(acknowledged)
    }

    async fn reject(&self, delivery: &Delivery, error: &str) -> Result<Delivery, BusError> {
        let rejected = self.policy.reject(delivery.clone(), error, self.clock.now())?;
        self.store_if_version(rejected, delivery.state_version).await
    }
}

#[async_trait]
impl BusAdmin for InMemoryEventBus {
    async fn backlog(&self, subscription: &str) -> Result<u64, BusError> {
        let deliveries = self.deliveries.read().await;
        let count = deliveries
            .values()
            .filter(|delivery| delivery.subscription == subscription)
            .filter(|delivery| !delivery.state.is_terminal())
            .count();
        Ok(count as u64)
    }

    async fn dead_letters(
        &self,
        subscription: &str,
        limit: u32,
    ) -> Result<Vec<Delivery>, BusError> {
        let deliveries = self.deliveries.read().await;
        let mut dead: Vec<Delivery> = deliveries
            .values()
            .filter(|delivery| delivery.subscription == subscription)
            .filter(|delivery| delivery.state == DeliveryState::DeadLettered)
            .cloned()
            .collect();
        dead.sort_by(|left, right| {
            right.updated_at.cmp(&left.updated_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        dead.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(dead)
    }

    async fn requeue(&self, id: &DeliveryId) -> Result<Delivery, BusError> {
        let Some(delivery) = self.find_by_id(id).await else {
            return Err(BusError::NotFound(id.clone()));
        };

        let expected_version = delivery.state_version;
        let requeued = self.policy.requeue(delivery, self.clock.now())?;
        self.store_if_version(requeued, expected_version).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use oi_core::bus::{
        BusAdmin, BusError, Clock, DeliveryPolicy, EventPublisher, EventSubscriber,
        ACK_DEADLINE_EXCEEDED,
    };
    use oi_core::domain::command::CommandEvent;
    use oi_core::domain::delivery::DeliveryState;

    use super::InMemoryEventBus;

    struct SteppingClock(Mutex<DateTime<Utc>>);

    impl SteppingClock {
        fn advance(&self, by: Duration) {
            *self.0.lock().expect("clock lock") += by;
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().expect("clock lock")
        }
    }

    fn event(text: &str) -> CommandEvent {
        CommandEvent::new("U7", text, "https://hooks.example/commands/7").expect("valid event")
    }

    fn bus(policy: DeliveryPolicy) -> InMemoryEventBus {
        InMemoryEventBus::new(policy, vec!["oi-events".to_string()])
    }

    #[tokio::test]
    async fn publish_then_claim_then_acknowledge() {
        let bus = bus(DeliveryPolicy::default());
        let ids = bus.publish(event("hello")).await.expect("publish");
        assert_eq!(ids.len(), 1);

        let claimed =
            bus.claim_next("oi-events", "worker-1").await.expect("claim").expect("delivery");
        assert_eq!(claimed.event.text(), "hello");
        assert!(bus.claim_next("oi-events", "worker-2").await.expect("claim").is_none());

        bus.acknowledge(&claimed).await.expect("ack");
        assert_eq!(bus.backlog("oi-events").await.expect("backlog"), 0);
        assert!(bus.find_by_id(&claimed.id).await.is_none());
    }

    #[tokio::test]
    async fn acknowledged_deliveries_are_not_retained() {
        let bus = bus(DeliveryPolicy::default());
        for n in 0..200 {
            bus.publish(event(&format!("question {n}"))).await.expect("publish");
            let claimed =
                bus.claim_next("oi-events", "worker").await.expect("claim").expect("delivery");
            bus.acknowledge(&claimed).await.expect("ack");
        }

        assert_eq!(bus.retained().await, 0);
    }

    #[tokio::test]
    async fn second_acknowledgement_reports_missing_delivery() {
        let bus = bus(DeliveryPolicy::default());
        bus.publish(event("hello")).await.expect("publish");
        let claimed = bus.claim_next("oi-events", "w").await.expect("claim").expect("delivery");
        bus.acknowledge(&claimed).await.expect("ack");

        let result = bus.acknowledge(&claimed).await;

        assert!(matches!(result, Err(BusError::NotFound(_))));
    }

    #[tokio::test]
    async fn abandoned_claim_on_last_attempt_is_dead_lettered() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("timestamp");
        let clock = Arc::new(SteppingClock(Mutex::new(start)));
        let policy = DeliveryPolicy {
            max_attempts: 1,
            ack_deadline_seconds: 60,
            ..DeliveryPolicy::default()
        };
        let bus = bus(policy).with_clock(clock.clone());
        bus.publish(event("poison")).await.expect("publish");
        let claimed = bus.claim_next("oi-events", "w1").await.expect("claim").expect("delivery");

        clock.advance(Duration::seconds(61));
        assert!(bus.claim_next("oi-events", "w2").await.expect("claim").is_none());

        let dead = bus.find_by_id(&claimed.id).await.expect("retained dead letter");
        assert_eq!(dead.state, DeliveryState::DeadLettered);
        assert_eq!(dead.attempt, 1);
        assert_eq!(dead.last_error.as_deref(), Some(ACK_DEADLINE_EXCEEDED));
        assert_eq!(bus.backlog("oi-events").await.expect("backlog"), 0);
    }

    #[tokio::test]
    async fn other_subscriptions_are_not_served() {
        let bus = bus(DeliveryPolicy::default());
        bus.publish(event("hello")).await.expect("publish");

        assert!(bus.claim_next("audit", "worker-1").await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn every_published_event_is_claimable_regardless_of_order() {
        let bus = Arc::new(bus(DeliveryPolicy::default()));
        for text in ["one", "two", "three"] {
            bus.publish(event(text)).await.expect("publish");
        }

        let mut seen = Vec::new();
        while let Some(delivery) = bus.claim_next("oi-events", "worker").await.expect("claim") {
            seen.push(delivery.event.text().to_string());
            bus.acknowledge(&delivery).await.expect("ack");
        }
        seen.sort();

        assert_eq!(seen, vec!["one", "three", "two"]);
    }

    #[tokio::test]
    async fn stale_acknowledgement_is_a_conflict() {
        let bus = bus(DeliveryPolicy { max_attempts: 3, ..DeliveryPolicy::default() });
        bus.publish(event("hello")).await.expect("publish");
        let claimed = bus.claim_next("oi-events", "w").await.expect("claim").expect("delivery");
        bus.reject(&claimed, "first failure").await.expect("reject");

        let result = bus.acknowledge(&claimed).await;

        assert!(matches!(result, Err(BusError::Conflict(_))));
    }

    #[tokio::test]
    async fn single_attempt_policy_dead_letters_on_first_rejection() {
        let bus = bus(DeliveryPolicy { max_attempts: 1, ..DeliveryPolicy::default() });
        bus.publish(event("hello")).await.expect("publish");
        let claimed = bus.claim_next("oi-events", "w").await.expect("claim").expect("delivery");

        let dead = bus.reject(&claimed, "boom").await.expect("reject");

        assert_eq!(dead.state, DeliveryState::DeadLettered);
        let letters = bus.dead_letters("oi-events", 5).await.expect("dead letters");
        assert_eq!(letters.len(), 1);
        let requeued = bus.requeue(&dead.id).await.expect("requeue");
        assert_eq!(requeued.state, DeliveryState::Pending);
        assert_eq!(bus.backlog("oi-events").await.expect("backlog"), 1);
    }
}
