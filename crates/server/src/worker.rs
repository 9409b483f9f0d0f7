use std::sync::Arc;
use std::time::Duration;

use oi_core::bus::{EventHandler, EventSubscriber};
use oi_core::config::BusConfig;
use oi_core::domain::delivery::{Delivery, DeliveryState};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub subscription: String,
    pub worker_id: String,
    pub max_in_flight: usize,
    pub poll_interval: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &BusConfig, subscription: &str, worker_id: &str) -> Self {
        Self {
            subscription: subscription.to_owned(),
            worker_id: worker_id.to_owned(),
            max_in_flight: config.max_in_flight,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

/// Pulls deliveries for one subscription and runs each on its own task.
///
/// At most `max_in_flight` handlers run at once. Deliveries are acknowledged
/// when the handler succeeds and rejected with the handler's error otherwise,
/// so ordering between events is not preserved.
pub struct SubscriptionWorker<H> {
    subscriber: Arc<dyn EventSubscriber>,
    handler: Arc<H>,
    settings: WorkerSettings,
}

impl<H> SubscriptionWorker<H>
where
    H: EventHandler + 'static,
{
    pub fn new(subscriber: Arc<dyn EventSubscriber>, handler: Arc<H>, settings: WorkerSettings) -> Self {
        Self { subscriber, handler, settings }
    }

    /// Runs until `shutdown` turns true (or its sender is dropped), then waits
    /// for in-flight handlers to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let permits = Arc::new(Semaphore::new(self.settings.max_in_flight.max(1)));
        let mut tasks = JoinSet::new();

        info!(
            event_name = "bus.worker.started",
            subscription = %self.settings.subscription,
            worker_id = %self.settings.worker_id,
            max_in_flight = self.settings.max_in_flight,
            "subscription worker started"
        );

        loop {
            while let Some(joined) = tasks.try_join_next() {
                log_join_failure(joined);
            }

            let permit = tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self
                .subscriber
                .claim_next(&self.settings.subscription, &self.settings.worker_id)
                .await
            {
                Ok(Some(delivery)) => {
                    let subscriber = self.subscriber.clone();
                    let handler = self.handler.clone();
                    tasks.spawn(async move {
                        process(subscriber.as_ref(), handler.as_ref(), delivery).await;
                        drop(permit);
                    });
                    continue;
                }
                Ok(None) => drop(permit),
                Err(claim_error) => {
                    drop(permit);
                    error!(
                        event_name = "bus.worker.claim_failed",
                        subscription = %self.settings.subscription,
                        worker_id = %self.settings.worker_id,
                        error = %claim_error,
                        "could not claim next delivery"
                    );
                }
            }

            tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        info!(
            event_name = "bus.worker.draining",
            subscription = %self.settings.subscription,
            worker_id = %self.settings.worker_id,
            in_flight = tasks.len(),
            "waiting for in-flight deliveries"
        );
        while let Some(joined) = tasks.join_next().await {
            log_join_failure(joined);
        }
        info!(
            event_name = "bus.worker.stopped",
            subscription = %self.settings.subscription,
            worker_id = %self.settings.worker_id,
            "subscription worker stopped"
        );
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn process<H: EventHandler>(subscriber: &dyn EventSubscriber, handler: &H, delivery: Delivery) {
    debug!(
        event_name = "bus.delivery.claimed",
        delivery_id = %delivery.id,
        subscription = %delivery.subscription,
        user_id = %delivery.event.user_id(),
        attempt = delivery.attempt,
        "delivery claimed"
    );

    match handler.on_event(&delivery.event).await {
        Ok(()) => match subscriber.acknowledge(&delivery).await {
            Ok(_) => info!(
                event_name = "bus.delivery.acknowledged",
                delivery_id = %delivery.id,
                subscription = %delivery.subscription,
                attempt = delivery.attempt,
                "delivery acknowledged"
            ),
            Err(ack_error) => warn!(
                event_name = "bus.delivery.ack_failed",
                delivery_id = %delivery.id,
                subscription = %delivery.subscription,
                error = %ack_error,
                "delivery handled but acknowledgment failed; it will be redelivered"
            ),
        },
        Err(handler_error) => {
            let reason = handler_error.to_string();
            match subscriber.reject(&delivery, &reason).await {
                Ok(rejected) if rejected.state == DeliveryState::DeadLettered => error!(
                    event_name = "bus.delivery.dead_lettered",
                    delivery_id = %delivery.id,
                    subscription = %delivery.subscription,
                    attempt = rejected.attempt,
                    error = %reason,
                    "delivery exhausted its attempts"
                ),
                Ok(rejected) => warn!(
                    event_name = "bus.delivery.retry_scheduled",
                    delivery_id = %delivery.id,
                    subscription = %delivery.subscription,
                    attempt = rejected.attempt,
                    available_at = %rejected.available_at,
                    error = %reason,
                    "delivery failed; retry scheduled"
                ),
                Err(reject_error) => warn!(
                    event_name = "bus.delivery.reject_failed",
                    delivery_id = %delivery.id,
                    subscription = %delivery.subscription,
                    error = %reject_error,
                    handler_error = %reason,
                    "could not record delivery failure"
                ),
            }
        }
    }
}

fn log_join_failure(joined: Result<(), JoinError>) {
    if let Err(join_error) = joined {
        error!(
            event_name = "bus.worker.task_failed",
            error = %join_error,
            "delivery task panicked or was cancelled"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use thiserror::Error;
    use tokio::sync::{watch, Notify};

    use oi_core::bus::{BusAdmin, DeliveryPolicy, EventHandler, EventPublisher};
    use oi_core::domain::command::CommandEvent;
    use oi_core::domain::delivery::DeliveryState;
    use oi_db::InMemoryEventBus;

    use super::{SubscriptionWorker, WorkerSettings};

    #[derive(Debug, Error)]
    #[error("handler failed")]
    struct HandlerFailed;

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
        fail: bool,
        started: Notify,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        type Error = HandlerFailed;

        async fn on_event(&self, _event: &CommandEvent) -> Result<(), HandlerFailed> {
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            self.started.notify_one();
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HandlerFailed);
            }
            Ok(())
        }
    }

    fn bus(max_attempts: u32) -> Arc<InMemoryEventBus> {
        let policy = DeliveryPolicy {
            max_attempts,
            retry_base_delay_seconds: 0,
            ..DeliveryPolicy::default()
        };
        Arc::new(InMemoryEventBus::new(policy, vec!["oi-events".to_owned()]))
    }

    fn settings(max_in_flight: usize) -> WorkerSettings {
        WorkerSettings {
            subscription: "oi-events".to_owned(),
            worker_id: "worker-test".to_owned(),
            max_in_flight,
            poll_interval: Duration::from_millis(10),
        }
    }

    fn event(n: usize) -> CommandEvent {
        CommandEvent::new(format!("U{n}"), "test", "https://hooks.example/r").expect("event")
    }

    async fn wait_until_drained(bus: &InMemoryEventBus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while bus.backlog("oi-events").await.expect("backlog") > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("backlog drained in time");
    }

    #[tokio::test]
    async fn successful_deliveries_are_acknowledged() {
        let bus = bus(5);
        let mut ids = Vec::new();
        for n in 0..3 {
            ids.extend(bus.publish(event(n)).await.expect("publish"));
        }
        let handler = Arc::new(CountingHandler::default());
        let (stop, shutdown) = watch::channel(false);
        let worker = tokio::spawn(
            SubscriptionWorker::new(bus.clone(), handler.clone(), settings(4)).run(shutdown),
        );

        wait_until_drained(&bus).await;
        stop.send(true).expect("signal shutdown");
        worker.await.expect("worker joined");

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        for id in ids {
            assert!(bus.find_by_id(&id).await.is_none(), "acknowledged delivery is discarded");
        }
    }

    #[tokio::test]
    async fn failing_handler_is_retried_then_dead_lettered() {
        let bus = bus(2);
        let ids = bus.publish(event(1)).await.expect("publish");
        let handler = Arc::new(CountingHandler { fail: true, ..CountingHandler::default() });
        let (stop, shutdown) = watch::channel(false);
        let worker = tokio::spawn(
            SubscriptionWorker::new(bus.clone(), handler.clone(), settings(1)).run(shutdown),
        );

        wait_until_drained(&bus).await;
        stop.send(true).expect("signal shutdown");
        worker.await.expect("worker joined");

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        let delivery = bus.find_by_id(&ids[0]).await.expect("delivery");
        assert_eq!(delivery.state, DeliveryState::DeadLettered);
        assert_eq!(delivery.last_error.as_deref(), Some("handler failed"));
        assert_eq!(bus.dead_letters("oi-events", 10).await.expect("dead letters").len(), 1);
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_max_in_flight() {
        let bus = bus(5);
        for n in 0..6 {
            bus.publish(event(n)).await.expect("publish");
        }
        let handler = Arc::new(CountingHandler {
            delay: Duration::from_millis(30),
            ..CountingHandler::default()
        });
        let (stop, shutdown) = watch::channel(false);
        let worker = tokio::spawn(
            SubscriptionWorker::new(bus.clone(), handler.clone(), settings(2)).run(shutdown),
        );

        wait_until_drained(&bus).await;
        stop.send(true).expect("signal shutdown");
        worker.await.expect("worker joined");

        assert_eq!(handler.calls.load(Ordering::SeqCst), 6);
        assert!(handler.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_delivery() {
        let bus = bus(5);
        let ids = bus.publish(event(1)).await.expect("publish");
        let handler = Arc::new(CountingHandler {
            delay: Duration::from_millis(100),
            ..CountingHandler::default()
        });
        let (stop, shutdown) = watch::channel(false);
        let worker = tokio::spawn(
            SubscriptionWorker::new(bus.clone(), handler.clone(), settings(1)).run(shutdown),
        );

        handler.started.notified().await;
        stop.send(true).expect("signal shutdown");
        worker.await.expect("worker joined");

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(bus.find_by_id(&ids[0]).await.is_none());
        assert_eq!(bus.backlog("oi-events").await.expect("backlog"), 0);
    }
}
