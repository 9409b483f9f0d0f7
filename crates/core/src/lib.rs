pub mod bus;
pub mod config;
pub mod domain;
pub mod errors;

pub use bus::{
    BusAdmin, BusError, Clock, DeliveryPolicy, EventHandler, EventPublisher, EventSubscriber,
    SystemClock, TransitionError, DEFAULT_SUBSCRIPTION, DEFAULT_TOPIC,
};
pub use domain::command::{CommandEvent, ResponsePayload};
pub use domain::delivery::{Delivery, DeliveryId, DeliveryState};
pub use errors::DomainError;
