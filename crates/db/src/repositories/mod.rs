use thiserror::Error;

use oi_core::bus::BusError;

pub mod event_bus;
pub mod memory;

pub use event_bus::SqlEventBus;
pub use memory::InMemoryEventBus;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for BusError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => Self::Storage(error.to_string()),
            RepositoryError::Decode(message) => Self::Decode(message),
        }
    }
}
