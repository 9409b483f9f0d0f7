use std::sync::Arc;
use std::time::Duration;

use oi_agent::{build_llm_client, CommandEventHandler, LlmError};
use oi_core::bus::{BusAdmin, EventPublisher, EventSubscriber};
use oi_core::config::{AppConfig, BusBackend, ConfigError};
use oi_db::{connect_with_config, migrations, DbPool, InMemoryEventBus, SqlEventBus};
use oi_slack::{
    DeliveryError, HttpCallbackClient, RequestAuthenticator, SlackSignatureVerifier,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub publisher: Arc<dyn EventPublisher>,
    pub subscriber: Arc<dyn EventSubscriber>,
    pub bus_admin: Arc<dyn BusAdmin>,
    pub authenticator: Arc<dyn RequestAuthenticator>,
    pub handler: Arc<CommandEventHandler>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm client setup failed: {0}")]
    Llm(#[from] LlmError),
    #[error("callback client setup failed: {0}")]
    Callback(#[from] DeliveryError),
}

pub async fn bootstrap(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        bus_backend = ?config.bus.backend,
        llm_provider = config.llm.provider.as_str(),
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let policy = config.bus.delivery_policy();
    let subscriptions = config.bus.subscriptions.clone();
    let (publisher, subscriber, bus_admin): (
        Arc<dyn EventPublisher>,
        Arc<dyn EventSubscriber>,
        Arc<dyn BusAdmin>,
    ) = match config.bus.backend {
        BusBackend::Sqlite => {
            let bus = Arc::new(SqlEventBus::new(db_pool.clone(), policy, subscriptions));
            (bus.clone(), bus.clone(), bus)
        }
        BusBackend::Memory => {
            let bus = Arc::new(InMemoryEventBus::new(policy, subscriptions));
            (bus.clone(), bus.clone(), bus)
        }
    };

    let authenticator: Arc<dyn RequestAuthenticator> = Arc::new(SlackSignatureVerifier::new(
        config.slack.signing_secret.clone(),
        config.slack.allow_test_mode,
    ));

    let llm = build_llm_client(&config.llm)?;
    let callback =
        Arc::new(HttpCallbackClient::new(Duration::from_secs(config.callback.timeout_secs))?);
    let handler = Arc::new(CommandEventHandler::new(llm, callback));

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        test_mode_allowed = config.slack.allow_test_mode,
        "application components wired"
    );

    Ok(Application { config, db_pool, publisher, subscriber, bus_admin, authenticator, handler })
}
