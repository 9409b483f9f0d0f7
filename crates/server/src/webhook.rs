use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use oi_core::bus::EventPublisher;
use oi_core::domain::command::ResponsePayload;
use oi_core::errors::DomainError;
use oi_slack::{
    acknowledgment_text, CommandParseError, RequestAuthenticator, SlashCommandPayload,
    VerificationError,
};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct WebhookState {
    authenticator: Arc<dyn RequestAuthenticator>,
    publisher: Arc<dyn EventPublisher>,
}

impl WebhookState {
    pub fn new(
        authenticator: Arc<dyn RequestAuthenticator>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self { authenticator, publisher }
    }
}

/// Every rejection answers with an empty body.
#[derive(Debug, Error)]
pub enum WebhookRejection {
    #[error("request authentication failed: {0}")]
    Unauthorized(#[from] VerificationError),
    #[error("request body could not be decoded: {0}")]
    MalformedBody(#[from] CommandParseError),
    #[error("command is missing a response_url: {0}")]
    MissingResponseUrl(#[from] DomainError),
}

impl IntoResponse for WebhookRejection {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::MalformedBody(_) | Self::MissingResponseUrl(_) => StatusCode::BAD_REQUEST,
        };
        status.into_response()
    }
}

pub fn router(command_path: &str, state: WebhookState) -> Router {
    Router::new().route(command_path, post(handle_command)).with_state(state)
}

pub async fn handle_command(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ResponsePayload>, WebhookRejection> {
    let correlation_id = Uuid::new_v4().to_string();

    let body = state.authenticator.verify(&headers, &body).map_err(|rejection| {
        warn!(
            event_name = "ingress.webhook.unauthorized",
            correlation_id = %correlation_id,
            error = %rejection,
            "rejected unauthenticated command request"
        );
        rejection
    })?;

    let payload = SlashCommandPayload::parse(&body).map_err(|parse_error| {
        warn!(
            event_name = "ingress.webhook.malformed",
            correlation_id = %correlation_id,
            error = %parse_error,
            "rejected undecodable command body"
        );
        parse_error
    })?;

    let event = payload.to_event().map_err(|domain_error| {
        warn!(
            event_name = "ingress.webhook.missing_response_url",
            correlation_id = %correlation_id,
            user_id = %payload.user_id,
            command = %payload.command,
            "rejected command without response_url"
        );
        domain_error
    })?;

    let ack = ResponsePayload::in_channel(acknowledgment_text(event.user_id(), event.text()));

    let user_id = event.user_id().to_owned();
    match state.publisher.publish(event).await {
        Ok(delivery_ids) => info!(
            event_name = "ingress.webhook.published",
            correlation_id = %correlation_id,
            user_id = %user_id,
            team_id = %payload.team_id,
            channel_id = %payload.channel_id,
            deliveries = delivery_ids.len(),
            "command event published"
        ),
        Err(publish_error) => error!(
            event_name = "ingress.webhook.publish_failed",
            correlation_id = %correlation_id,
            user_id = %user_id,
            error = %publish_error,
            "command event could not be published; acknowledging anyway"
        ),
    }

    Ok(Json(ack))
}
