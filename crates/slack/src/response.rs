use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;

use oi_core::domain::command::ResponsePayload;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("could not build callback http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("callback request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("callback returned non-200 status: {status}")]
    Status { status: String },
}

/// Posts message text to a caller-supplied response URL.
#[async_trait]
pub trait CallbackDelivery: Send + Sync {
    async fn deliver(&self, url: &str, text: &str) -> Result<(), DeliveryError>;
}

/// One shared client for every callback. No retries.
#[derive(Clone)]
pub struct HttpCallbackClient {
    client: Client,
}

impl HttpCallbackClient {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(timeout).build().map_err(DeliveryError::Client)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackDelivery for HttpCallbackClient {
    async fn deliver(&self, url: &str, text: &str) -> Result<(), DeliveryError> {
        let response =
            self.client.post(url).json(&ResponsePayload::in_channel(text)).send().await?;

        if response.status() != StatusCode::OK {
            return Err(DeliveryError::Status { status: response.status().to_string() });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use serde_json::Value;
    use tokio::sync::Mutex;

    use super::{CallbackDelivery, DeliveryError, HttpCallbackClient};

    #[derive(Clone, Default)]
    struct Captured {
        requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    }

    async fn capture(
        State(captured): State<Captured>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> StatusCode {
        let content_type = headers
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        captured.requests.lock().await.push((content_type, body));
        StatusCode::OK
    }

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{address}")
    }

    #[tokio::test]
    async fn posts_in_channel_json_envelope() {
        let captured = Captured::default();
        let base =
            spawn(Router::new().route("/hook", post(capture)).with_state(captured.clone())).await;
        let client = HttpCallbackClient::new(Duration::from_secs(5)).expect("client");

        client.deliver(&format!("{base}/hook"), "<@U1> hello").await.expect("deliver");

        let requests = captured.requests.lock().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0.as_deref(), Some("application/json"));
        assert_eq!(requests[0].1["response_type"], "in_channel");
        assert_eq!(requests[0].1["text"], "<@U1> hello");
    }

    #[tokio::test]
    async fn non_200_status_is_an_error() {
        let base = spawn(Router::new().route("/hook", post(|| async { StatusCode::ACCEPTED })))
            .await;
        let client = HttpCallbackClient::new(Duration::from_secs(5)).expect("client");

        let error = client.deliver(&format!("{base}/hook"), "hi").await.expect_err("must fail");

        assert!(matches!(error, DeliveryError::Status { ref status } if status.starts_with("202")));
    }

    #[tokio::test]
    async fn server_error_status_is_reported() {
        let base = spawn(Router::new().route(
            "/hook",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "expired_url") }),
        ))
        .await;
        let client = HttpCallbackClient::new(Duration::from_secs(5)).expect("client");

        let error = client.deliver(&format!("{base}/hook"), "hi").await.expect_err("must fail");

        assert_eq!(error.to_string(), "callback returned non-200 status: 500 Internal Server Error");
    }

    #[tokio::test]
    async fn unreachable_url_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        drop(listener);
        let client = HttpCallbackClient::new(Duration::from_secs(5)).expect("client");

        let error = client.deliver(&format!("http://{address}/hook"), "hi").await.expect_err("fail");

        assert!(matches!(error, DeliveryError::Transport(_)));
    }
}
