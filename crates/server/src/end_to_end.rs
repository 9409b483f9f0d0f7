//! Full pipeline: signed webhook, bus, subscription worker, consumer and an
//! HTTP callback target.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{Request, StatusCode},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tower::ServiceExt;

use oi_agent::{CommandEventHandler, LlmClient, LlmError};
use oi_core::bus::{BusAdmin, DeliveryPolicy};
use oi_db::InMemoryEventBus;
use oi_slack::verify::{sign, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use oi_slack::{HttpCallbackClient, SlackSignatureVerifier};

use crate::webhook::{self, WebhookState};
use crate::worker::{SubscriptionWorker, WorkerSettings};

const SECRET: &str = "pipeline-signing-secret";

#[derive(Default)]
struct CannedLlm {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl LlmClient for CannedLlm {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().await.push(prompt.to_owned());
        Ok("  A systems language with a borrow checker.\n".to_owned())
    }
}

#[derive(Clone, Default)]
struct Callbacks {
    received: Arc<Mutex<Vec<Value>>>,
}

async fn record(State(callbacks): State<Callbacks>, Json(body): Json<Value>) -> StatusCode {
    callbacks.received.lock().await.push(body);
    StatusCode::OK
}

struct Pipeline {
    webhook: Router,
    bus: Arc<InMemoryEventBus>,
    llm: Arc<CannedLlm>,
    callbacks: Callbacks,
    response_url: String,
    stop: watch::Sender<bool>,
    worker: tokio::task::JoinHandle<()>,
}

impl Pipeline {
    async fn start() -> Self {
        let callbacks = Callbacks::default();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        let callback_router =
            Router::new().route("/hook", post(record)).with_state(callbacks.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, callback_router).await;
        });

        let bus = Arc::new(InMemoryEventBus::new(
            DeliveryPolicy::default(),
            vec!["oi-events".to_owned()],
        ));
        let llm = Arc::new(CannedLlm::default());
        let callback = HttpCallbackClient::new(Duration::from_secs(5)).expect("callback client");
        let handler = Arc::new(CommandEventHandler::new(llm.clone(), Arc::new(callback)));

        let verifier = SlackSignatureVerifier::new(SECRET.to_owned().into(), false);
        let webhook = webhook::router("/oi", WebhookState::new(Arc::new(verifier), bus.clone()));

        let (stop, shutdown) = watch::channel(false);
        let settings = WorkerSettings {
            subscription: "oi-events".to_owned(),
            worker_id: "pipeline-worker".to_owned(),
            max_in_flight: 2,
            poll_interval: Duration::from_millis(10),
        };
        let worker =
            tokio::spawn(SubscriptionWorker::new(bus.clone(), handler, settings).run(shutdown));

        Self {
            webhook,
            bus,
            llm,
            callbacks,
            response_url: format!("http://{address}/hook"),
            stop,
            worker,
        }
    }

    fn command(&self, user_id: &str, text: &str) -> Request<Body> {
        let encoded_url = self.response_url.replace(':', "%3A").replace('/', "%2F");
        let body = format!("user_id={user_id}&text={text}&response_url={encoded_url}");
        let timestamp = Utc::now().timestamp().to_string();

        Request::builder()
            .method("POST")
            .uri("/oi")
            .header("content-type", "application/x-www-form-urlencoded")
            .header(TIMESTAMP_HEADER, &timestamp)
            .header(SIGNATURE_HEADER, sign(SECRET, &timestamp, body.as_bytes()))
            .body(Body::from(body))
            .expect("request")
    }

    async fn wait_for_callbacks(&self, count: usize) -> Vec<Value> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let received = self.callbacks.received.lock().await.clone();
                if received.len() >= count {
                    return received;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("callbacks arrived in time")
    }

    async fn shutdown(self) -> (Arc<InMemoryEventBus>, Callbacks) {
        self.stop.send(true).expect("signal shutdown");
        self.worker.await.expect("worker joined");
        (self.bus, self.callbacks)
    }
}

async fn ack_text(response: axum::response::Response) -> String {
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let ack: Value = serde_json::from_slice(&body).expect("json ack");
    assert_eq!(ack["response_type"], "in_channel");
    ack["text"].as_str().expect("ack text").to_owned()
}

#[tokio::test]
async fn question_is_acknowledged_then_answered_through_the_callback() {
    let pipeline = Pipeline::start().await;

    let response =
        pipeline.webhook.clone().oneshot(pipeline.command("U1", "what%20is%20rust%3F")).await;
    let ack = ack_text(response.expect("webhook call")).await;
    assert_eq!(ack, "<@U1> asked:\n\n> what is rust?\n");

    let received = pipeline.wait_for_callbacks(1).await;
    assert_eq!(received[0]["response_type"], "in_channel");
    assert_eq!(received[0]["text"], "<@U1> A systems language with a borrow checker.");
    assert_eq!(*pipeline.llm.prompts.lock().await, vec!["what is rust?".to_owned()]);

    let (bus, callbacks) = pipeline.shutdown().await;
    assert_eq!(callbacks.received.lock().await.len(), 1);
    assert_eq!(bus.backlog("oi-events").await.expect("backlog"), 0);
    assert_eq!(bus.retained().await, 0);
}

#[tokio::test]
async fn empty_command_gets_a_single_greeting() {
    let pipeline = Pipeline::start().await;

    let response = pipeline.webhook.clone().oneshot(pipeline.command("U2", "")).await;
    let ack = ack_text(response.expect("webhook call")).await;
    assert_eq!(ack, "<@U2> asked:\n\n> \n");

    let received = pipeline.wait_for_callbacks(1).await;
    assert_eq!(received[0]["text"], "Oi <@U2>! What mate?");
    assert!(pipeline.llm.prompts.lock().await.is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let (bus, callbacks) = pipeline.shutdown().await;
    assert_eq!(callbacks.received.lock().await.len(), 1);
    assert_eq!(bus.retained().await, 0);
}
