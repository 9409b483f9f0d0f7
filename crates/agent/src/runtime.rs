use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use oi_core::bus::EventHandler;
use oi_core::domain::command::CommandEvent;
use oi_slack::response::{CallbackDelivery, DeliveryError};

use crate::llm::{LlmClient, LlmError};

#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error(transparent)]
    Completion(#[from] LlmError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Turns a command event into exactly one user-visible callback: a greeting for
/// empty text, an apology when the completion fails, or the completion itself.
///
/// Holds no per-event state, so redelivering the same event just repeats the
/// same calls.
pub struct CommandEventHandler {
    llm: Arc<dyn LlmClient>,
    callback: Arc<dyn CallbackDelivery>,
}

impl CommandEventHandler {
    pub fn new(llm: Arc<dyn LlmClient>, callback: Arc<dyn CallbackDelivery>) -> Self {
        Self { llm, callback }
    }
}

pub fn greeting_text(mention: &str) -> String {
    format!("Oi {mention}! What mate?")
}

pub fn apology_text(mention: &str, error: &dyn std::error::Error) -> String {
    format!("Oi {mention}! Sorry mate: {error}")
}

pub fn answer_text(mention: &str, completion: &str) -> String {
    format!("{mention} {}", completion.trim())
}

#[async_trait]
impl EventHandler for CommandEventHandler {
    type Error = ConsumeError;

    async fn on_event(&self, event: &CommandEvent) -> Result<(), ConsumeError> {
        let mention = event.mention();

        if event.text().is_empty() {
            info!(
                event_name = "consumer.greeting",
                user_id = %event.user_id(),
                "empty command text, sending greeting"
            );
            self.callback.deliver(event.response_url(), &greeting_text(&mention)).await?;
            return Ok(());
        }

        let completion = match self.llm.complete(event.text()).await {
            Ok(completion) => completion,
            Err(error) => {
                warn!(
                    event_name = "consumer.completion.failed",
                    user_id = %event.user_id(),
                    error = %error,
                    "completion provider failed"
                );
                let apology = apology_text(&mention, &error);
                if let Err(delivery_error) =
                    self.callback.deliver(event.response_url(), &apology).await
                {
                    warn!(
                        event_name = "consumer.apology.delivery_failed",
                        user_id = %event.user_id(),
                        error = %delivery_error,
                        "could not deliver apology"
                    );
                }
                return Err(error.into());
            }
        };

        self.callback.deliver(event.response_url(), &answer_text(&mention, &completion)).await?;
        info!(
            event_name = "consumer.answer.delivered",
            user_id = %event.user_id(),
            completion_chars = completion.trim().chars().count(),
            "answer delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use oi_core::bus::EventHandler;
    use oi_core::domain::command::CommandEvent;
    use oi_slack::response::{CallbackDelivery, DeliveryError};

    use super::{CommandEventHandler, ConsumeError};
    use crate::llm::{LlmClient, LlmError};

    const URL: &str = "https://hooks.example/commands/1";

    #[derive(Default)]
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn replying(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies.into()), prompts: Mutex::default() })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().await.push(prompt.to_string());
            self.replies.lock().await.pop_front().unwrap_or(Err(LlmError::EmptyResponse))
        }
    }

    #[derive(Default)]
    struct RecordingCallback {
        delivered: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl RecordingCallback {
        fn failing() -> Arc<Self> {
            Arc::new(Self { delivered: Mutex::default(), fail: true })
        }
    }

    #[async_trait]
    impl CallbackDelivery for RecordingCallback {
        async fn deliver(&self, url: &str, text: &str) -> Result<(), DeliveryError> {
            self.delivered.lock().await.push((url.to_string(), text.to_string()));
            if self.fail {
                return Err(DeliveryError::Status { status: "410 Gone".to_string() });
            }
            Ok(())
        }
    }

    fn event(text: &str) -> CommandEvent {
        CommandEvent::new("U1", text, URL).expect("valid event")
    }

    #[tokio::test]
    async fn empty_text_sends_greeting_without_completion() {
        let llm = ScriptedLlm::replying(vec![]);
        let callback = Arc::new(RecordingCallback::default());
        let handler = CommandEventHandler::new(llm.clone(), callback.clone());

        handler.on_event(&event("")).await.expect("handled");

        assert!(llm.prompts.lock().await.is_empty());
        assert_eq!(
            *callback.delivered.lock().await,
            vec![(URL.to_string(), "Oi <@U1>! What mate?".to_string())]
        );
    }

    #[tokio::test]
    async fn success_delivers_mention_and_trimmed_completion() {
        let llm = ScriptedLlm::replying(vec![Ok("\n\n  Hello there.  \n".to_string())]);
        let callback = Arc::new(RecordingCallback::default());
        let handler = CommandEventHandler::new(llm.clone(), callback.clone());

        handler.on_event(&event("test")).await.expect("handled");

        assert_eq!(*llm.prompts.lock().await, vec!["test".to_string()]);
        assert_eq!(
            *callback.delivered.lock().await,
            vec![(URL.to_string(), "<@U1> Hello there.".to_string())]
        );
    }

    #[tokio::test]
    async fn provider_failure_sends_apology_and_returns_error() {
        let llm = ScriptedLlm::replying(vec![Err(LlmError::Status {
            status: "500 Internal Server Error".to_string(),
            body: "upstream".to_string(),
        })]);
        let callback = Arc::new(RecordingCallback::default());
        let handler = CommandEventHandler::new(llm, callback.clone());

        let error = handler.on_event(&event("test")).await.expect_err("must fail");

        assert!(matches!(error, ConsumeError::Completion(LlmError::Status { .. })));
        assert_eq!(
            *callback.delivered.lock().await,
            vec![(
                URL.to_string(),
                "Oi <@U1>! Sorry mate: llm provider returned 500 Internal Server Error: upstream"
                    .to_string()
            )]
        );
    }

    #[tokio::test]
    async fn apology_delivery_failure_still_reports_provider_error() {
        let llm = ScriptedLlm::replying(vec![Err(LlmError::EmptyResponse)]);
        let callback = RecordingCallback::failing();
        let handler = CommandEventHandler::new(llm, callback.clone());

        let error = handler.on_event(&event("test")).await.expect_err("must fail");

        assert!(matches!(error, ConsumeError::Completion(LlmError::EmptyResponse)));
        assert_eq!(callback.delivered.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn answer_delivery_failure_is_returned() {
        let llm = ScriptedLlm::replying(vec![Ok("answer".to_string())]);
        let handler = CommandEventHandler::new(llm, RecordingCallback::failing());

        let error = handler.on_event(&event("test")).await.expect_err("must fail");

        assert!(matches!(error, ConsumeError::Delivery(DeliveryError::Status { .. })));
    }

    #[tokio::test]
    async fn greeting_delivery_failure_is_returned() {
        let handler =
            CommandEventHandler::new(ScriptedLlm::replying(vec![]), RecordingCallback::failing());

        let error = handler.on_event(&event("")).await.expect_err("must fail");

        assert!(matches!(error, ConsumeError::Delivery(_)));
    }

    #[tokio::test]
    async fn redelivered_event_repeats_the_same_calls() {
        let llm = ScriptedLlm::replying(vec![Ok("one".to_string()), Ok("one".to_string())]);
        let callback = Arc::new(RecordingCallback::default());
        let handler = CommandEventHandler::new(llm.clone(), callback.clone());
        let event = event("again");

        handler.on_event(&event).await.expect("first");
        handler.on_event(&event).await.expect("second");

        let delivered = callback.delivered.lock().await;
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0], delivered[1]);
        assert_eq!(llm.prompts.lock().await.len(), 2);
    }
}
