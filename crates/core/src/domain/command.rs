use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

pub const IN_CHANNEL: &str = "in_channel";

/// A slash command accepted by the webhook and handed to the worker.
///
/// Fields are private so an event cannot change after it has been published.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CommandEventRecord")]
pub struct CommandEvent {
    user_id: String,
    text: String,
    response_url: String,
}

impl CommandEvent {
    pub fn new(
        user_id: impl Into<String>,
        text: impl Into<String>,
        response_url: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let response_url = response_url.into();
        if response_url.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "command event requires a non-empty response_url".to_owned(),
            ));
        }

        Ok(Self { user_id: user_id.into(), text: text.into(), response_url })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn response_url(&self) -> &str {
        &self.response_url
    }

    /// Slack mention markup for the requesting user.
    pub fn mention(&self) -> String {
        mention(&self.user_id)
    }
}

#[derive(Deserialize)]
struct CommandEventRecord {
    user_id: String,
    text: String,
    response_url: String,
}

impl TryFrom<CommandEventRecord> for CommandEvent {
    type Error = DomainError;

    fn try_from(record: CommandEventRecord) -> Result<Self, Self::Error> {
        Self::new(record.user_id, record.text, record.response_url)
    }
}

pub fn mention(user_id: &str) -> String {
    format!("<@{user_id}>")
}

/// JSON body shared by the immediate acknowledgment and every callback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub response_type: String,
    pub text: String,
}

impl ResponsePayload {
    pub fn in_channel(text: impl Into<String>) -> Self {
        Self { response_type: IN_CHANNEL.to_owned(), text: text.into() }
    }
}
