use std::collections::HashMap;

use thiserror::Error;
use url::form_urlencoded;

use oi_core::domain::command::{mention, CommandEvent};
use oi_core::errors::DomainError;

/// Form fields Slack posts for a slash command invocation.
///
/// Only `user_id`, `text` and `response_url` drive behaviour; the rest are kept
/// for log context.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlashCommandPayload {
    pub token: String,
    pub team_id: String,
    pub team_domain: String,
    pub channel_id: String,
    pub channel_name: String,
    pub user_id: String,
    pub user_name: String,
    pub command: String,
    pub text: String,
    pub response_url: String,
    pub api_app_id: String,
    pub is_enterprise_install: bool,
    pub trigger_id: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("request body is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed percent-encoding at byte offset {0}")]
    MalformedEscape(usize),
}

impl SlashCommandPayload {
    /// Decodes an `application/x-www-form-urlencoded` body. The first value
    /// wins when a key repeats. `text` and `response_url` are trimmed.
    pub fn parse(body: &[u8]) -> Result<Self, CommandParseError> {
        let raw = std::str::from_utf8(body).map_err(|_| CommandParseError::InvalidUtf8)?;
        validate_escapes(raw)?;

        let mut fields: HashMap<String, String> = HashMap::new();
        for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
            fields.entry(key.into_owned()).or_insert_with(|| value.into_owned());
        }

        let mut take = |key: &str| fields.remove(key).unwrap_or_default();

        Ok(Self {
            token: take("token"),
            team_id: take("team_id"),
            team_domain: take("team_domain"),
            channel_id: take("channel_id"),
            channel_name: take("channel_name"),
            user_id: take("user_id"),
            user_name: take("user_name"),
            command: take("command"),
            text: take("text").trim().to_owned(),
            response_url: take("response_url").trim().to_owned(),
            api_app_id: take("api_app_id"),
            is_enterprise_install: take("is_enterprise_install").eq_ignore_ascii_case("true"),
            trigger_id: take("trigger_id"),
        })
    }

    pub fn to_event(&self) -> Result<CommandEvent, DomainError> {
        CommandEvent::new(self.user_id.clone(), self.text.clone(), self.response_url.clone())
    }
}

fn validate_escapes(raw: &str) -> Result<(), CommandParseError> {
    let bytes = raw.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' {
            let valid = bytes
                .get(index + 1..index + 3)
                .is_some_and(|pair| pair.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return Err(CommandParseError::MalformedEscape(index));
            }
            index += 3;
            continue;
        }
        index += 1;
    }
    Ok(())
}

/// Echo of the question posted back immediately: a mention header, then every
/// line of `text` quoted with `> `.
pub fn acknowledgment_text(user_id: &str, text: &str) -> String {
    let mut ack = format!("{} asked:\n\n", mention(user_id));
    for line in text.split('\n') {
        ack.push_str("> ");
        ack.push_str(line);
        ack.push('\n');
    }
    ack
}
