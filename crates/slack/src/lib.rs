//! Slack slash-command plumbing for oi.
//!
//! - **Commands** (`commands`) - form payload decoding and the acknowledgment text
//! - **Verification** (`verify`) - v0 request signing checks and test-mode bypass
//! - **Responses** (`response`) - posting results back to a command's `response_url`
//!
//! # Getting Started
//!
//! 1. Create a Slack app at https://api.slack.com/apps
//! 2. Add a slash command `/oi` whose request URL points at the server's command path
//! 3. Set `OI_SLACK_SIGNING_SECRET` from Basic Information > Signing Secret

pub mod commands;
pub mod response;
pub mod verify;

pub use commands::{acknowledgment_text, CommandParseError, SlashCommandPayload};
pub use response::{CallbackDelivery, DeliveryError, HttpCallbackClient};
pub use verify::{RequestAuthenticator, SlackSignatureVerifier, VerificationError};
