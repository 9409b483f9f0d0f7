//! Agent Runtime - the consuming half of the oi pipeline
//!
//! - **Completion** (`llm`) - `LlmClient` plus HTTP clients for OpenAI-compatible
//!   (OpenAI, Ollama) and Anthropic endpoints
//! - **Consumer** (`runtime`) - `CommandEventHandler`, which answers one command
//!   event through its `response_url`
//!
//! # Key Types
//!
//! - `CommandEventHandler` - bus `EventHandler` that greets, apologises, or answers
//! - `LlmClient` - one prompt in, one completion out
//!
//! The handler keeps no state between events. The bus may deliver an event more
//! than once and each delivery produces its own callback.

pub mod llm;
pub mod runtime;

pub use llm::{build_llm_client, LlmClient, LlmError};
pub use runtime::{CommandEventHandler, ConsumeError};
