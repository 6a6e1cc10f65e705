//! Response data model and model catalog.
//!
//! - [`types`] -- Content blocks, messages, token usage, and the response
//!   envelope.
//! - [`catalog`] -- Provider identifiers and the models each adapter
//!   recognizes.

pub mod catalog;
pub mod types;

pub use catalog::{AgentModel, ProviderId, available_models, builtin_models};
pub use types::{
    AgentResponse, ContentBlock, ImageSource, Message, MessageContent, Role, TokenUsage,
    ToolDefinition,
};
