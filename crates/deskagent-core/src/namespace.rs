//! Tool namespace filter.
//!
//! Desktop tools cross the provider boundary under a reserved prefix
//! (`mcp__desktop__click`).  Inbound, only tool calls under the prefix are
//! surfaced and the prefix is removed; everything else a provider may emit
//! (built-in utilities, server-side tools) is dropped.  Outbound, tool names
//! taken from history or from host tool definitions are re-qualified so the
//! provider sees the same names it produced.

use crate::error::{AgentError, Result};
use crate::model::ContentBlock;

/// Prefix used when no other is configured: MCP tools of the `desktop`
/// server.
pub const DEFAULT_NAMESPACE_PREFIX: &str = "mcp__desktop__";

/// The reserved tool namespace for one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolNamespace {
    prefix: String,
}

impl Default for ToolNamespace {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_NAMESPACE_PREFIX.to_owned(),
        }
    }
}

impl ToolNamespace {
    /// Create a namespace with the given prefix.  An empty prefix would
    /// surface every tool, so it is rejected.
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.trim().is_empty() {
            return Err(AgentError::Config {
                reason: "tool namespace prefix must not be empty".into(),
            });
        }
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Add the prefix to an exposed tool name.
    pub fn qualify(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    /// Map a native tool name to the name exposed downstream.
    ///
    /// Returns `None` when the name is outside the namespace, when nothing
    /// remains after the prefix, or when the remainder still carries the
    /// prefix.
    pub fn expose<'a>(&self, native_name: &'a str) -> Option<&'a str> {
        let exposed = native_name.strip_prefix(self.prefix.as_str())?;
        if exposed.is_empty() || exposed.contains(self.prefix.as_str()) {
            return None;
        }
        Some(exposed)
    }

    /// Filter one block.  Non-tool blocks pass through untouched.
    pub fn filter_block(&self, block: ContentBlock) -> Option<ContentBlock> {
        match block {
            ContentBlock::ToolUse {
                id,
                name,
                input,
                signature,
            } => match self.expose(&name) {
                Some(exposed) => Some(ContentBlock::ToolUse {
                    id,
                    name: exposed.to_owned(),
                    input,
                    signature,
                }),
                None => {
                    tracing::debug!(tool = %name, prefix = %self.prefix, "dropping tool call outside namespace");
                    None
                }
            },
            other => Some(other),
        }
    }

    /// Filter a block sequence, preserving the order of what remains.
    pub fn filter_blocks(&self, blocks: Vec<ContentBlock>) -> Vec<ContentBlock> {
        blocks
            .into_iter()
            .filter_map(|block| self.filter_block(block))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
