//! Shared translation loop.
//!
//! Every adapter splits into a transport, which opens one provider session
//! and yields native events, and a [`Translator`], a pure state machine that
//! maps each native event to zero or more envelopes.  [`drive`] connects the
//! two through a [`CancellationBridge`]: it pulls one native event at a time,
//! yields the resulting envelopes in order, and stops without error once
//! cancellation is observed.

use futures::Stream;
use futures::stream::BoxStream;
use tracing::{debug, trace};

use crate::cancel::{CancellationBridge, Pulled};
use crate::error::Result;
use crate::model::{AgentResponse, ContentBlock, ProviderId};
use crate::namespace::ToolNamespace;
use crate::providers::ResponseStream;

/// Advisory stop reason attached to content envelopes that request a tool.
pub(crate) const TOOL_USE_HINT: &str = "tool_use";

/// Native-event-to-envelope state machine for one provider turn.
pub(crate) trait Translator: Send + 'static {
    type Event: Send + 'static;

    /// Translate one native event.  Unrecognized event kinds produce no
    /// envelopes; provider-reported errors and malformed payloads are
    /// returned as errors.
    fn translate(&mut self, event: Self::Event) -> Result<Vec<AgentResponse>>;

    /// Called once when the native stream ends on its own.  Flushes pending
    /// content and fails if the turn never reached its terminal event.
    fn finish(&mut self) -> Result<Vec<AgentResponse>>;
}

/// Turns finished native blocks into envelopes, applying the namespace
/// filter and the tool-use switch.
#[derive(Debug, Clone)]
pub(crate) struct BlockEmitter {
    namespace: ToolNamespace,
    use_tools: bool,
}

impl BlockEmitter {
    pub(crate) fn new(namespace: ToolNamespace, use_tools: bool) -> Self {
        Self {
            namespace,
            use_tools,
        }
    }

    pub(crate) fn namespace(&self) -> &ToolNamespace {
        &self.namespace
    }

    /// Filter `blocks` and wrap what survives in an assistant envelope.
    /// Returns `None` when nothing survives.
    pub(crate) fn assistant(&self, blocks: Vec<ContentBlock>) -> Option<AgentResponse> {
        let blocks = self.filter(blocks);
        if blocks.is_empty() {
            return None;
        }
        let envelope = AgentResponse::assistant(blocks);
        Some(if envelope.tool_uses().next().is_some() {
            envelope.with_stop_reason(TOOL_USE_HINT)
        } else {
            envelope
        })
    }

    /// Filter `blocks` and wrap what survives in a user-echo envelope.
    pub(crate) fn user(&self, blocks: Vec<ContentBlock>) -> Option<AgentResponse> {
        let blocks = self.filter(blocks);
        (!blocks.is_empty()).then(|| AgentResponse::user(blocks))
    }

    fn filter(&self, blocks: Vec<ContentBlock>) -> Vec<ContentBlock> {
        blocks
            .into_iter()
            .filter(|block| match block {
                ContentBlock::ToolUse { id, name, .. } => {
                    if !self.use_tools {
                        trace!(tool = %name, "dropping tool call: tools disabled for this turn");
                        false
                    } else if id.is_empty() {
                        tracing::warn!(tool = %name, "dropping tool call without an id");
                        false
                    } else {
                        true
                    }
                }
                _ => true,
            })
            .filter_map(|block| self.namespace.filter_block(block))
            .collect()
    }
}

/// Run `translator` over `events` until the stream ends, fails, or the
/// bridge is cancelled.
pub(crate) fn drive<S, T>(
    provider: ProviderId,
    events: S,
    mut translator: T,
    bridge: CancellationBridge,
) -> ResponseStream
where
    S: Stream<Item = Result<T::Event>> + Send + 'static,
    T: Translator,
{
    let mut events: BoxStream<'static, Result<T::Event>> = Box::pin(events);

    Box::pin(async_stream::try_stream! {
        'session: loop {
            let (envelopes, exhausted) = match bridge.pull(&mut events).await {
                Pulled::Item(event) => (translator.translate(event?)?, false),
                Pulled::Exhausted => (translator.finish()?, true),
                Pulled::Cancelled => {
                    debug!(%provider, "turn cancelled; closing provider session");
                    break 'session;
                }
            };

            for envelope in envelopes {
                if bridge.is_cancelled() {
                    debug!(%provider, "turn cancelled; discarding translated envelopes");
                    break 'session;
                }
                if envelope.is_terminal() {
                    debug!(
                        %provider,
                        stop_reason = envelope.stop_reason.as_deref().unwrap_or_default(),
                        output_tokens = envelope.token_usage.output_tokens,
                        "provider turn finished"
                    );
                }
                yield envelope;
            }

            if exhausted {
                break;
            }
        }
        drop(events);
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
