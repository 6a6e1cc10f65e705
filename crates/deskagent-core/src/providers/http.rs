//! HTTP transport shared by the streaming API adapters.

use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::RequestBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AgentError, Result};
use crate::model::ProviderId;
use crate::providers::sse::{SseDecoder, SseFrame};

/// Connection establishment timeout.  Streaming bodies have no overall
/// timeout; long turns are ended by cancellation instead.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP client used by one adapter.
pub(crate) fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| AgentError::Config {
            reason: format!("failed to build HTTP client: {e}"),
        })
}

/// Join a base URL and a path without doubling or dropping the slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Send `request` and stream its body as SSE frames.
///
/// Non-success statuses become [`AgentError::LlmRequestFailed`] carrying the
/// response body.  When `session` is cancelled the request or body read is
/// abandoned and the stream ends without error; dropping the body closes
/// the connection.
pub(crate) fn sse_frames(
    request: RequestBuilder,
    provider: ProviderId,
    session: CancellationToken,
) -> BoxStream<'static, Result<SseFrame>> {
    Box::pin(async_stream::try_stream! {
        let sent = tokio::select! {
            biased;
            _ = session.cancelled() => None,
            sent = request.send() => Some(sent),
        };
        let Some(sent) = sent else {
            debug!(%provider, "request abandoned before response");
            return;
        };

        let response = sent.map_err(|e| AgentError::LlmRequestFailed {
            reason: format!("{provider} request failed: {e}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%provider, %status, "provider rejected request");
            Err::<(), AgentError>(AgentError::LlmRequestFailed {
                reason: format!("{provider} API returned {status}: {body}"),
            })?;
            return;
        }

        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = session.cancelled() => None,
                chunk = body.next() => Some(chunk),
            };
            let Some(chunk) = chunk else {
                debug!(%provider, "closing response body after cancellation");
                return;
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk.map_err(|e| AgentError::LlmStreamError {
                reason: format!("{provider} stream interrupted: {e}"),
            })?;
            for frame in decoder.push(&chunk)? {
                yield frame;
            }
        }

        if let Some(frame) = decoder.finish()? {
            yield frame;
        }
    })
}
