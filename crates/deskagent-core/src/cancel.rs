//! Cancellation bridge.
//!
//! The orchestrator hands every turn a single [`CancellationToken`].  The
//! bridge derives a child token for the provider session and fans the
//! signal out two ways: the translation loop stops pulling native events,
//! and the session (HTTP body or child process) tears itself down through
//! [`CancellationBridge::session_token`].
//!
//! Dropping the bridge cancels the session token as well, so a caller that
//! simply stops polling a response stream still releases the session.

use std::future::Future;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// Outcome of pulling one item through the bridge.
#[derive(Debug, PartialEq, Eq)]
pub enum Pulled<T> {
    /// The source produced an item before cancellation was observed.
    Item(T),
    /// The source ended on its own.
    Exhausted,
    /// Cancellation was signaled; the item (if any) was not consumed.
    Cancelled,
}

/// Couples a caller's cancellation signal to one provider session.
#[derive(Debug)]
pub struct CancellationBridge {
    session: CancellationToken,
}

impl CancellationBridge {
    /// Derive a bridge from the caller's signal.  Cancelling the signal
    /// cancels the bridge; cancelling or dropping the bridge never touches
    /// the caller's signal.
    pub fn new(signal: &CancellationToken) -> Self {
        Self {
            session: signal.child_token(),
        }
    }

    /// A bridge that is only cancelled when dropped.
    pub fn detached() -> Self {
        Self {
            session: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.session.is_cancelled()
    }

    /// Token handed to the provider session's own teardown mechanism.
    pub fn session_token(&self) -> CancellationToken {
        self.session.clone()
    }

    /// Resolves once cancellation is signaled.
    pub async fn cancelled(&self) {
        self.session.cancelled().await;
    }

    /// Pull the next item from `source`, preferring cancellation when both
    /// are ready so nothing produced after the signal is handed out.
    pub async fn pull<S>(&self, source: &mut S) -> Pulled<S::Item>
    where
        S: Stream + Unpin,
    {
        if self.is_cancelled() {
            return Pulled::Cancelled;
        }
        tokio::select! {
            biased;
            _ = self.session.cancelled() => Pulled::Cancelled,
            item = source.next() => match item {
                Some(item) => Pulled::Item(item),
                None => Pulled::Exhausted,
            },
        }
    }

    /// Run `fut` unless cancellation is signaled first.
    pub async fn guard<F>(&self, fut: F) -> Option<F::Output>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.session.cancelled() => None,
            output = fut => Some(output),
        }
    }
}

impl Drop for CancellationBridge {
    fn drop(&mut self) {
        self.session.cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
