//! Structured failure events handed to the logging collaborator.
//!
//! Every invocation that does not complete, every late completion signal and
//! every registry failure produces a [`FailureEvent`]. Sinks are called
//! inline on the chain's task and must not block.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{config::PipelineConfig, interceptor::InterceptorId, session::ConnectionId};

/// Category of a [`FailureEvent`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The interceptor body returned an error or panicked.
    CallbackError,
    /// An asynchronous invocation exceeded its timeout with the failure
    /// fallback.
    CallbackTimeout,
    /// The interceptor signalled completion after its invocation was
    /// resolved. The signal was ignored.
    DuplicateResolution,
    /// The registry could not resolve the chain; the packet was sent
    /// unmodified.
    ChainResolution,
}

impl FailureKind {
    /// Returns the kind name as a static string for metrics and logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CallbackError => "callback_error",
            Self::CallbackTimeout => "callback_timeout",
            Self::DuplicateResolution => "duplicate_resolution",
            Self::ChainResolution => "chain_resolution",
        }
    }
}

/// A structured failure report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureEvent {
    /// Connection the packet belongs to.
    pub connection: ConnectionId,
    /// Interceptor involved; `None` for chain-level failures.
    pub interceptor: Option<InterceptorId>,
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable cause, when one is known.
    pub cause: Option<String>,
    /// Timeout that elapsed, for [`FailureKind::CallbackTimeout`].
    pub timeout: Option<Duration>,
}

/// Receiver of failure events.
pub trait FailureSink: Send + Sync {
    /// Record one event. Must return promptly.
    fn record(&self, event: FailureEvent);
}

/// Default sink emitting each event as a `tracing` warning.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl FailureSink for TracingSink {
    fn record(&self, event: FailureEvent) {
        let interceptor = event
            .interceptor
            .as_ref()
            .map_or_else(|| "-".to_owned(), ToString::to_string);
        warn!(
            connection_id = %event.connection,
            interceptor = %interceptor,
            kind = event.kind.as_str(),
            cause = event.cause.as_deref().unwrap_or("-"),
            timeout = ?event.timeout,
            "outbound interceptor failure"
        );
    }
}

/// Sink forwarding events over a bounded channel.
///
/// Events are offered with `try_send`; when the receiver lags and the
/// channel is full the event is discarded and counted.
///
/// ```
/// use interceptor_chain::{
///     events::{ChannelSink, FailureEvent, FailureKind, FailureSink},
///     session::ConnectionId,
/// };
///
/// let (sink, mut rx) = ChannelSink::new(1);
/// let event = FailureEvent {
///     connection: ConnectionId::new(1),
///     interceptor: None,
///     kind: FailureKind::ChainResolution,
///     cause: None,
///     timeout: None,
/// };
/// sink.record(event.clone());
/// sink.record(event.clone());
/// assert_eq!(rx.try_recv().ok(), Some(event));
/// assert_eq!(sink.dropped(), 1);
/// ```
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<FailureEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink and the receiver it feeds.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<FailureEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Create a sink sized by [`PipelineConfig::failure_channel_capacity`].
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> (Self, mpsc::Receiver<FailureEvent>) {
        Self::new(config.failure_channel_capacity.max(1))
    }

    /// Number of events discarded because the channel was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 { self.dropped.load(Ordering::Relaxed) }
}

impl FailureSink for ChannelSink {
    fn record(&self, event: FailureEvent) {
        if let Err(err) = self.tx.try_send(event) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(total, error = %err, "failure event discarded");
        }
    }
}

impl<S: FailureSink + ?Sized> FailureSink for std::sync::Arc<S> {
    fn record(&self, event: FailureEvent) { (**self).record(event); }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    fn event(kind: FailureKind) -> FailureEvent {
        FailureEvent {
            connection: ConnectionId::new(5),
            interceptor: Some(InterceptorId::new("ext", "slow")),
            kind,
            cause: None,
            timeout: Some(Duration::from_millis(250)),
        }
    }

    #[test]
    #[traced_test]
    fn tracing_sink_logs_structured_fields() {
        TracingSink.record(event(FailureKind::CallbackTimeout));
        assert!(logs_contain("outbound interceptor failure"));
        assert!(logs_contain("callback_timeout"));
        assert!(logs_contain("ext/slow"));
        assert!(logs_contain("conn-5"));
    }

    #[tokio::test]
    async fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.record(event(FailureKind::CallbackError));
        sink.record(event(FailureKind::CallbackTimeout));
        drop(sink);

        let mut kinds = Vec::new();
        while let Some(ev) = rx.recv().await {
            kinds.push(ev.kind);
        }
        assert_eq!(
            kinds,
            [FailureKind::CallbackError, FailureKind::CallbackTimeout]
        );
    }

    #[test]
    fn channel_sink_counts_events_after_receiver_closed() {
        let (sink, rx) = ChannelSink::new(4);
        drop(rx);
        sink.record(event(FailureKind::CallbackError));
        assert_eq!(sink.dropped(), 1);
    }
}
