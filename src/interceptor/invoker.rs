//! Runs one interceptor against one packet view and resolves the invocation
//! to exactly one [`InvocationOutcome`].

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    InterceptorHandle,
    InterceptorInput,
    InterceptorOutput,
    InvocationMode,
    TimeoutFallback,
    output::{Phase, Settled, Slot},
};
use crate::{
    error::{InterceptorError, PipelineError},
    events::FailureSink,
    packet::OutboundPacket,
    panic::panic_cause,
    session::ConnectionId,
};

/// Whether a completed invocation lets the packet continue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Verdict {
    /// Hand the packet to the next interceptor, or to the transport.
    #[default]
    Forward,
    /// Stop the chain and do not send the packet.
    Drop,
}

/// Why an invocation failed.
#[derive(Debug)]
pub enum CallbackFailure {
    /// The body returned an error.
    Error(InterceptorError),
    /// The body panicked.
    Panicked(String),
}

impl fmt::Display for CallbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(error) => write!(f, "{error}"),
            Self::Panicked(cause) => write!(f, "panicked: {cause}"),
        }
    }
}

/// Resolution of a single invocation.
#[derive(Debug)]
pub enum InvocationOutcome<P> {
    /// The interceptor finished; `packet` carries its edits.
    Completed {
        /// Packet including this invocation's edits.
        packet: P,
        /// Whether the packet continues.
        verdict: Verdict,
    },
    /// The body returned an error or panicked.
    Failed(CallbackFailure),
    /// The asynchronous timeout elapsed with [`TimeoutFallback::Failure`].
    TimedOut(Duration),
}

impl<P> InvocationOutcome<P> {
    /// Returns the outcome name as a static string for metrics and logging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Failed(_) => "failed",
            Self::TimedOut(_) => "timed_out",
        }
    }
}

/// Per-run settings shared by every invocation in a chain.
pub(crate) struct Invocation<'a> {
    pub(crate) connection: ConnectionId,
    pub(crate) sink: &'a Arc<dyn FailureSink>,
    pub(crate) max_async_timeout: Duration,
    pub(crate) cancel: &'a CancellationToken,
}

impl Invocation<'_> {
    fn effective_mode<P>(&self, handle: &InterceptorHandle<P>) -> InvocationMode {
        match handle.mode {
            InvocationMode::Asynchronous { timeout, fallback } if timeout > self.max_async_timeout => {
                warn!(
                    connection_id = %self.connection,
                    interceptor = %handle.id,
                    requested = ?timeout,
                    max = ?self.max_async_timeout,
                    "async timeout clamped"
                );
                InvocationMode::Asynchronous {
                    timeout: self.max_async_timeout,
                    fallback,
                }
            }
            mode => mode,
        }
    }
}

/// Invoke `handle` with `view`, a private copy of the packet.
///
/// `before` is the packet as it stood before this invocation and is exposed
/// to the body through [`InterceptorInput`].
///
/// # Errors
///
/// Returns [`PipelineError::ConnectionClosed`] if `invocation.cancel` fires
/// while the invocation is suspended; the view is discarded.
pub(crate) async fn invoke<P: OutboundPacket>(
    handle: &InterceptorHandle<P>,
    view: P,
    before: Arc<P>,
    invocation: &Invocation<'_>,
) -> Result<InvocationOutcome<P>, PipelineError> {
    let mode = invocation.effective_mode(handle);
    let slot = Arc::new(Slot::new(
        view,
        invocation.connection,
        handle.id.clone(),
        Arc::clone(invocation.sink),
    ));
    let input = InterceptorInput::new(invocation.connection, before);
    let mut output = InterceptorOutput::new(Arc::clone(&slot), handle.id.clone(), mode);

    let body = catch_unwind(AssertUnwindSafe(|| {
        handle.interceptor().intercept(&input, &mut output)
    }));
    drop(output);

    let failure = match body {
        Ok(Ok(())) => None,
        Ok(Err(error)) => Some(CallbackFailure::Error(error)),
        Err(payload) => Some(CallbackFailure::Panicked(panic_cause(&*payload))),
    };
    if let Some(failure) = failure {
        let _ = slot.settle();
        return Ok(InvocationOutcome::Failed(failure));
    }

    let InvocationMode::Asynchronous { timeout, fallback } = mode else {
        return Ok(completed(&slot));
    };
    if slot.phase() == Phase::Synchronous {
        return Ok(completed(&slot));
    }
    let deadline = slot
        .deadline()
        .unwrap_or_else(|| tokio::time::Instant::now() + timeout);

    tokio::select! {
        biased;
        () = invocation.cancel.cancelled() => {
            let _ = slot.settle();
            debug!(
                connection_id = %invocation.connection,
                interceptor = %handle.id,
                "suspended invocation abandoned: connection closed"
            );
            Err(PipelineError::ConnectionClosed(invocation.connection))
        }
        () = slot.wait_resumed() => Ok(completed(&slot)),
        () = tokio::time::sleep_until(deadline) => Ok(timed_out(&slot, timeout, fallback)),
    }
}

fn completed<P>(slot: &Slot<P>) -> InvocationOutcome<P> {
    match slot.settle() {
        Some(settled) => accept(settled),
        None => InvocationOutcome::Failed(CallbackFailure::Error(
            InterceptorError::AlreadyResolved,
        )),
    }
}

fn timed_out<P>(slot: &Slot<P>, timeout: Duration, fallback: TimeoutFallback) -> InvocationOutcome<P> {
    match slot.settle() {
        // `resume` may have landed between the timer firing and settling.
        Some(settled) if settled.previous == Phase::Resumed => accept(settled),
        Some(settled) if fallback == TimeoutFallback::Continue => accept(settled),
        _ => InvocationOutcome::TimedOut(timeout),
    }
}

fn accept<P>(settled: Settled<P>) -> InvocationOutcome<P> {
    InvocationOutcome::Completed {
        packet: settled.packet,
        verdict: if settled.drop_requested {
            Verdict::Drop
        } else {
            Verdict::Forward
        },
    }
}
