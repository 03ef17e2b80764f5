//! State machine driving one chain run for one packet.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::Chain;
use crate::{
    config::PipelineConfig,
    context::PacketMutationContext,
    error::PipelineError,
    events::{FailureEvent, FailureKind, FailureSink, TracingSink},
    interceptor::{InterceptorHandle, InterceptorId, Invocation, InvocationOutcome, Verdict, invoke},
    packet::OutboundPacket,
    session::ConnectionId,
};

/// States of a chain run.
///
/// `Sent` and `Dropped` are terminal. A failed or timed-out invocation passes
/// through `RollingBack` before `Advancing`, so the next interceptor sees the
/// packet exactly as it was before the failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainState {
    /// Not started.
    Pending,
    /// Running the interceptor at this index.
    Invoking(usize),
    /// Discarding the edits of the interceptor at this index.
    RollingBack(usize),
    /// Moving past the interceptor at this index.
    Advancing(usize),
    /// An interceptor requested the packet be dropped.
    Dropped,
    /// The chain finished; the packet goes to the transport.
    Sent,
}

/// Terminal result of a chain run.
#[derive(Debug, PartialEq, Eq)]
pub enum ChainVerdict<P> {
    /// Send `packet`; `modified` is false when it equals the input packet.
    Sent {
        /// Packet to send.
        packet: P,
        /// Whether any committed edit changed the packet.
        modified: bool,
    },
    /// Do not send the packet.
    Dropped {
        /// Interceptor that requested the drop.
        by: InterceptorId,
    },
}

/// Runs a [`Chain`] against one packet.
///
/// Interceptors run strictly in chain order, one at a time. A failing or
/// timed-out interceptor is reported to the [`FailureSink`] and behaves as if
/// it were absent for this packet.
///
/// # Examples
///
/// ```
/// use interceptor_chain::{
///     chain::{Chain, ChainExecutor, ChainVerdict},
///     context::PacketMutationContext,
///     packet::{PubrecPacket, PubrecReasonCode},
///     session::ConnectionId,
/// };
///
/// # tokio_test_block_on(async {
/// let packet = PubrecPacket::new(1, PubrecReasonCode::Success);
/// let executor = ChainExecutor::new(ConnectionId::new(7), Chain::empty());
/// let verdict = executor
///     .run(PacketMutationContext::new(packet.clone()))
///     .await
///     .expect("not cancelled");
/// assert_eq!(verdict, ChainVerdict::Sent { packet, modified: false });
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread()
/// #         .enable_time()
/// #         .build()
/// #         .expect("runtime")
/// #         .block_on(f)
/// # }
/// ```
pub struct ChainExecutor<P> {
    connection: ConnectionId,
    chain: Chain<P>,
    sink: Arc<dyn FailureSink>,
    max_async_timeout: Duration,
    cancel: CancellationToken,
}

impl<P: OutboundPacket> ChainExecutor<P> {
    /// Create an executor reporting failures through [`TracingSink`].
    #[must_use]
    pub fn new(connection: ConnectionId, chain: Chain<P>) -> Self {
        Self {
            connection,
            chain,
            sink: Arc::new(TracingSink),
            max_async_timeout: PipelineConfig::default().max_async_timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Report failures to `sink`.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Upper bound applied to every asynchronous timeout.
    #[must_use]
    pub fn max_async_timeout(mut self, limit: Duration) -> Self {
        self.max_async_timeout = limit;
        self
    }

    /// Abandon the run when `token` is cancelled.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Drive the chain to a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConnectionClosed`] if the cancellation token
    /// fires before the run terminates. The context is discarded.
    pub async fn run(
        &self,
        mut ctx: PacketMutationContext<P>,
    ) -> Result<ChainVerdict<P>, PipelineError> {
        let invocation = Invocation {
            connection: self.connection,
            sink: &self.sink,
            max_async_timeout: self.max_async_timeout,
            cancel: &self.cancel,
        };
        let mut dropped_by = None;
        let mut state = ChainState::Pending;
        loop {
            trace!(connection_id = %self.connection, ?state, "chain state");
            state = match state {
                ChainState::Pending if self.chain.is_empty() => ChainState::Sent,
                ChainState::Pending => ChainState::Invoking(0),
                ChainState::Invoking(index) => {
                    let Some(handle) = self.chain.get(index) else {
                        break;
                    };
                    if self.cancel.is_cancelled() {
                        return Err(PipelineError::ConnectionClosed(self.connection));
                    }
                    let before = ctx.snapshot();
                    let view = ctx.begin_invocation();
                    let outcome = invoke(handle, view, before, &invocation).await?;
                    crate::metrics::inc_invocations(outcome.as_str());
                    match outcome {
                        InvocationOutcome::Completed {
                            packet,
                            verdict: Verdict::Forward,
                        } => {
                            ctx.commit(packet);
                            ChainState::Advancing(index)
                        }
                        InvocationOutcome::Completed {
                            verdict: Verdict::Drop,
                            ..
                        } => {
                            dropped_by = Some(handle.id().clone());
                            ChainState::Dropped
                        }
                        InvocationOutcome::Failed(failure) => {
                            self.report(handle, FailureKind::CallbackError, Some(failure.to_string()), None);
                            ChainState::RollingBack(index)
                        }
                        InvocationOutcome::TimedOut(timeout) => {
                            self.report(handle, FailureKind::CallbackTimeout, None, Some(timeout));
                            ChainState::RollingBack(index)
                        }
                    }
                }
                ChainState::RollingBack(index) => {
                    ctx.rollback();
                    ChainState::Advancing(index)
                }
                ChainState::Advancing(index) if index + 1 < self.chain.len() => {
                    ChainState::Invoking(index + 1)
                }
                ChainState::Advancing(_) => ChainState::Sent,
                ChainState::Dropped => {
                    if let Some(by) = dropped_by {
                        return Ok(ChainVerdict::Dropped { by });
                    }
                    break;
                }
                ChainState::Sent => break,
            };
        }
        Ok(ChainVerdict::Sent {
            modified: ctx.is_modified(),
            packet: ctx.final_packet(),
        })
    }

    fn report(
        &self,
        handle: &InterceptorHandle<P>,
        kind: FailureKind,
        cause: Option<String>,
        timeout: Option<Duration>,
    ) {
        self.sink.record(FailureEvent {
            connection: self.connection,
            interceptor: Some(handle.id().clone()),
            kind,
            cause,
            timeout,
        });
    }
}
