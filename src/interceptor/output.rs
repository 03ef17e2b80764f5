//! Input and output parameters handed to an interceptor body.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{sync::Notify, time::Instant};
use tracing::warn;

use super::{InterceptorId, InvocationMode, TimeoutFallback};
use crate::{
    error::InterceptorError,
    events::{FailureEvent, FailureKind, FailureSink},
    session::ConnectionId,
};

/// Read-only description of the packet as it stood before this invocation.
#[derive(Debug)]
pub struct InterceptorInput<P> {
    connection: ConnectionId,
    packet: Arc<P>,
}

impl<P> InterceptorInput<P> {
    pub(crate) fn new(connection: ConnectionId, packet: Arc<P>) -> Self {
        Self { connection, packet }
    }

    /// Connection the packet will be sent on.
    #[must_use]
    pub fn connection(&self) -> ConnectionId { self.connection }

    /// Packet before this interceptor's edits.
    #[must_use]
    pub fn packet(&self) -> &P { &self.packet }

    /// Shared handle to the pre-invocation packet, for use after the body
    /// returns.
    #[must_use]
    pub fn snapshot(&self) -> Arc<P> { Arc::clone(&self.packet) }
}

/// Lifecycle of one invocation's output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    /// The body is running and has not suspended.
    Synchronous,
    /// The body suspended and the invocation waits for `resume`.
    Suspended,
    /// `resume` was called; the invoker has not collected the result yet.
    Resumed,
    /// The invoker collected the result. Nothing further is accepted.
    Settled,
}

impl Phase {
    fn accepts_edits(self) -> bool { matches!(self, Self::Synchronous | Self::Suspended) }
}

struct SlotState<P> {
    packet: Option<P>,
    drop_requested: bool,
    phase: Phase,
    deadline: Option<Instant>,
}

/// Result collected from a slot once it settles.
pub(crate) struct Settled<P> {
    pub(crate) packet: P,
    pub(crate) drop_requested: bool,
    /// Phase observed immediately before settling.
    pub(crate) previous: Phase,
}

/// State shared between the invoker, the body's output and any
/// [`AsyncOutput`] clones.
pub(crate) struct Slot<P> {
    state: Mutex<SlotState<P>>,
    resumed: Notify,
    connection: ConnectionId,
    interceptor: InterceptorId,
    sink: Arc<dyn FailureSink>,
}

impl<P> Slot<P> {
    pub(crate) fn new(
        packet: P,
        connection: ConnectionId,
        interceptor: InterceptorId,
        sink: Arc<dyn FailureSink>,
    ) -> Self {
        Self {
            state: Mutex::new(SlotState {
                packet: Some(packet),
                drop_requested: false,
                phase: Phase::Synchronous,
                deadline: None,
            }),
            resumed: Notify::new(),
            connection,
            interceptor,
            sink,
        }
    }

    // Edits land through a draft swapped in after the closure returns, so a
    // poisoned lock still holds the last complete packet.
    fn lock(&self) -> MutexGuard<'_, SlotState<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn phase(&self) -> Phase { self.lock().phase }

    /// Instant the suspended invocation times out, fixed when the body
    /// called `async_output`.
    pub(crate) fn deadline(&self) -> Option<Instant> { self.lock().deadline }

    pub(crate) async fn wait_resumed(&self) { self.resumed.notified().await; }

    /// Resolve the slot and hand its packet to the invoker.
    ///
    /// Returns `None` if the slot was already settled.
    pub(crate) fn settle(&self) -> Option<Settled<P>> {
        let mut state = self.lock();
        let previous = state.phase;
        state.phase = Phase::Settled;
        let packet = state.packet.take()?;
        Some(Settled {
            packet,
            drop_requested: state.drop_requested,
            previous,
        })
    }

    fn with_packet<R>(&self, f: impl FnOnce(&mut P) -> R) -> Result<R, InterceptorError>
    where
        P: Clone,
    {
        let mut state = self.lock();
        if !state.phase.accepts_edits() {
            return Err(InterceptorError::AlreadyResolved);
        }
        let packet = state
            .packet
            .as_mut()
            .ok_or(InterceptorError::AlreadyResolved)?;
        let mut draft = packet.clone();
        let result = f(&mut draft);
        *packet = draft;
        Ok(result)
    }

    fn clone_packet(&self) -> Result<P, InterceptorError>
    where
        P: Clone,
    {
        self.lock()
            .packet
            .clone()
            .ok_or(InterceptorError::AlreadyResolved)
    }

    fn request_drop(&self) -> Result<(), InterceptorError> {
        let mut state = self.lock();
        if !state.phase.accepts_edits() {
            return Err(InterceptorError::AlreadyResolved);
        }
        state.drop_requested = true;
        Ok(())
    }

    fn suspend(&self, timeout: Duration) -> Result<(), InterceptorError> {
        let mut state = self.lock();
        match state.phase {
            Phase::Synchronous => {
                state.phase = Phase::Suspended;
                state.deadline = Some(Instant::now() + timeout);
                Ok(())
            }
            Phase::Suspended | Phase::Resumed => Err(InterceptorError::AlreadyAsync),
            Phase::Settled => Err(InterceptorError::AlreadyResolved),
        }
    }

    fn resume(&self) -> Result<(), InterceptorError> {
        let previous = {
            let mut state = self.lock();
            let previous = state.phase;
            if previous == Phase::Suspended {
                state.phase = Phase::Resumed;
            }
            previous
        };
        if previous == Phase::Suspended {
            self.resumed.notify_one();
            return Ok(());
        }
        self.report_duplicate(previous);
        Err(InterceptorError::AlreadyResolved)
    }

    fn report_duplicate(&self, phase: Phase) {
        warn!(
            connection_id = %self.connection,
            interceptor = %self.interceptor,
            ?phase,
            "interceptor signalled completion after its invocation was resolved"
        );
        crate::metrics::inc_duplicate_resolutions();
        self.sink.record(FailureEvent {
            connection: self.connection,
            interceptor: Some(self.interceptor.clone()),
            kind: FailureKind::DuplicateResolution,
            cause: Some(format!("resume in phase {phase:?}")),
            timeout: None,
        });
    }
}

/// Mutable side of an invocation, valid while the body runs.
///
/// Edits made through [`with_packet`](Self::with_packet) apply to this
/// invocation's private copy of the packet and become visible to the rest of
/// the chain only if the invocation completes.
pub struct InterceptorOutput<P> {
    slot: Arc<Slot<P>>,
    interceptor: InterceptorId,
    mode: InvocationMode,
}

impl<P> InterceptorOutput<P> {
    pub(crate) fn new(slot: Arc<Slot<P>>, interceptor: InterceptorId, mode: InvocationMode) -> Self {
        Self {
            slot,
            interceptor,
            mode,
        }
    }

    /// Edit the packet.
    ///
    /// The closure edits a copy that replaces the packet only once the
    /// closure returns; a panic inside it leaves the packet as it was. The
    /// closure runs while the invocation's output is locked and must not call
    /// back into this output or any [`AsyncOutput`] clone.
    ///
    /// # Errors
    ///
    /// Returns [`InterceptorError::AlreadyResolved`] once the invocation has
    /// been resolved.
    pub fn with_packet<R>(&mut self, f: impl FnOnce(&mut P) -> R) -> Result<R, InterceptorError>
    where
        P: Clone,
    {
        self.slot.with_packet(f)
    }

    /// Copy of the packet including this invocation's edits so far.
    ///
    /// # Errors
    ///
    /// Returns [`InterceptorError::AlreadyResolved`] once the invocation has
    /// been resolved.
    pub fn packet(&self) -> Result<P, InterceptorError>
    where
        P: Clone,
    {
        self.slot.clone_packet()
    }

    /// Ask for the packet to be dropped instead of sent. Takes effect only
    /// if the invocation completes; later interceptors are not invoked.
    ///
    /// # Errors
    ///
    /// Returns [`InterceptorError::AlreadyResolved`] once the invocation has
    /// been resolved.
    pub fn drop_packet(&mut self) -> Result<(), InterceptorError> { self.slot.request_drop() }

    /// Suspend the invocation until [`AsyncOutput::resume`] is called or the
    /// handle's timeout elapses. The timeout runs from this call.
    ///
    /// # Errors
    ///
    /// - [`InterceptorError::AsyncNotPermitted`] if the handle is synchronous-only.
    /// - [`InterceptorError::AlreadyAsync`] if called twice.
    pub fn async_output(&mut self) -> Result<AsyncOutput<P>, InterceptorError> {
        let InvocationMode::Asynchronous { timeout, fallback } = self.mode else {
            return Err(InterceptorError::AsyncNotPermitted(self.interceptor.clone()));
        };
        self.slot.suspend(timeout)?;
        Ok(AsyncOutput {
            slot: Arc::clone(&self.slot),
            timeout,
            fallback,
        })
    }
}

/// Handle to a suspended invocation.
///
/// May be moved into another task. Exactly one resolution is accepted: the
/// first of [`resume`](Self::resume) or the timeout wins; anything after that
/// is rejected.
pub struct AsyncOutput<P> {
    slot: Arc<Slot<P>>,
    timeout: Duration,
    fallback: TimeoutFallback,
}

impl<P> Clone for AsyncOutput<P> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            timeout: self.timeout,
            fallback: self.fallback,
        }
    }
}

impl<P> AsyncOutput<P> {
    /// Edit the packet. A panic inside `f` discards that edit.
    ///
    /// # Errors
    ///
    /// Returns [`InterceptorError::AlreadyResolved`] after `resume` or the
    /// timeout.
    pub fn with_packet<R>(&self, f: impl FnOnce(&mut P) -> R) -> Result<R, InterceptorError>
    where
        P: Clone,
    {
        self.slot.with_packet(f)
    }

    /// Ask for the packet to be dropped.
    ///
    /// # Errors
    ///
    /// Returns [`InterceptorError::AlreadyResolved`] after `resume` or the
    /// timeout.
    pub fn drop_packet(&self) -> Result<(), InterceptorError> { self.slot.request_drop() }

    /// Signal completion.
    ///
    /// # Errors
    ///
    /// Returns [`InterceptorError::AlreadyResolved`] if the invocation was
    /// already resolved. The late signal is reported as a
    /// [`FailureKind::DuplicateResolution`] and otherwise ignored.
    pub fn resume(&self) -> Result<(), InterceptorError> { self.slot.resume() }

    /// Timeout configured for this invocation.
    #[must_use]
    pub fn timeout(&self) -> Duration { self.timeout }

    /// Fallback applied if the timeout elapses.
    #[must_use]
    pub fn fallback(&self) -> TimeoutFallback { self.fallback }
}
