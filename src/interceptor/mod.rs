//! Interceptor capability interface and registration handles.
//!
//! An [`OutboundInterceptor`] has a single entry point, called once per
//! outbound packet with an [`InterceptorInput`] describing the packet before
//! the call and an [`InterceptorOutput`] through which it edits the packet,
//! requests a drop, or suspends the invocation.
//!
//! ```
//! use interceptor_chain::{
//!     interceptor::{InterceptorHandle, interceptor_fn},
//!     packet::PubrecPacket,
//! };
//!
//! let handle = InterceptorHandle::new(
//!     ("audit", "stamp"),
//!     interceptor_fn::<PubrecPacket, _>(|_input, output| {
//!         output.with_packet(|packet| packet.user_properties_mut().add("audited", "yes"))??;
//!         Ok(())
//!     }),
//! );
//! assert_eq!(handle.id().to_string(), "audit/stamp");
//! ```

mod invoker;
mod output;

use std::{fmt, sync::Arc, time::Duration};

pub(crate) use invoker::{Invocation, invoke};
pub use invoker::{CallbackFailure, InvocationOutcome, Verdict};
pub use output::{AsyncOutput, InterceptorInput, InterceptorOutput};

use crate::error::InterceptorError;

/// Callback invoked for every outbound packet of type `P` on a connection.
///
/// One instance may be shared by many connections and invoked concurrently
/// from different connections; implementations holding mutable state must
/// synchronise it themselves. Within one connection an instance is never
/// invoked concurrently with itself.
///
/// The body runs on the pipeline's executor thread and must not block.
/// Long-running work belongs in a task driven through
/// [`InterceptorOutput::async_output`].
pub trait OutboundInterceptor<P>: Send + Sync + 'static {
    /// Observe and optionally edit the packet.
    ///
    /// # Errors
    ///
    /// Any error fails this invocation: its edits are discarded and the
    /// chain continues with the next interceptor.
    fn intercept(
        &self,
        input: &InterceptorInput<P>,
        output: &mut InterceptorOutput<P>,
    ) -> Result<(), InterceptorError>;
}

impl<P, F> OutboundInterceptor<P> for F
where
    F: Fn(&InterceptorInput<P>, &mut InterceptorOutput<P>) -> Result<(), InterceptorError>
        + Send
        + Sync
        + 'static,
{
    fn intercept(
        &self,
        input: &InterceptorInput<P>,
        output: &mut InterceptorOutput<P>,
    ) -> Result<(), InterceptorError> {
        self(input, output)
    }
}

/// Build an interceptor from a closure.
///
/// Passing the closure through this function lets the compiler infer its
/// argument and return types from the interceptor signature.
pub fn interceptor_fn<P, F>(f: F) -> F
where
    F: Fn(&InterceptorInput<P>, &mut InterceptorOutput<P>) -> Result<(), InterceptorError>
        + Send
        + Sync
        + 'static,
{
    f
}

/// Identity of a registered interceptor: the owning extension plus a name
/// unique within it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InterceptorId {
    extension: Arc<str>,
    name: Arc<str>,
}

impl InterceptorId {
    /// Create an identifier.
    #[must_use]
    pub fn new(extension: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        Self {
            extension: extension.into(),
            name: name.into(),
        }
    }

    /// Extension that registered the interceptor.
    #[must_use]
    pub fn extension(&self) -> &str { &self.extension }

    /// Name of the interceptor within its extension.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }
}

impl<E: Into<Arc<str>>, N: Into<Arc<str>>> From<(E, N)> for InterceptorId {
    fn from((extension, name): (E, N)) -> Self { Self::new(extension, name) }
}

impl fmt::Display for InterceptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.extension, self.name)
    }
}

/// What happens when an asynchronous invocation outlives its timeout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeoutFallback {
    /// Treat the invocation as completed, keeping every edit applied before
    /// the deadline.
    Continue,
    /// Treat the invocation as timed out and discard its edits.
    #[default]
    Failure,
}

impl TimeoutFallback {
    /// Returns the fallback name as a static string for metrics and logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Failure => "failure",
        }
    }
}

/// Whether an interceptor may suspend its invocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InvocationMode {
    /// The invocation completes when the body returns.
    #[default]
    Synchronous,
    /// The body may call [`InterceptorOutput::async_output`] and resume
    /// later, bounded by `timeout`.
    Asynchronous {
        /// Maximum wall-clock wait, counted from the body's call to
        /// `async_output`.
        timeout: Duration,
        /// Resolution applied when `timeout` elapses first.
        fallback: TimeoutFallback,
    },
}

/// A registered interceptor instance with its invocation policy.
///
/// Handles are cheap to clone; clones share the interceptor instance.
pub struct InterceptorHandle<P> {
    id: InterceptorId,
    interceptor: Arc<dyn OutboundInterceptor<P>>,
    mode: InvocationMode,
}

impl<P> InterceptorHandle<P> {
    /// Register a synchronous-only interceptor.
    pub fn new<I>(id: impl Into<InterceptorId>, interceptor: I) -> Self
    where
        I: OutboundInterceptor<P>,
    {
        Self::from_arc(id, Arc::new(interceptor))
    }

    /// Register an interceptor instance that is shared with other handles,
    /// typically the same instance on many connections.
    pub fn from_arc(
        id: impl Into<InterceptorId>,
        interceptor: Arc<dyn OutboundInterceptor<P>>,
    ) -> Self {
        Self {
            id: id.into(),
            interceptor,
            mode: InvocationMode::Synchronous,
        }
    }

    /// Allow the interceptor to suspend its invocation for up to `timeout`.
    #[must_use]
    pub fn asynchronous(mut self, timeout: Duration, fallback: TimeoutFallback) -> Self {
        self.mode = InvocationMode::Asynchronous { timeout, fallback };
        self
    }

    /// Identity of the interceptor.
    #[must_use]
    pub fn id(&self) -> &InterceptorId { &self.id }

    /// Invocation policy.
    #[must_use]
    pub fn mode(&self) -> InvocationMode { self.mode }

    pub(crate) fn interceptor(&self) -> &dyn OutboundInterceptor<P> { &*self.interceptor }
}

impl<P> Clone for InterceptorHandle<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            interceptor: Arc::clone(&self.interceptor),
            mode: self.mode,
        }
    }
}

impl<P> fmt::Debug for InterceptorHandle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorHandle")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
