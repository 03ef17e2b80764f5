//! Error taxonomy for the interception pipeline.
//!
//! - [`PacketError`]: an interceptor attempted an edit the packet rules forbid.
//! - [`InterceptorError`]: returned by interceptor bodies and by the output API they drive.
//! - [`RegistryError`]: the registry could not produce a chain.
//! - [`PipelineError`]: the run for a packet was aborted as a whole.
//!
//! Failures of individual interceptors never surface as a [`PipelineError`];
//! they are recovered inside the chain and reported as
//! [`FailureEvent`](crate::events::FailureEvent)s.

use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    interceptor::InterceptorId,
    packet::{PacketKind, PubrecReasonCode},
    session::ConnectionId,
};

/// Boxed error produced by interceptor implementations.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Edits rejected by packet setters.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// The reason code would switch between acknowledgment and rejection.
    #[error("reason code must not switch from {from:?} to {to:?}")]
    ReasonCodeClassSwitch {
        /// Code currently set.
        from: PubrecReasonCode,
        /// Code that was requested.
        to: PubrecReasonCode,
    },
    /// A string field would not be a valid MQTT UTF-8 string.
    #[error("invalid {field}: {reason}")]
    InvalidString {
        /// Field being set.
        field: &'static str,
        /// Rule that was violated.
        reason: &'static str,
    },
    /// A byte does not name a PUBREC reason code.
    #[error("unknown PUBREC reason code {0:#04x}")]
    UnknownReasonCode(u8),
}

/// Errors raised inside an interceptor invocation.
///
/// Returning any of these from
/// [`OutboundInterceptor::intercept`](crate::interceptor::OutboundInterceptor::intercept)
/// fails the invocation and rolls back its edits.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum InterceptorError {
    /// The handle is registered as synchronous-only.
    #[error("interceptor {0} is not permitted to complete asynchronously")]
    AsyncNotPermitted(InterceptorId),
    /// [`InterceptorOutput::async_output`](crate::interceptor::InterceptorOutput::async_output)
    /// was called twice in one invocation.
    #[error("output is already asynchronous")]
    AlreadyAsync,
    /// The invocation has been resolved (completed, failed or timed out) and
    /// no longer accepts edits or signals.
    #[error("invocation already resolved")]
    AlreadyResolved,
    /// An edit was rejected by the packet.
    #[error(transparent)]
    Packet(#[from] PacketError),
    /// Implementation-defined failure.
    #[error(transparent)]
    Other(BoxError),
}

impl InterceptorError {
    /// Wrap an arbitrary error raised by an interceptor body.
    ///
    /// ```
    /// use interceptor_chain::error::InterceptorError;
    ///
    /// let err = InterceptorError::other("backend unavailable");
    /// assert_eq!(err.to_string(), "backend unavailable");
    /// ```
    pub fn other(error: impl Into<BoxError>) -> Self { Self::Other(error.into()) }
}

/// Errors returned by an [`InterceptorRegistry`](crate::registry::InterceptorRegistry).
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No chain is known for the connection.
    #[error("no interceptor chain registered for {0}")]
    UnknownConnection(ConnectionId),
    /// The registry does not hold chains for this packet kind.
    #[error("no interceptor chains for {0} packets")]
    UnsupportedKind(PacketKind),
    /// The interceptor is already part of the connection's chain.
    #[error("interceptor {interceptor} already registered for {connection}")]
    DuplicateInterceptor {
        /// Connection the registration targeted.
        connection: ConnectionId,
        /// Interceptor that was registered twice.
        interceptor: InterceptorId,
    },
    /// The interceptor is already registered for every connection.
    #[error("interceptor {0} already registered for all connections")]
    DuplicateDefault(InterceptorId),
    /// The backing store could not be read.
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Errors aborting the pipeline run for one packet.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// The connection closed while the packet was queued or being
    /// intercepted. Nothing may be sent.
    #[error("{0} closed before interception finished")]
    ConnectionClosed(ConnectionId),
    /// The chain could not be resolved and fail-open is disabled.
    #[error("interceptor chain resolution failed for {connection}: {source}")]
    ChainResolution {
        /// Connection the packet belongs to.
        connection: ConnectionId,
        /// Underlying registry failure.
        source: RegistryError,
    },
}
