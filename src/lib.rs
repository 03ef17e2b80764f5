#![doc(html_root_url = "https://docs.rs/interceptor_chain/latest")]
//! Public API for the `interceptor_chain` library.
//!
//! This crate runs chains of extension-supplied interceptors over outbound
//! protocol packets. Each connection's packets are intercepted one at a time
//! in arrival order, different connections run concurrently, and a failing
//! or timed-out interceptor is rolled back as if it were absent.

pub mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod interceptor;
pub mod metrics;
pub mod ordering;
pub mod packet;
pub mod panic;
pub mod pipeline;
pub mod prelude;
pub mod registry;
pub mod session;

pub use chain::{Chain, ChainExecutor, ChainState, ChainVerdict};
pub use config::PipelineConfig;
pub use context::PacketMutationContext;
pub use error::{InterceptorError, PacketError, PipelineError, RegistryError};
pub use events::{ChannelSink, FailureEvent, FailureKind, FailureSink, TracingSink};
pub use interceptor::{
    AsyncOutput,
    InterceptorHandle,
    InterceptorId,
    InterceptorInput,
    InterceptorOutput,
    InvocationMode,
    OutboundInterceptor,
    TimeoutFallback,
};
pub use pipeline::{Disposition, PipelineCoordinator};
pub use registry::{ExtensionRegistry, InterceptorRegistry};
pub use session::ConnectionId;
