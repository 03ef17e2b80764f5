//! Reusable interceptors, sinks and metric helpers for exercising an
//! [`interceptor_chain`] pipeline in tests.
//!
//! ```rust
//! use interceptor_chain::chain::Chain;
//! use interceptor_chain_testing::{failing, tagging};
//!
//! let chain = Chain::from(vec![tagging("a"), failing("b"), tagging("c")]);
//! assert_eq!(chain.len(), 3);
//! ```

pub mod interceptors;
pub mod recorder;
pub mod sink;

pub use interceptors::{
    InvocationLog,
    LogEntry,
    delayed,
    dropping,
    failing,
    packet,
    panicking,
    recording,
    stalling,
    tagging,
    tags,
};
pub use sink::CollectingSink;
