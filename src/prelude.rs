//! Optional convenience imports for extension authors.
//!
//! This module is intentionally small and focused on the types an
//! interceptor implementation touches. Prefer importing specialised APIs
//! directly from their owning modules.
//!
//! # Examples
//!
//! ```rust
//! use interceptor_chain::prelude::*;
//!
//! struct Stamp;
//!
//! impl OutboundInterceptor<PubrecPacket> for Stamp {
//!     fn intercept(
//!         &self,
//!         _input: &InterceptorInput<PubrecPacket>,
//!         output: &mut InterceptorOutput<PubrecPacket>,
//!     ) -> Result<(), InterceptorError> {
//!         output.with_packet(|p| p.user_properties_mut().add("stamped", "1"))??;
//!         Ok(())
//!     }
//! }
//! ```

pub use crate::{
    error::{InterceptorError, PacketError},
    interceptor::{
        AsyncOutput,
        InterceptorHandle,
        InterceptorInput,
        InterceptorOutput,
        OutboundInterceptor,
        TimeoutFallback,
        interceptor_fn,
    },
    packet::{PubrecPacket, PubrecReasonCode},
    session::ConnectionId,
};
