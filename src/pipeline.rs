//! Entry point used by the transport for every outbound packet.
//!
//! [`PipelineCoordinator::process`] queues the packet behind earlier packets
//! of the same connection, resolves the connection's chain from the registry
//! when its turn comes, and runs the chain against a fresh mutation context.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    chain::{ChainExecutor, ChainVerdict},
    config::PipelineConfig,
    context::PacketMutationContext,
    error::{PipelineError, RegistryError},
    events::{FailureEvent, FailureKind, FailureSink, TracingSink},
    interceptor::InterceptorId,
    ordering::ConnectionSerializer,
    packet::OutboundPacket,
    registry::InterceptorRegistry,
    session::ConnectionId,
};

/// What the transport should do with a packet.
#[derive(Debug, PartialEq, Eq)]
pub enum Disposition<P> {
    /// Send `packet`.
    Send {
        /// Packet to encode and send.
        packet: P,
        /// `false` when the packet equals the one passed to `process`, so
        /// the transport may reuse an existing encoding.
        modified: bool,
    },
    /// Do not send anything.
    Drop {
        /// Interceptor that requested the drop.
        by: InterceptorId,
    },
}

impl<P> Disposition<P> {
    /// Returns the disposition name as a static string for metrics and logging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Send { .. } => "sent",
            Self::Drop { .. } => "dropped",
        }
    }
}

/// Runs registered interceptors over outbound packets.
///
/// One coordinator serves every connection. Packets of one connection are
/// processed one at a time in arrival order; packets of different
/// connections run concurrently.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use interceptor_chain::{
///     interceptor::{InterceptorHandle, interceptor_fn},
///     packet::{PubrecPacket, PubrecReasonCode},
///     pipeline::{Disposition, PipelineCoordinator},
///     registry::ExtensionRegistry,
///     session::ConnectionId,
/// };
///
/// # tokio_test_block_on(async {
/// let registry = Arc::new(ExtensionRegistry::<PubrecPacket>::new());
/// let conn = ConnectionId::new(1);
/// registry.open_connection(conn);
/// registry
///     .add(
///         conn,
///         InterceptorHandle::new(
///             ("audit", "stamp"),
///             interceptor_fn::<PubrecPacket, _>(|_, output| {
///                 output.with_packet(|p| p.user_properties_mut().add("audited", "yes"))??;
///                 Ok(())
///             }),
///         ),
///     )
///     .expect("first registration");
///
/// let pipeline = PipelineCoordinator::new(registry);
/// let disposition = pipeline
///     .process(conn, PubrecPacket::new(7, PubrecReasonCode::Success))
///     .await
///     .expect("connection open");
/// let Disposition::Send { packet, modified } = disposition else {
///     panic!("packet dropped");
/// };
/// assert!(modified);
/// assert_eq!(packet.user_properties().get("audited").next(), Some("yes"));
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread()
/// #         .enable_time()
/// #         .build()
/// #         .expect("runtime")
/// #         .block_on(f)
/// # }
/// ```
pub struct PipelineCoordinator<P> {
    registry: Arc<dyn InterceptorRegistry<P>>,
    serializer: ConnectionSerializer,
    sink: Arc<dyn FailureSink>,
    config: PipelineConfig,
}

impl<P: OutboundPacket> PipelineCoordinator<P> {
    /// Create a coordinator resolving chains from `registry` and reporting
    /// failures through [`TracingSink`].
    #[must_use]
    pub fn new<R: InterceptorRegistry<P> + 'static>(registry: Arc<R>) -> Self {
        Self {
            registry,
            serializer: ConnectionSerializer::new(),
            sink: Arc::new(TracingSink),
            config: PipelineConfig::default(),
        }
    }

    /// Report failures to `sink` instead of the default [`TracingSink`].
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig { &self.config }

    /// Run the connection's interceptors over `packet`.
    ///
    /// The chain is resolved when the packet reaches the head of its
    /// connection's queue, so interceptors registered while earlier packets
    /// were in flight apply to this one.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::ConnectionClosed`] if
    ///   [`close_connection`](Self::close_connection) is called while the
    ///   packet is queued or being intercepted. Nothing may be sent.
    /// - [`PipelineError::ChainResolution`] if the registry fails and
    ///   [`PipelineConfig::fail_open_on_resolution_error`] is `false`.
    pub async fn process(&self, connection: ConnectionId, packet: P) -> Result<Disposition<P>, PipelineError> {
        let disposition = self
            .serializer
            .run(connection, |closed| async move {
                let chain = match self.registry.chain_for(connection, P::KIND) {
                    Ok(chain) => chain,
                    Err(source) => return self.resolution_failed(connection, packet, source),
                };
                let verdict = ChainExecutor::new(connection, chain)
                    .sink(Arc::clone(&self.sink))
                    .max_async_timeout(self.config.max_async_timeout)
                    .cancellation(closed)
                    .run(PacketMutationContext::new(packet))
                    .await?;
                Ok(match verdict {
                    ChainVerdict::Sent { packet, modified } => Disposition::Send { packet, modified },
                    ChainVerdict::Dropped { by } => {
                        debug!(connection_id = %connection, interceptor = %by, "packet dropped by interceptor");
                        Disposition::Drop { by }
                    }
                })
            })
            .await?;
        crate::metrics::inc_packets(disposition.as_str());
        Ok(disposition)
    }

    fn resolution_failed(
        &self,
        connection: ConnectionId,
        packet: P,
        source: RegistryError,
    ) -> Result<Disposition<P>, PipelineError> {
        warn!(
            connection_id = %connection,
            kind = %P::KIND,
            cause = %source,
            fail_open = self.config.fail_open_on_resolution_error,
            "interceptor chain resolution failed"
        );
        crate::metrics::inc_resolution_errors();
        self.sink.record(FailureEvent {
            connection,
            interceptor: None,
            kind: FailureKind::ChainResolution,
            cause: Some(source.to_string()),
            timeout: None,
        });
        if self.config.fail_open_on_resolution_error {
            Ok(Disposition::Send {
                packet,
                modified: false,
            })
        } else {
            Err(PipelineError::ChainResolution { connection, source })
        }
    }

    /// Cancel the in-flight and queued packets of `connection`.
    ///
    /// Their `process` calls return [`PipelineError::ConnectionClosed`].
    /// Returns `false` if nothing was pending for the connection.
    pub fn close_connection(&self, connection: ConnectionId) -> bool {
        let closed = self.serializer.close(connection);
        if closed {
            debug!(connection_id = %connection, "pending interception cancelled");
        }
        closed
    }
}
