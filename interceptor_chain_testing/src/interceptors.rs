//! Interceptors with scripted behaviour for PUBREC chains.
//!
//! Every handle is registered under the `test` extension with the given
//! name. Interceptors that edit the packet append a `tag` user property so
//! tests can read back which edits reached the final packet.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use interceptor_chain::{
    error::InterceptorError,
    interceptor::{InterceptorHandle, InterceptorInput, InterceptorOutput, TimeoutFallback, interceptor_fn},
    packet::{PubrecPacket, PubrecReasonCode},
    session::ConnectionId,
};

/// Extension id shared by every handle built here.
pub const EXTENSION: &str = "test";

fn on_pubrec<F>(f: F) -> F
where
    F: Fn(&InterceptorInput<PubrecPacket>, &mut InterceptorOutput<PubrecPacket>) -> Result<(), InterceptorError>
        + Send
        + Sync
        + 'static,
{
    interceptor_fn(f)
}

fn add_tag(packet: &mut PubrecPacket, tag: &str) -> Result<(), InterceptorError> {
    packet.user_properties_mut().add("tag", tag)?;
    Ok(())
}

/// A successful PUBREC with the given packet identifier.
#[must_use]
pub fn packet(identifier: u16) -> PubrecPacket { PubrecPacket::new(identifier, PubrecReasonCode::Success) }

/// Values of the `tag` user properties in order.
#[must_use]
pub fn tags(packet: &PubrecPacket) -> Vec<String> {
    packet
        .user_properties()
        .get("tag")
        .map(str::to_owned)
        .collect()
}

/// Appends `tag=<name>`.
#[must_use]
pub fn tagging(name: &str) -> InterceptorHandle<PubrecPacket> {
    let tag = name.to_owned();
    InterceptorHandle::new(
        (EXTENSION, name),
        on_pubrec(move |_, output| output.with_packet(|p| add_tag(p, &tag))?),
    )
}

/// Edits the packet, then returns an error.
#[must_use]
pub fn failing(name: &str) -> InterceptorHandle<PubrecPacket> {
    InterceptorHandle::new(
        (EXTENSION, name),
        on_pubrec(|_, output| {
            output.with_packet(|p| {
                add_tag(p, "poisoned")?;
                p.set_reason_string(Some("partial edit".to_owned()))?;
                Ok::<_, InterceptorError>(())
            })??;
            Err(InterceptorError::other("scripted failure"))
        }),
    )
}

/// Edits the packet, then panics.
#[must_use]
pub fn panicking(name: &str) -> InterceptorHandle<PubrecPacket> {
    InterceptorHandle::new(
        (EXTENSION, name),
        on_pubrec(|_, output| {
            output.with_packet(|p| add_tag(p, "poisoned"))??;
            panic!("scripted panic");
        }),
    )
}

/// Suspends, appends `tag=<name>` and never resumes.
#[must_use]
pub fn stalling(name: &str, timeout: Duration, fallback: TimeoutFallback) -> InterceptorHandle<PubrecPacket> {
    let tag = name.to_owned();
    InterceptorHandle::new(
        (EXTENSION, name),
        on_pubrec(move |_, output| output.async_output()?.with_packet(|p| add_tag(p, &tag))?),
    )
    .asynchronous(timeout, fallback)
}

/// Suspends and, after `delay`, appends `tag=<name>` from a spawned task
/// and resumes.
#[must_use]
pub fn delayed(name: &str, delay: Duration, timeout: Duration) -> InterceptorHandle<PubrecPacket> {
    let tag = name.to_owned();
    InterceptorHandle::new(
        (EXTENSION, name),
        on_pubrec(move |_, output| {
            let pending = output.async_output()?;
            let tag = tag.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                pending.with_packet(|p| add_tag(p, &tag))??;
                pending.resume()
            });
            Ok(())
        }),
    )
    .asynchronous(timeout, TimeoutFallback::Failure)
}

/// Requests the packet be dropped.
#[must_use]
pub fn dropping(name: &str) -> InterceptorHandle<PubrecPacket> {
    InterceptorHandle::new((EXTENSION, name), on_pubrec(|_, output| output.drop_packet()))
}

/// One invocation seen by a [`recording`] interceptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// Connection the packet belonged to.
    pub connection: ConnectionId,
    /// Name of the recording interceptor.
    pub interceptor: String,
    /// Identifier of the packet.
    pub packet_identifier: u16,
    /// Tags present on the packet when the interceptor ran.
    pub tags_seen: Vec<String>,
}

/// Shared log of invocations, safe to use from many connections at once.
#[derive(Clone, Debug, Default)]
pub struct InvocationLog(Arc<Mutex<Vec<LogEntry>>>);

impl InvocationLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Copy of every entry in invocation order.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Entries for `connection` in invocation order.
    #[must_use]
    pub fn for_connection(&self, connection: ConnectionId) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.connection == connection)
            .collect()
    }

    fn push(&self, entry: LogEntry) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

/// Records each invocation in `log` and appends `tag=<name>`.
#[must_use]
pub fn recording(name: &str, log: &InvocationLog) -> InterceptorHandle<PubrecPacket> {
    let log = log.clone();
    let tag = name.to_owned();
    InterceptorHandle::new(
        (EXTENSION, name),
        on_pubrec(move |input, output| {
            log.push(LogEntry {
                connection: input.connection(),
                interceptor: tag.clone(),
                packet_identifier: input.packet().packet_identifier(),
                tags_seen: tags(input.packet()),
            });
            output.with_packet(|p| add_tag(p, &tag))?
        }),
    )
}
