//! Registry collaborator mapping connections to interceptor chains.
//!
//! The pipeline asks the registry for a [`Chain`] once per packet, at the
//! start of the run. [`ExtensionRegistry`] is an in-memory implementation
//! that stores each chain as an immutable snapshot and swaps in a new one on
//! every edit, so a running chain never observes later registrations.

use std::sync::{PoisonError, RwLock};

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::debug;

use crate::{
    chain::Chain,
    error::RegistryError,
    interceptor::{InterceptorHandle, InterceptorId},
    packet::{OutboundPacket, PacketKind},
    session::ConnectionId,
};

/// Source of interceptor chains.
pub trait InterceptorRegistry<P>: Send + Sync {
    /// Resolve the chain for `connection` and `kind`.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] when no chain can be produced. The
    /// pipeline then sends the packet unmodified unless configured otherwise.
    fn chain_for(&self, connection: ConnectionId, kind: PacketKind) -> Result<Chain<P>, RegistryError>;
}

/// In-memory registry of extension interceptors.
///
/// Interceptors added with [`add_for_all`](Self::add_for_all) are appended to
/// every open connection and seed connections opened later.
///
/// # Examples
///
/// ```
/// use interceptor_chain::{
///     interceptor::{InterceptorHandle, interceptor_fn},
///     packet::{PacketKind, PubrecPacket},
///     registry::{ExtensionRegistry, InterceptorRegistry},
///     session::ConnectionId,
/// };
///
/// let registry = ExtensionRegistry::<PubrecPacket>::new();
/// let conn = ConnectionId::new(1);
/// registry.open_connection(conn);
/// registry
///     .add(
///         conn,
///         InterceptorHandle::new(
///             ("audit", "stamp"),
///             interceptor_fn::<PubrecPacket, _>(|_, _| Ok(())),
///         ),
///     )
///     .expect("first registration");
///
/// let chain = registry.chain_for(conn, PacketKind::Pubrec).expect("open connection");
/// assert_eq!(chain.len(), 1);
/// ```
pub struct ExtensionRegistry<P> {
    defaults: RwLock<Chain<P>>,
    connections: DashMap<ConnectionId, Chain<P>>,
}

impl<P> Default for ExtensionRegistry<P> {
    fn default() -> Self {
        Self {
            defaults: RwLock::new(Chain::empty()),
            connections: DashMap::new(),
        }
    }
}

fn contains<P>(chain: &Chain<P>, id: &InterceptorId) -> bool { chain.iter().any(|h| h.id() == id) }

impl<P: OutboundPacket> ExtensionRegistry<P> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    fn defaults(&self) -> Chain<P> {
        self.defaults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start tracking `connection`, seeded with the interceptors registered
    /// for all connections. Returns `false` if it was already open.
    pub fn open_connection(&self, connection: ConnectionId) -> bool {
        match self.connections.entry(connection) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(self.defaults());
                debug!(connection_id = %connection, "connection opened in registry");
                true
            }
        }
    }

    /// Forget `connection`. Returns `false` if it was not open.
    pub fn close_connection(&self, connection: ConnectionId) -> bool {
        self.connections.remove(&connection).is_some()
    }

    /// Append `handle` to the chain of `connection`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] if the connection is not
    /// open and [`RegistryError::DuplicateInterceptor`] if an interceptor
    /// with the same id is already in its chain.
    pub fn add(&self, connection: ConnectionId, handle: InterceptorHandle<P>) -> Result<(), RegistryError> {
        let mut chain = self
            .connections
            .get_mut(&connection)
            .ok_or(RegistryError::UnknownConnection(connection))?;
        if contains(&chain, handle.id()) {
            return Err(RegistryError::DuplicateInterceptor {
                connection,
                interceptor: handle.id().clone(),
            });
        }
        debug!(connection_id = %connection, interceptor = %handle.id(), "interceptor added");
        *chain = chain.with(handle);
        Ok(())
    }

    /// Register `handle` for every open connection and every connection
    /// opened later. Connections that already carry the id are left as is.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateDefault`] if the id is already
    /// registered for all connections.
    pub fn add_for_all(&self, handle: InterceptorHandle<P>) -> Result<(), RegistryError> {
        {
            let mut defaults = self
                .defaults
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if contains(&defaults, handle.id()) {
                return Err(RegistryError::DuplicateDefault(handle.id().clone()));
            }
            *defaults = defaults.with(handle.clone());
        }
        for mut chain in self.connections.iter_mut() {
            if !contains(&chain, handle.id()) {
                *chain = chain.with(handle.clone());
            }
        }
        debug!(interceptor = %handle.id(), "interceptor added for all connections");
        Ok(())
    }

    /// Remove the interceptor `id` from `connection`. Returns `false` if it
    /// was not registered there.
    pub fn remove(&self, connection: ConnectionId, id: &InterceptorId) -> bool {
        let Some(mut chain) = self.connections.get_mut(&connection) else {
            return false;
        };
        if !contains(&chain, id) {
            return false;
        }
        *chain = chain.retain(|h| h.id() != id);
        true
    }

    /// Remove every interceptor owned by `extension`, from the defaults and
    /// from every open connection. Returns the number of handles removed.
    pub fn remove_extension(&self, extension: &str) -> usize {
        let owned = |h: &InterceptorHandle<P>| h.id().extension() == extension;
        let mut removed = 0;
        {
            let mut defaults = self
                .defaults
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            removed += defaults.iter().filter(|&h| owned(h)).count();
            *defaults = defaults.retain(|h| !owned(h));
        }
        for mut chain in self.connections.iter_mut() {
            let count = chain.iter().filter(|&h| owned(h)).count();
            if count > 0 {
                removed += count;
                *chain = chain.retain(|h| !owned(h));
            }
        }
        debug!(extension, removed, "extension interceptors removed");
        removed
    }
}

impl<P: OutboundPacket> InterceptorRegistry<P> for ExtensionRegistry<P> {
    fn chain_for(&self, connection: ConnectionId, kind: PacketKind) -> Result<Chain<P>, RegistryError> {
        if kind != P::KIND {
            return Err(RegistryError::UnsupportedKind(kind));
        }
        self.connections
            .get(&connection)
            .map(|chain| chain.clone())
            .ok_or(RegistryError::UnknownConnection(connection))
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        error::InterceptorError,
        interceptor::{InterceptorInput, InterceptorOutput, interceptor_fn},
        packet::PubrecPacket,
    };

    fn handle(extension: &str, name: &str) -> InterceptorHandle<PubrecPacket> {
        InterceptorHandle::new(
            (extension, name),
            interceptor_fn(
                |_: &InterceptorInput<PubrecPacket>,
                 _: &mut InterceptorOutput<PubrecPacket>|
                 -> Result<(), InterceptorError> { Ok(()) },
            ),
        )
    }

    fn names(chain: &Chain<PubrecPacket>) -> Vec<String> {
        chain.iter().map(|h| h.id().to_string()).collect()
    }

    #[fixture]
    fn registry() -> ExtensionRegistry<PubrecPacket> {
        let registry = ExtensionRegistry::new();
        registry.open_connection(ConnectionId::new(1));
        registry
    }

    fn chain(registry: &ExtensionRegistry<PubrecPacket>, id: u64) -> Chain<PubrecPacket> {
        registry
            .chain_for(ConnectionId::new(id), PacketKind::Pubrec)
            .expect("connection open")
    }

    #[rstest]
    fn chains_keep_registration_order(registry: ExtensionRegistry<PubrecPacket>) {
        let conn = ConnectionId::new(1);
        registry.add(conn, handle("b", "second")).expect("added");
        registry.add(conn, handle("a", "first")).expect("added");

        assert_eq!(names(&chain(&registry, 1)), ["b/second", "a/first"]);
    }

    #[rstest]
    fn duplicates_are_rejected(registry: ExtensionRegistry<PubrecPacket>) {
        let conn = ConnectionId::new(1);
        registry.add(conn, handle("ext", "x")).expect("added");

        assert_eq!(
            registry.add(conn, handle("ext", "x")),
            Err(RegistryError::DuplicateInterceptor {
                connection: conn,
                interceptor: InterceptorId::new("ext", "x"),
            })
        );
    }

    #[rstest]
    fn unknown_connection_and_kind_are_errors(registry: ExtensionRegistry<PubrecPacket>) {
        assert_eq!(
            registry.chain_for(ConnectionId::new(2), PacketKind::Pubrec).err(),
            Some(RegistryError::UnknownConnection(ConnectionId::new(2)))
        );
        assert_eq!(
            registry.chain_for(ConnectionId::new(1), PacketKind::Puback).err(),
            Some(RegistryError::UnsupportedKind(PacketKind::Puback))
        );
        assert_eq!(
            registry.add(ConnectionId::new(2), handle("ext", "x")),
            Err(RegistryError::UnknownConnection(ConnectionId::new(2)))
        );
    }

    #[rstest]
    fn resolved_chain_is_unaffected_by_later_edits(registry: ExtensionRegistry<PubrecPacket>) {
        let conn = ConnectionId::new(1);
        registry.add(conn, handle("ext", "x")).expect("added");
        let snapshot = chain(&registry, 1);

        registry.add(conn, handle("ext", "y")).expect("added");
        registry.remove(conn, &InterceptorId::new("ext", "x"));

        assert_eq!(names(&snapshot), ["ext/x"]);
        assert_eq!(names(&chain(&registry, 1)), ["ext/y"]);
    }

    #[rstest]
    fn add_for_all_reaches_open_and_future_connections(registry: ExtensionRegistry<PubrecPacket>) {
        registry
            .add(ConnectionId::new(1), handle("local", "first"))
            .expect("added");
        registry.add_for_all(handle("global", "stamp")).expect("added");
        registry.open_connection(ConnectionId::new(2));

        assert_eq!(names(&chain(&registry, 1)), ["local/first", "global/stamp"]);
        assert_eq!(names(&chain(&registry, 2)), ["global/stamp"]);
        assert_eq!(
            registry.add_for_all(handle("global", "stamp")),
            Err(RegistryError::DuplicateDefault(InterceptorId::new("global", "stamp")))
        );
    }

    #[rstest]
    fn remove_extension_clears_every_chain(registry: ExtensionRegistry<PubrecPacket>) {
        registry.add_for_all(handle("gone", "a")).expect("added");
        registry.add(ConnectionId::new(1), handle("gone", "b")).expect("added");
        registry.add(ConnectionId::new(1), handle("kept", "c")).expect("added");
        registry.open_connection(ConnectionId::new(2));

        assert_eq!(registry.remove_extension("gone"), 4);
        assert_eq!(names(&chain(&registry, 1)), ["kept/c"]);
        assert!(chain(&registry, 2).is_empty());
        registry.open_connection(ConnectionId::new(3));
        assert!(chain(&registry, 3).is_empty());
    }

    #[rstest]
    fn open_and_close_report_changes(registry: ExtensionRegistry<PubrecPacket>) {
        assert!(!registry.open_connection(ConnectionId::new(1)));
        assert!(registry.close_connection(ConnectionId::new(1)));
        assert!(!registry.close_connection(ConnectionId::new(1)));
        assert!(!registry.remove(ConnectionId::new(1), &InterceptorId::new("a", "b")));
    }
}
