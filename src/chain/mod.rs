//! Ordered interceptor chains and the executor that runs them.

mod executor;

use std::{ops::Deref, sync::Arc};

pub use executor::{ChainExecutor, ChainState, ChainVerdict};

use crate::interceptor::InterceptorHandle;

/// Immutable, shareable snapshot of the interceptors registered for one
/// connection and packet kind, in registration order.
///
/// Cloning is cheap. A run holds its snapshot for its whole duration, so
/// registry edits only affect packets processed afterwards.
pub struct Chain<P>(Arc<[InterceptorHandle<P>]>);

impl<P> Chain<P> {
    /// A chain with no interceptors.
    #[must_use]
    pub fn empty() -> Self { Self(Arc::from(Vec::new())) }

    /// Return a new chain with `handle` appended.
    #[must_use]
    pub fn with(&self, handle: InterceptorHandle<P>) -> Self {
        let mut handles = self.0.to_vec();
        handles.push(handle);
        Self(handles.into())
    }

    /// Return a new chain keeping only the handles matching `keep`.
    #[must_use]
    pub fn retain(&self, mut keep: impl FnMut(&InterceptorHandle<P>) -> bool) -> Self {
        Self(self.0.iter().filter(|h| keep(h)).cloned().collect())
    }
}

impl<P> Clone for Chain<P> {
    fn clone(&self) -> Self { Self(Arc::clone(&self.0)) }
}

impl<P> Default for Chain<P> {
    fn default() -> Self { Self::empty() }
}

impl<P> Deref for Chain<P> {
    type Target = [InterceptorHandle<P>];

    fn deref(&self) -> &Self::Target { &self.0 }
}

impl<P> From<Vec<InterceptorHandle<P>>> for Chain<P> {
    fn from(handles: Vec<InterceptorHandle<P>>) -> Self { Self(handles.into()) }
}

impl<P> FromIterator<InterceptorHandle<P>> for Chain<P> {
    fn from_iter<I: IntoIterator<Item = InterceptorHandle<P>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<P> std::fmt::Debug for Chain<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.0.iter().map(InterceptorHandle::id)).finish()
    }
}

#[cfg(test)]
mod tests;
