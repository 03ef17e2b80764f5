//! A [`FailureSink`] that keeps every event for later assertions.

use std::sync::{Mutex, PoisonError};

use interceptor_chain::events::{FailureEvent, FailureKind, FailureSink};

/// Collects failure events in arrival order.
#[derive(Debug, Default)]
pub struct CollectingSink(Mutex<Vec<FailureEvent>>);

impl CollectingSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Copy of every recorded event.
    #[must_use]
    pub fn events(&self) -> Vec<FailureEvent> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Kinds of the recorded events.
    #[must_use]
    pub fn kinds(&self) -> Vec<FailureKind> { self.events().into_iter().map(|e| e.kind).collect() }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize { self.0.lock().unwrap_or_else(PoisonError::into_inner).len() }

    /// Whether no event was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl FailureSink for CollectingSink {
    fn record(&self, event: FailureEvent) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
