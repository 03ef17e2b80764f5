//! Per-connection run serialisation.
//!
//! [`ConnectionSerializer`] keeps one lane per connection. A lane admits a
//! single run at a time and queues later runs in arrival order; lanes of
//! different connections never wait on each other.

use std::{future::Future, sync::Arc};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{error::PipelineError, session::ConnectionId};

struct Lane {
    // `tokio::sync::Mutex` grants the lock in FIFO order.
    queue: Mutex<()>,
    closed: CancellationToken,
}

impl Lane {
    fn new() -> Self {
        Self {
            queue: Mutex::new(()),
            closed: CancellationToken::new(),
        }
    }
}

/// FIFO run queue per connection.
///
/// Arrival order is the order in which [`run`](Self::run) futures are first
/// polled. Idle lanes are removed as soon as their last run finishes.
#[derive(Default)]
pub struct ConnectionSerializer {
    lanes: DashMap<ConnectionId, Arc<Lane>>,
}

/// Holds a lane for the duration of a run and prunes it on release,
/// including when the run future is dropped early.
struct Lease<'a> {
    lanes: &'a DashMap<ConnectionId, Arc<Lane>>,
    connection: ConnectionId,
    lane: Arc<Lane>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        // Idle when only the map and this lease hold the lane. A closed lane
        // may already have been replaced by a fresh one for the same id.
        self.lanes.remove_if(&self.connection, |_, lane| {
            Arc::ptr_eq(lane, &self.lane) && Arc::strong_count(lane) <= 2
        });
    }
}

impl ConnectionSerializer {
    /// Create an empty serializer.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Run `f` once every earlier run on `connection` has finished.
    ///
    /// `f` receives the lane's close token, which fires when
    /// [`close`](Self::close) is called for the connection.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConnectionClosed`] without calling `f` when
    /// the connection is closed while this run is queued. Otherwise returns
    /// whatever `f` returns.
    pub async fn run<F, Fut, T>(&self, connection: ConnectionId, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let lease = Lease {
            lanes: &self.lanes,
            connection,
            lane: Arc::clone(
                self.lanes
                    .entry(connection)
                    .or_insert_with(|| Arc::new(Lane::new()))
                    .value(),
            ),
        };
        let lane = &lease.lane;

        let turn = tokio::select! {
            biased;
            () = lane.closed.cancelled() => None,
            guard = lane.queue.lock() => Some(guard),
        };
        if turn.is_none() || lane.closed.is_cancelled() {
            debug!(connection_id = %connection, "queued run abandoned: connection closed");
            return Err(PipelineError::ConnectionClosed(connection));
        }
        f(lane.closed.clone()).await
    }

    /// Close `connection`, cancelling its in-flight run and every queued
    /// run. Returns `false` if the connection had no lane.
    pub fn close(&self, connection: ConnectionId) -> bool {
        match self.lanes.remove(&connection) {
            Some((_, lane)) => {
                lane.closed.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of connections with a run in flight or queued.
    #[must_use]
    pub fn active_connections(&self) -> usize { self.lanes.len() }
}
