//! Transactional working copy of the packet for one chain run.
//!
//! [`PacketMutationContext`] owns the packet while a chain executes. Each
//! interceptor receives an owned copy taken by
//! [`begin_invocation`](PacketMutationContext::begin_invocation); the working
//! copy only changes on [`commit`](PacketMutationContext::commit), so a failed
//! invocation never leaves partial edits behind.

use std::sync::Arc;

use crate::packet::OutboundPacket;

/// Copy-on-enter wrapper around the outbound packet.
///
/// # Examples
///
/// ```
/// use interceptor_chain::{
///     context::PacketMutationContext,
///     packet::{PubrecPacket, PubrecReasonCode},
/// };
///
/// let mut ctx = PacketMutationContext::new(PubrecPacket::new(1, PubrecReasonCode::Success));
/// let mut view = ctx.begin_invocation();
/// view.user_properties_mut().add("k", "v").expect("valid property");
/// ctx.rollback();
/// assert!(!ctx.is_modified());
/// ```
#[derive(Debug)]
pub struct PacketMutationContext<P> {
    original: Arc<P>,
    working: Arc<P>,
    rollback_point: Option<Arc<P>>,
}

impl<P: OutboundPacket> PacketMutationContext<P> {
    /// Seed a context with the packet handed over by the transport.
    #[must_use]
    pub fn new(packet: P) -> Self {
        let original = Arc::new(packet);
        Self {
            working: Arc::clone(&original),
            original,
            rollback_point: None,
        }
    }

    /// Shared, immutable view of the current working copy.
    #[must_use]
    pub fn snapshot(&self) -> Arc<P> { Arc::clone(&self.working) }

    /// Record the working copy as the rollback point and return a mutable
    /// copy for the next interceptor.
    #[must_use]
    pub fn begin_invocation(&mut self) -> P {
        self.rollback_point = Some(Arc::clone(&self.working));
        (*self.working).clone()
    }

    /// Accept an interceptor's edits as the new working copy.
    pub fn commit(&mut self, edited: P) {
        self.working = Arc::new(edited);
        self.rollback_point = None;
    }

    /// Restore the working copy recorded by the last
    /// [`begin_invocation`](Self::begin_invocation).
    ///
    /// Idempotent, and a no-op when no invocation is open.
    pub fn rollback(&mut self) {
        if let Some(point) = &self.rollback_point {
            self.working = Arc::clone(point);
        }
    }

    /// Whether the working copy differs from the packet the context was
    /// seeded with.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        !Arc::ptr_eq(&self.original, &self.working) && *self.original != *self.working
    }

    /// Consume the context and return the working copy.
    #[must_use]
    pub fn final_packet(self) -> P {
        drop(self.rollback_point);
        drop(self.original);
        Arc::unwrap_or_clone(self.working)
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::packet::{PubrecPacket, PubrecReasonCode};

    #[fixture]
    fn ctx() -> PacketMutationContext<PubrecPacket> {
        PacketMutationContext::new(PubrecPacket::new(9, PubrecReasonCode::UnspecifiedError))
    }

    fn tag(packet: &mut PubrecPacket, value: &str) {
        packet
            .user_properties_mut()
            .add("tag", value)
            .expect("valid property");
    }

    #[rstest]
    fn commit_replaces_working_copy(mut ctx: PacketMutationContext<PubrecPacket>) {
        let mut view = ctx.begin_invocation();
        tag(&mut view, "a");
        ctx.commit(view);

        assert!(ctx.is_modified());
        assert_eq!(
            ctx.snapshot().user_properties().get("tag").collect::<Vec<_>>(),
            ["a"]
        );
    }

    #[rstest]
    fn rollback_restores_pre_invocation_state(mut ctx: PacketMutationContext<PubrecPacket>) {
        let mut view = ctx.begin_invocation();
        tag(&mut view, "a");
        ctx.commit(view);
        let committed = ctx.snapshot();

        let mut view = ctx.begin_invocation();
        tag(&mut view, "b");
        ctx.rollback();

        assert_eq!(*ctx.snapshot(), *committed);
    }

    #[rstest]
    fn rollback_is_idempotent(mut ctx: PacketMutationContext<PubrecPacket>) {
        let mut view = ctx.begin_invocation();
        tag(&mut view, "a");
        ctx.commit(view);

        let _ = ctx.begin_invocation();
        ctx.rollback();
        let once = ctx.snapshot();
        ctx.rollback();

        assert_eq!(*ctx.snapshot(), *once);
    }

    #[rstest]
    fn rollback_without_invocation_is_noop(mut ctx: PacketMutationContext<PubrecPacket>) {
        let before = ctx.snapshot();
        ctx.rollback();
        assert!(Arc::ptr_eq(&before, &ctx.snapshot()));
    }

    #[rstest]
    fn snapshot_is_not_affected_by_later_commits(mut ctx: PacketMutationContext<PubrecPacket>) {
        let before = ctx.snapshot();
        let mut view = ctx.begin_invocation();
        tag(&mut view, "a");
        ctx.commit(view);

        assert!(before.user_properties().is_empty());
    }

    #[rstest]
    fn identical_commit_is_not_a_modification(mut ctx: PacketMutationContext<PubrecPacket>) {
        let view = ctx.begin_invocation();
        ctx.commit(view);
        assert!(!ctx.is_modified());
        assert_eq!(ctx.final_packet().packet_identifier(), 9);
    }
}
