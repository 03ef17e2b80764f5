//! Tests for chain execution.

use std::{
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use rstest::rstest;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

use super::*;
use crate::{
    context::PacketMutationContext,
    error::{InterceptorError, PipelineError},
    events::{FailureEvent, FailureKind, FailureSink},
    interceptor::{
        InterceptorHandle,
        InterceptorId,
        InterceptorInput,
        InterceptorOutput,
        TimeoutFallback,
        interceptor_fn,
    },
    packet::{PubrecPacket, PubrecReasonCode},
    session::ConnectionId,
};

#[derive(Default)]
struct Recorded(Mutex<Vec<FailureEvent>>);

impl FailureSink for Recorded {
    fn record(&self, event: FailureEvent) {
        self.0.lock().expect("events lock poisoned").push(event);
    }
}

impl Recorded {
    fn events(&self) -> Vec<FailureEvent> { self.0.lock().expect("events lock poisoned").clone() }
}

fn on_pubrec<F>(f: F) -> F
where
    F: Fn(&InterceptorInput<PubrecPacket>, &mut InterceptorOutput<PubrecPacket>) -> Result<(), InterceptorError>
        + Send
        + Sync
        + 'static,
{
    interceptor_fn(f)
}

fn packet() -> PubrecPacket { PubrecPacket::new(42, PubrecReasonCode::Success) }

fn tags(packet: &PubrecPacket) -> Vec<String> {
    packet
        .user_properties()
        .get("tag")
        .map(str::to_owned)
        .collect()
}

fn tagger(name: &'static str) -> InterceptorHandle<PubrecPacket> {
    InterceptorHandle::new(
        ("test", name),
        on_pubrec(move |_, output| {
            output.with_packet(|p| p.user_properties_mut().add("tag", name))??;
            Ok(())
        }),
    )
}

fn failing(name: &'static str) -> InterceptorHandle<PubrecPacket> {
    InterceptorHandle::new(
        ("test", name),
        on_pubrec(move |_, output| {
            output.with_packet(|p| {
                p.user_properties_mut().add("tag", "poisoned")?;
                p.set_reason_string(Some("half-done".into()))
            })??;
            Err(InterceptorError::other("backend down"))
        }),
    )
}

fn dropper(name: &'static str) -> InterceptorHandle<PubrecPacket> {
    InterceptorHandle::new(
        ("test", name),
        on_pubrec(|_, output| {
            output.drop_packet()
        }),
    )
}

fn counting(name: &'static str, calls: &Arc<AtomicUsize>) -> InterceptorHandle<PubrecPacket> {
    let calls = Arc::clone(calls);
    InterceptorHandle::new(
        ("test", name),
        on_pubrec(move |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    )
}

async fn run(chain: Chain<PubrecPacket>, sink: Arc<Recorded>) -> ChainVerdict<PubrecPacket> {
    ChainExecutor::new(ConnectionId::new(3), chain)
        .sink(sink)
        .run(PacketMutationContext::new(packet()))
        .await
        .expect("not cancelled")
}

#[tokio::test]
async fn empty_chain_sends_original_packet() {
    let verdict = run(Chain::empty(), Arc::default()).await;
    assert_eq!(
        verdict,
        ChainVerdict::Sent {
            packet: packet(),
            modified: false,
        }
    );
}

#[rstest]
#[case(&["a"])]
#[case(&["a", "b"])]
#[case(&["c", "a", "b", "a"])]
#[tokio::test]
async fn edits_compose_in_registration_order(#[case] names: &[&'static str]) {
    let chain: Chain<_> = names.iter().map(|n| tagger(n)).collect();
    let ChainVerdict::Sent { packet, modified } = run(chain, Arc::default()).await else {
        panic!("chain dropped the packet");
    };
    assert!(modified);
    assert_eq!(tags(&packet), names);
}

#[tokio::test]
async fn failing_middle_interceptor_is_rolled_back() {
    let sink = Arc::new(Recorded::default());
    let chain = Chain::from(vec![tagger("one"), failing("two"), tagger("three")]);

    let ChainVerdict::Sent { packet, .. } = run(chain, Arc::clone(&sink)).await else {
        panic!("chain dropped the packet");
    };

    assert_eq!(tags(&packet), ["one", "three"]);
    assert_eq!(packet.reason_string(), None);
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, FailureKind::CallbackError);
    assert_eq!(events[0].interceptor, Some(InterceptorId::new("test", "two")));
    assert_eq!(events[0].cause.as_deref(), Some("backend down"));
}

#[tokio::test]
async fn failure_matches_chain_without_failing_interceptor() {
    let with_failure = Chain::from(vec![tagger("a"), failing("x"), tagger("b")]);
    let without = Chain::from(vec![tagger("a"), tagger("b")]);

    assert_eq!(
        run(with_failure, Arc::default()).await,
        run(without, Arc::default()).await
    );
}

#[tokio::test]
async fn drop_short_circuits_remaining_interceptors() {
    let calls = Arc::new(AtomicUsize::new(0));
    let chain = Chain::from(vec![tagger("one"), dropper("two"), counting("three", &calls)]);

    let verdict = run(chain, Arc::default()).await;

    assert_eq!(
        verdict,
        ChainVerdict::Dropped {
            by: InterceptorId::new("test", "two"),
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn async_drop_then_resume_drops_packet() {
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = InterceptorHandle::new(
        ("test", "async-gate"),
        on_pubrec(|_, output| {
            let pending = output.async_output()?;
            tokio::spawn(async move {
                let _ = pending.drop_packet().and_then(|()| pending.resume());
            });
            Ok(())
        }),
    )
    .asynchronous(Duration::from_secs(1), TimeoutFallback::Failure);
    let chain = Chain::from(vec![gate, counting("after", &calls)]);

    let verdict = run(chain, Arc::default()).await;

    assert_eq!(
        verdict,
        ChainVerdict::Dropped {
            by: InterceptorId::new("test", "async-gate"),
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn drop_requested_before_continue_timeout_drops_packet() {
    let sink = Arc::new(Recorded::default());
    let gate = InterceptorHandle::new(
        ("test", "stalled-gate"),
        on_pubrec(|_, output| {
            output.async_output()?.drop_packet()
        }),
    )
    .asynchronous(Duration::from_millis(25), TimeoutFallback::Continue);
    let chain = Chain::from(vec![tagger("first"), gate, tagger("never")]);

    let verdict = run(chain, Arc::clone(&sink)).await;

    assert_eq!(
        verdict,
        ChainVerdict::Dropped {
            by: InterceptorId::new("test", "stalled-gate"),
        }
    );
    assert!(sink.events().is_empty());
}

fn dropping_then_failing(name: &'static str) -> InterceptorHandle<PubrecPacket> {
    InterceptorHandle::new(
        ("test", name),
        on_pubrec(|_, output| {
            output.drop_packet()?;
            Err(InterceptorError::other("changed its mind"))
        }),
    )
}

fn dropping_then_stalling(name: &'static str) -> InterceptorHandle<PubrecPacket> {
    InterceptorHandle::new(
        ("test", name),
        on_pubrec(|_, output| {
            output.async_output()?.drop_packet()
        }),
    )
    .asynchronous(Duration::from_millis(25), TimeoutFallback::Failure)
}

#[rstest]
#[case(dropping_then_failing("gate"), FailureKind::CallbackError)]
#[case(dropping_then_stalling("gate"), FailureKind::CallbackTimeout)]
#[tokio::test(start_paused = true)]
async fn drop_from_failed_invocation_is_discarded(
    #[case] gate: InterceptorHandle<PubrecPacket>,
    #[case] kind: FailureKind,
) {
    let sink = Arc::new(Recorded::default());
    let chain = Chain::from(vec![gate, tagger("after")]);

    let ChainVerdict::Sent { packet, .. } = run(chain, Arc::clone(&sink)).await else {
        panic!("drop from a failed invocation took effect");
    };

    assert_eq!(tags(&packet), ["after"]);
    let kinds: Vec<_> = sink.events().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, [kind]);
}

#[tokio::test]
async fn panicking_interceptor_does_not_abort_chain() {
    let sink = Arc::new(Recorded::default());
    let panicking = InterceptorHandle::new(
        ("test", "panic"),
        on_pubrec(|_, _| {
            panic!("extension bug")
        }),
    );
    let chain = Chain::from(vec![panicking, tagger("after")]);

    let ChainVerdict::Sent { packet, .. } = run(chain, Arc::clone(&sink)).await else {
        panic!("chain dropped the packet");
    };

    assert_eq!(tags(&packet), ["after"]);
    assert_eq!(
        sink.events()[0].cause.as_deref(),
        Some("panicked: extension bug")
    );
}

#[tokio::test(start_paused = true)]
async fn timed_out_interceptor_is_rolled_back_and_reported() {
    let sink = Arc::new(Recorded::default());
    let stalled = InterceptorHandle::new(
        ("test", "stall"),
        on_pubrec(|_, output| {
            output
                .async_output()?
                .with_packet(|p| p.user_properties_mut().add("tag", "stalled"))??;
            Ok(())
        }),
    )
    .asynchronous(Duration::from_millis(40), TimeoutFallback::Failure);
    let chain = Chain::from(vec![tagger("first"), stalled, tagger("last")]);

    let ChainVerdict::Sent { packet, .. } = run(chain, Arc::clone(&sink)).await else {
        panic!("chain dropped the packet");
    };

    assert_eq!(tags(&packet), ["first", "last"]);
    let events = sink.events();
    assert_eq!(events[0].kind, FailureKind::CallbackTimeout);
    assert_eq!(events[0].timeout, Some(Duration::from_millis(40)));
}

#[tokio::test]
async fn identical_rewrite_is_not_reported_as_modified() {
    let noop = InterceptorHandle::new(
        ("test", "noop"),
        on_pubrec(|_, output| {
            output.with_packet(|p| p.set_reason_code(PubrecReasonCode::Success))??;
            Ok(())
        }),
    );

    let verdict = run(Chain::from(vec![noop]), Arc::default()).await;
    assert_eq!(
        verdict,
        ChainVerdict::Sent {
            packet: packet(),
            modified: false,
        }
    );
}

#[tokio::test]
async fn cancelled_token_abandons_run() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = ChainExecutor::new(ConnectionId::new(9), Chain::from(vec![tagger("a")]))
        .cancellation(cancel)
        .run(PacketMutationContext::new(packet()))
        .await;
    assert_eq!(
        result,
        Err(PipelineError::ConnectionClosed(ConnectionId::new(9)))
    );
}

#[tokio::test]
#[traced_test]
async fn state_transitions_are_traced() {
    let chain = Chain::from(vec![tagger("a"), failing("b")]);
    run(chain, Arc::default()).await;
    assert!(logs_contain("Invoking(0)"));
    assert!(logs_contain("RollingBack(1)"));
    assert!(logs_contain("Sent"));
}

#[test]
fn chain_edits_leave_existing_snapshots_untouched() {
    let original = Chain::from(vec![tagger("a")]);
    let extended = original.with(tagger("b"));
    let trimmed = extended.retain(|h| h.id().name() != "a");

    assert_eq!(original.len(), 1);
    assert_eq!(extended.len(), 2);
    assert_eq!(format!("{trimmed:?}"), "[InterceptorId { extension: \"test\", name: \"b\" }]");
}
