//! Property tests for chain composition and failure isolation.

use std::sync::Arc;

use interceptor_chain::{
    ChainExecutor,
    ChainVerdict,
    ConnectionId,
    PacketMutationContext,
    chain::Chain,
    packet::PubrecPacket,
};
use interceptor_chain_testing::{CollectingSink, failing, packet, panicking, tagging, tags};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Step {
    Tag(u8),
    Fail,
    Panic,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => any::<u8>().prop_map(Step::Tag),
        1 => Just(Step::Fail),
        1 => Just(Step::Panic),
    ]
}

fn build(steps: &[Step]) -> Chain<PubrecPacket> {
    steps
        .iter()
        .enumerate()
        .map(|(i, s)| match s {
            Step::Tag(n) => tagging(&format!("t{n}")),
            Step::Fail => failing(&format!("fail{i}")),
            Step::Panic => panicking(&format!("panic{i}")),
        })
        .collect()
}

fn run(chain: Chain<PubrecPacket>) -> (PubrecPacket, usize) {
    let sink = Arc::new(CollectingSink::new());
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    let verdict = runtime
        .block_on(
            ChainExecutor::new(ConnectionId::new(1), chain)
                .sink(sink.clone())
                .run(PacketMutationContext::new(packet(1))),
        )
        .expect("not cancelled");
    let ChainVerdict::Sent { packet, .. } = verdict else {
        panic!("no interceptor drops");
    };
    (packet, sink.len())
}

fn silence_panics() {
    static HOOK: std::sync::Once = std::sync::Once::new();
    HOOK.call_once(|| std::panic::set_hook(Box::new(|_| {})));
}

proptest! {
    #[test]
    fn successful_edits_compose_in_order(names in prop::collection::vec(any::<u8>(), 0..12)) {
        let steps: Vec<_> = names.iter().copied().map(Step::Tag).collect();
        let (sent, failures) = run(build(&steps));

        let expected: Vec<_> = names.iter().map(|n| format!("t{n}")).collect();
        prop_assert_eq!(tags(&sent), expected);
        prop_assert_eq!(failures, 0);
    }

    #[test]
    fn failing_interceptors_behave_as_if_absent(steps in prop::collection::vec(step(), 0..12)) {
        silence_panics();
        let healthy: Vec<_> = steps
            .iter()
            .filter(|s| matches!(s, Step::Tag(_)))
            .cloned()
            .collect();

        let (with_failures, failures) = run(build(&steps));
        let (without, _) = run(build(&healthy));

        prop_assert_eq!(with_failures, without);
        prop_assert_eq!(failures, steps.len() - healthy.len());
    }
}
