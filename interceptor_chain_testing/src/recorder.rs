//! Helpers for asserting on metrics with `metrics_util`'s debugging recorder.

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

/// Run `f` with a thread-local debugging recorder and return a snapshotter
/// for the values it recorded.
pub fn capture<T>(f: impl FnOnce() -> T) -> (Snapshotter, T) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let value = metrics::with_local_recorder(&recorder, f);
    (snapshotter, value)
}

/// Current value of counter `name`, optionally restricted to series carrying
/// the label `key=value`. Series are summed.
#[must_use]
pub fn counter(snapshotter: &Snapshotter, name: &str, label: Option<(&str, &str)>) -> u64 {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter(|(key, _, _, _)| key.key().name() == name)
        .filter(|(key, _, _, _)| {
            label.is_none_or(|(k, v)| key.key().labels().any(|l| l.key() == k && l.value() == v))
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(c) => c,
            _ => 0,
        })
        .sum()
}
