//! Explicitly passed metrics handle.
//!
//! Components never touch the global `metrics` recorder. The caller owns
//! the recorder (and any exporter attached to it) and hands a [`MetricsSink`]
//! to each component; without one, metrics are discarded.

use metrics::{Counter, Histogram, NoopRecorder, Recorder};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MetricsSink {
    recorder: Option<Arc<dyn Recorder + Send + Sync>>,
}

impl MetricsSink {
    pub fn new(recorder: Arc<dyn Recorder + Send + Sync>) -> Self {
        Self {
            recorder: Some(recorder),
        }
    }

    /// Sink that drops everything
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn is_noop(&self) -> bool {
        self.recorder.is_none()
    }

    /// Run `f` with this sink's recorder installed for the current thread, so
    /// `metrics::counter!` and friends register against it.
    pub fn scoped<T>(&self, f: impl FnOnce() -> T) -> T {
        match &self.recorder {
            Some(recorder) => metrics::with_local_recorder(recorder.as_ref(), f),
            None => metrics::with_local_recorder(&NoopRecorder, f),
        }
    }

    pub fn counter(&self, name: &'static str, labels: &[(&'static str, &'static str)]) -> Counter {
        let labels = to_labels(labels);
        self.scoped(|| metrics::counter!(name, labels))
    }

    pub fn histogram(
        &self,
        name: &'static str,
        labels: &[(&'static str, &'static str)],
    ) -> Histogram {
        let labels = to_labels(labels);
        self.scoped(|| metrics::histogram!(name, labels))
    }
}

fn to_labels(labels: &[(&'static str, &'static str)]) -> Vec<metrics::Label> {
    labels
        .iter()
        .map(|(key, value)| metrics::Label::new(*key, *value))
        .collect()
}

impl fmt::Debug for MetricsSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsSink")
            .field("noop", &self.is_noop())
            .finish()
    }
}
