use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Events recorded by the exchange layer and the executor.
pub enum MetricEvent {
    FaceCreated,
    FaceDropped,
    Packed(usize),
    MessageSent,
    ReductionCompleted,
}

/// Counters for one run. The collector is owned by whoever drives the run
/// and handed to the objects it creates; nothing here is process-global.
#[derive(Debug, Default)]
pub struct Metrics {
    faces_live: AtomicUsize,
    faces_created: AtomicUsize,
    bytes_packed: AtomicUsize,
    messages_sent: AtomicUsize,
    reductions: AtomicUsize,
}

/// A point-in-time copy of the counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub faces_live: usize,
    pub faces_created: usize,
    pub bytes_packed: usize,
    pub messages_sent: usize,
    pub reductions: usize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, event: MetricEvent) {
        match event {
            MetricEvent::FaceCreated => {
                self.faces_live.fetch_add(1, Ordering::Relaxed);
                self.faces_created.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::FaceDropped => {
                self.faces_live.fetch_sub(1, Ordering::Relaxed);
            }
            MetricEvent::Packed(bytes) => {
                self.bytes_packed.fetch_add(bytes, Ordering::Relaxed);
            }
            MetricEvent::MessageSent => {
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::ReductionCompleted => {
                self.reductions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            faces_live: self.faces_live.load(Ordering::Relaxed),
            faces_created: self.faces_created.load(Ordering::Relaxed),
            bytes_packed: self.bytes_packed.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            reductions: self.reductions.load(Ordering::Relaxed),
        }
    }
}

/// Scoped handle counting one live object against a collector: created
/// with the object, dropped with it. Cloning the handle counts the clone.
#[derive(Debug)]
pub struct Live {
    metrics: Arc<Metrics>,
}

impl Live {
    pub fn new(metrics: &Arc<Metrics>) -> Self {
        metrics.record(MetricEvent::FaceCreated);
        Self {
            metrics: Arc::clone(metrics),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

impl Clone for Live {
    fn clone(&self) -> Self {
        Self::new(&self.metrics)
    }
}

impl Drop for Live {
    fn drop(&mut self) {
        self.metrics.record(MetricEvent::FaceDropped)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn live_handles_count_up_and_down() {
        let metrics = Metrics::new();
        let a = Live::new(&metrics);
        let b = a.clone();
        assert_eq!(metrics.snapshot().faces_live, 2);
        drop(a);
        drop(b);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.faces_live, 0);
        assert_eq!(snapshot.faces_created, 2);
    }

    #[test]
    fn separate_collectors_do_not_interfere() {
        let m1 = Metrics::new();
        let m2 = Metrics::new();
        let _live = Live::new(&m1);
        m2.record(MetricEvent::Packed(64));
        assert_eq!(m1.snapshot().bytes_packed, 0);
        assert_eq!(m2.snapshot().faces_live, 0);
        assert_eq!(m2.snapshot().bytes_packed, 64);
    }
}
