//! Pipeline run counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Item counters for one pipeline.
///
/// `written` counts accepted writes; every written item ends up in exactly
/// one of the other counters once the pipeline has drained.
#[derive(Debug, Default)]
pub struct PipelineStats {
    written: AtomicU64,
    emitted: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    faulted: AtomicU64,
    discarded: AtomicU64,
}

impl PipelineStats {
    pub(crate) fn record_written(&self) {
        self.written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_faulted(&self) {
        self.faulted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Items accepted by `write`.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Items delivered to the output channel.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Items skipped because their stage was cancelled.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Items whose failure an error callback consumed.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Items whose failure faulted the pipeline.
    #[must_use]
    pub fn faulted(&self) -> u64 {
        self.faulted.load(Ordering::Relaxed)
    }

    /// Items thrown away after a fault, or because the output was dropped.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Converts the counters to a JSON object.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "written": self.written(),
            "emitted": self.emitted(),
            "dropped": self.dropped(),
            "failed": self.failed(),
            "faulted": self.faulted(),
            "discarded": self.discarded(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = PipelineStats::default();
        stats.record_written();
        stats.record_written();
        stats.record_emitted();
        stats.record_failed();

        assert_eq!(stats.written(), 2);
        let dict = stats.to_dict();
        assert_eq!(dict["emitted"], 1);
        assert_eq!(dict["failed"], 1);
        assert_eq!(dict["dropped"], 0);
    }
}
