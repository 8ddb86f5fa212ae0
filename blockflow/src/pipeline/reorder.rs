//! Order reconstruction after the last stage.
//!
//! Workers finish items out of order. The reorder stage holds early results
//! until every lower index has been emitted or skipped, then releases the
//! contiguous run. Memory is bounded by `max_buffered`; exceeding it fails
//! the output with [`OverflowError`].

use super::output::EgressSender;
use super::runtime::RunContext;
use crate::envelope::Payload;
use crate::errors::{OverflowError, PipelineError};
use crate::events::kinds;
use crate::stages::worker::Slot;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

#[derive(Debug)]
struct ReorderState<T> {
    next_expected: u64,
    /// Early results. Only these count against `max_buffered`.
    pending: BTreeMap<u64, T>,
    /// Early indices that will never carry a value.
    skipped: BTreeSet<u64>,
    max_buffered: Option<usize>,
    failed: bool,
}

impl<T> ReorderState<T> {
    fn release(&mut self, ready: &mut Vec<T>) {
        loop {
            let next = self.next_expected;
            if let Some(value) = self.pending.remove(&next) {
                ready.push(value);
            } else if !self.skipped.remove(&next) {
                break;
            }
            self.next_expected += 1;
        }
    }
}

/// Reorder state machine.
///
/// Idle until an overflow moves it to failed; after that every input is
/// discarded.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    state: Mutex<ReorderState<T>>,
}

impl<T> ReorderBuffer<T> {
    /// Creates a buffer expecting index 0 first.
    #[must_use]
    pub fn new(max_buffered: Option<usize>) -> Self {
        Self {
            state: Mutex::new(ReorderState {
                next_expected: 0,
                pending: BTreeMap::new(),
                skipped: BTreeSet::new(),
                max_buffered,
                failed: false,
            }),
        }
    }

    /// Accepts the result for `index`; `None` marks a skipped index.
    ///
    /// Returns the values that became releasable, in index order. Skipped
    /// indices never count toward the bound.
    ///
    /// # Errors
    ///
    /// Returns an overflow error when holding this value would exceed the
    /// bound. The buffer is failed from then on and its entries are dropped.
    pub fn accept(&self, index: u64, value: Option<T>) -> Result<Vec<T>, OverflowError> {
        let mut state = self.state.lock();
        if state.failed || index < state.next_expected {
            return Ok(Vec::new());
        }

        if index != state.next_expected {
            let Some(value) = value else {
                state.skipped.insert(index);
                return Ok(Vec::new());
            };
            state.pending.insert(index, value);
            if let Some(max_buffered) = state.max_buffered {
                let pending = state.pending.len();
                if pending > max_buffered {
                    state.failed = true;
                    state.pending.clear();
                    state.skipped.clear();
                    return Err(OverflowError {
                        max_buffered,
                        pending,
                        next_expected: state.next_expected,
                    });
                }
            }
            return Ok(Vec::new());
        }

        let mut ready: Vec<T> = value.into_iter().collect();
        state.next_expected += 1;
        state.release(&mut ready);
        Ok(ready)
    }

    /// Releases whatever is still held, in ascending index order.
    ///
    /// Entries remain only if an index never arrived.
    pub fn finish(&self) -> Vec<T> {
        let mut state = self.state.lock();
        let pending = std::mem::take(&mut state.pending);
        let skipped = std::mem::take(&mut state.skipped);
        let last = pending.keys().next_back().copied().max(skipped.last().copied());
        if let Some(last) = last {
            state.next_expected = last + 1;
        }
        pending.into_values().collect()
    }

    /// The index the buffer is waiting for.
    #[must_use]
    pub fn next_expected(&self) -> u64 {
        self.state.lock().next_expected
    }

    /// Number of held values.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether the buffer has overflowed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state.lock().failed
    }
}

/// Drains the last stage's output through the buffer into egress.
///
/// Keeps receiving after an overflow so upstream workers never block on a
/// full channel.
pub(crate) async fn run_reorder<T: Payload>(
    mut input: mpsc::Receiver<Slot<T>>,
    buffer: ReorderBuffer<T>,
    egress: EgressSender<T>,
    run: Arc<RunContext>,
) {
    while let Some(slot) = input.recv().await {
        let (index, value) = match slot {
            Slot::Item(env) => (env.index(), Some(env.into_value())),
            Slot::Skipped(index) => (index, None),
        };

        if buffer.is_failed() {
            if value.is_some() {
                run.stats.record_discarded();
            }
            continue;
        }

        match buffer.accept(index, value) {
            Ok(ready) => {
                for value in ready {
                    egress.send_value(value).await;
                }
            }
            Err(overflow) => {
                error!(
                    pipeline = %run.pipeline,
                    max_buffered = overflow.max_buffered,
                    pending = overflow.pending,
                    next_expected = overflow.next_expected,
                    "Reorder buffer overflow"
                );
                run.emit(
                    kinds::REORDER_OVERFLOW,
                    json!({
                        "max_buffered": overflow.max_buffered,
                        "pending": overflow.pending,
                        "next_expected": overflow.next_expected,
                    }),
                );
                let err = PipelineError::Overflow(overflow);
                run.record_fault(err.clone());
                egress.send_error(err).await;
            }
        }
    }

    if !buffer.is_failed() {
        let leftover = buffer.finish();
        if !leftover.is_empty() {
            warn!(
                pipeline = %run.pipeline,
                count = leftover.len(),
                "Flushing results behind a missing index"
            );
        }
        for value in leftover {
            egress.send_value(value).await;
        }
    }
    debug!(pipeline = %run.pipeline, "Reorder stage finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_in_order_passes_through() {
        let buffer = ReorderBuffer::new(None);
        assert_eq!(buffer.accept(0, Some("a")).unwrap(), vec!["a"]);
        assert_eq!(buffer.accept(1, Some("b")).unwrap(), vec!["b"]);
        assert_eq!(buffer.next_expected(), 2);
    }

    #[test]
    fn test_reverse_arrival_releases_on_gap_fill() {
        let buffer = ReorderBuffer::new(None);
        assert!(buffer.accept(3, Some(3)).unwrap().is_empty());
        assert!(buffer.accept(2, Some(2)).unwrap().is_empty());
        assert!(buffer.accept(1, Some(1)).unwrap().is_empty());
        assert_eq!(buffer.pending_len(), 3);

        assert_eq!(buffer.accept(0, Some(0)).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn test_skip_markers_advance() {
        let buffer = ReorderBuffer::new(None);
        assert!(buffer.accept(2, Some(20)).unwrap().is_empty());
        assert!(buffer.accept(1, None).unwrap().is_empty());
        assert_eq!(buffer.accept(0, None).unwrap(), vec![20]);
        assert_eq!(buffer.next_expected(), 3);
    }

    #[test]
    fn test_skip_markers_do_not_count_toward_bound() {
        let buffer: ReorderBuffer<i32> = ReorderBuffer::new(Some(0));
        for index in (1..50).rev() {
            assert!(buffer.accept(index, None).unwrap().is_empty());
        }
        assert_eq!(buffer.pending_len(), 0);
        assert!(!buffer.is_failed());

        assert!(buffer.accept(0, None).unwrap().is_empty());
        assert_eq!(buffer.next_expected(), 50);
        assert_eq!(buffer.accept(50, Some(7)).unwrap(), vec![7]);
    }

    #[test]
    fn test_skip_between_values_releases_run() {
        let buffer = ReorderBuffer::new(Some(1));
        assert!(buffer.accept(2, Some(2)).unwrap().is_empty());
        assert!(buffer.accept(1, None).unwrap().is_empty());
        assert_eq!(buffer.accept(0, Some(0)).unwrap(), vec![0, 2]);
        assert_eq!(buffer.next_expected(), 3);
    }

    #[test]
    fn test_overflow_at_bound() {
        let buffer = ReorderBuffer::new(Some(1));
        assert!(buffer.accept(2, Some(2)).is_ok());
        let err = buffer.accept(1, Some(1)).unwrap_err();

        assert_eq!(
            err,
            OverflowError {
                max_buffered: 1,
                pending: 2,
                next_expected: 0,
            }
        );
        assert!(buffer.is_failed());
        assert!(buffer.accept(0, Some(0)).unwrap().is_empty());
    }

    #[test]
    fn test_zero_bound_accepts_in_order_only() {
        let buffer = ReorderBuffer::new(Some(0));
        assert_eq!(buffer.accept(0, Some(0)).unwrap(), vec![0]);
        assert!(buffer.accept(2, Some(2)).is_err());
    }

    #[test]
    fn test_finish_flushes_ascending() {
        let buffer = ReorderBuffer::new(None);
        buffer.accept(5, Some(5)).unwrap();
        buffer.accept(3, Some(3)).unwrap();
        buffer.accept(4, None).unwrap();

        assert_eq!(buffer.finish(), vec![3, 5]);
        assert_eq!(buffer.pending_len(), 0);
    }
}
