//! Sequenced item envelopes.

use std::sync::atomic::{AtomicU64, Ordering};

/// Bound shared by every value that flows through a pipeline.
///
/// Retries re-submit the same value, so payloads must be cloneable.
pub trait Payload: Clone + Send + Sync + 'static {}

impl<T> Payload for T where T: Clone + Send + Sync + 'static {}

/// An item paired with the sequence index it was assigned at ingress.
///
/// Modifiers that produce a new value for an item must keep the index; use
/// [`Envelope::with_value`] rather than building a fresh envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<T> {
    index: u64,
    value: T,
}

impl<T> Envelope<T> {
    pub(crate) fn new(index: u64, value: T) -> Self {
        Self { index, value }
    }

    /// Returns the ingress sequence index.
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Returns a reference to the payload.
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consumes the envelope, returning the payload.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Replaces the payload, keeping the index.
    #[must_use]
    pub fn with_value(self, value: T) -> Self {
        Self {
            index: self.index,
            value,
        }
    }

    /// Maps the payload, keeping the index.
    pub fn map<F>(self, f: F) -> Self
    where
        F: FnOnce(T) -> T,
    {
        Self {
            index: self.index,
            value: f(self.value),
        }
    }
}

/// Hands out gap-free, strictly increasing indices for one pipeline.
#[derive(Debug, Default)]
pub(crate) struct Sequencer {
    next: AtomicU64,
}

impl Sequencer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wraps a value with the next index.
    pub(crate) fn wrap<T>(&self, value: T) -> Envelope<T> {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        Envelope::new(index, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_with_value_keeps_index() {
        let env = Envelope::new(7, "a").with_value("b");
        assert_eq!(env.index(), 7);
        assert_eq!(*env.value(), "b");

        let env = Envelope::new(2, 10).map(|v| v * 3);
        assert_eq!(env.index(), 2);
        assert_eq!(env.into_value(), 30);
    }

    #[test]
    fn test_sequencer_is_gap_free_across_threads() {
        let sequencer = Arc::new(Sequencer::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sequencer = sequencer.clone();
                std::thread::spawn(move || {
                    (0..250).map(|i| sequencer.wrap(i).index()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for index in handle.join().unwrap() {
                assert!(seen.insert(index), "index {index} issued twice");
            }
        }

        assert_eq!(sequencer.wrap(0).index(), 1000);
        assert!((0..1000).all(|i| seen.contains(&i)));
    }
}
