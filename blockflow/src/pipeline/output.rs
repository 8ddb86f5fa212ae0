//! Pipeline egress.

use super::PipelineStats;
use crate::errors::PipelineError;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Reads results from a built pipeline.
///
/// Ends with `None` once every stage has drained. If the output ends in an
/// error (a reorder overflow), the error is the last item returned.
#[derive(Debug)]
pub struct OutputReader<T> {
    rx: mpsc::Receiver<Result<T, PipelineError>>,
    finished: bool,
}

impl<T> OutputReader<T> {
    pub(crate) fn new(rx: mpsc::Receiver<Result<T, PipelineError>>) -> Self {
        Self {
            rx,
            finished: false,
        }
    }

    /// Waits for the next result.
    pub async fn read(&mut self) -> Option<Result<T, PipelineError>> {
        if self.finished {
            return None;
        }
        let next = self.rx.recv().await;
        self.observe(next)
    }

    /// Reads until the output ends.
    ///
    /// # Errors
    ///
    /// Returns the error the output ended with, if any.
    pub async fn collect_all(mut self) -> Result<Vec<T>, PipelineError> {
        let mut values = Vec::new();
        while let Some(next) = self.read().await {
            values.push(next?);
        }
        Ok(values)
    }

    fn observe(&mut self, next: Option<Result<T, PipelineError>>) -> Option<Result<T, PipelineError>> {
        match next {
            Some(Err(err)) => {
                self.finished = true;
                self.rx.close();
                Some(Err(err))
            }
            None => {
                self.finished = true;
                None
            }
            ok => ok,
        }
    }
}

impl<T> Stream for OutputReader<T> {
    type Item = Result<T, PipelineError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx).map(|next| this.observe(next))
    }
}

/// Sending half of the output channel, counting what it delivers.
pub(crate) struct EgressSender<T> {
    tx: mpsc::Sender<Result<T, PipelineError>>,
    stats: Arc<PipelineStats>,
}

impl<T> Clone for EgressSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<T> EgressSender<T> {
    pub(crate) fn new(tx: mpsc::Sender<Result<T, PipelineError>>, stats: Arc<PipelineStats>) -> Self {
        Self { tx, stats }
    }

    /// Delivers a value. A dropped reader discards it.
    pub(crate) async fn send_value(&self, value: T) -> bool {
        if self.tx.send(Ok(value)).await.is_ok() {
            self.stats.record_emitted();
            true
        } else {
            self.stats.record_discarded();
            false
        }
    }

    pub(crate) async fn send_error(&self, err: PipelineError) -> bool {
        self.tx.send(Err(err)).await.is_ok()
    }
}

/// Creates a connected egress pair.
pub(crate) fn channel<T>(capacity: usize, stats: Arc<PipelineStats>) -> (EgressSender<T>, OutputReader<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EgressSender::new(tx, stats), OutputReader::new(rx))
}
