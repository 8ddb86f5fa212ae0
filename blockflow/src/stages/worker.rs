//! Stage worker pool.
//!
//! Each stage runs `concurrency` workers sharing one input receiver. A
//! worker takes the next slot, runs the composed handler, and forwards the
//! result downstream. The channel is the only coordination between workers.

use super::StageConfig;
use crate::cancellation::CancellationToken;
use crate::context::{Branch, CallContext};
use crate::envelope::{Envelope, Payload};
use crate::errors::{PipelineError, ProcessingError};
use crate::events::kinds;
use crate::modifiers::Handler;
use crate::pipeline::runtime::{FailureRecord, RunContext};
use crate::pipeline::EgressSender;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What travels between stages.
///
/// `Skipped` stands in for an item that will never arrive (dropped, or
/// failed and handled), so an ordered pipeline does not wait for it.
#[derive(Debug)]
pub(crate) enum Slot<T> {
    Item(Envelope<T>),
    Skipped(u64),
}

/// Where a stage sends its results.
pub(crate) enum Downstream<T> {
    /// The next stage's input, or the reorder stage's.
    Stage(mpsc::Sender<Slot<T>>),
    /// The output channel.
    Egress(EgressSender<T>),
}

impl<T> Clone for Downstream<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Stage(tx) => Self::Stage(tx.clone()),
            Self::Egress(tx) => Self::Egress(tx.clone()),
        }
    }
}

impl<T: Payload> Downstream<T> {
    async fn send(&self, env: Envelope<T>) -> bool {
        match self {
            Self::Stage(tx) => tx.send(Slot::Item(env)).await.is_ok(),
            Self::Egress(tx) => tx.send_value(env.into_value()).await,
        }
    }

    async fn skip(&self, index: u64) {
        if let Self::Stage(tx) = self {
            // A closed channel means the pipeline is being torn down.
            let _ = tx.send(Slot::Skipped(index)).await;
        }
    }
}

type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<Slot<T>>>>;

/// A configured stage bound to one pipeline run.
pub(crate) struct StageRuntime<T> {
    name: String,
    config: StageConfig<T>,
    handler: Handler<T>,
    cancel: CancellationToken,
    run: Arc<RunContext>,
}

impl<T: Payload> StageRuntime<T> {
    pub(crate) fn new(name: String, config: StageConfig<T>, run: Arc<RunContext>) -> Self {
        let handler = config.handler();
        let cancel = config.cancel_token.clone().unwrap_or_default();
        Self {
            name,
            config,
            handler,
            cancel,
            run,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Spawns the stage's workers on the current runtime.
    pub(crate) fn spawn(
        self: Arc<Self>,
        input: mpsc::Receiver<Slot<T>>,
        downstream: Downstream<T>,
    ) -> Vec<JoinHandle<()>> {
        let input: SharedReceiver<T> = Arc::new(Mutex::new(input));
        (0..self.config.concurrency)
            .map(|worker| {
                let stage = self.clone();
                let input = input.clone();
                let downstream = downstream.clone();
                tokio::spawn(async move { stage.run_worker(worker, input, downstream).await })
            })
            .collect()
    }

    async fn run_worker(&self, worker: usize, input: SharedReceiver<T>, downstream: Downstream<T>) {
        debug!(pipeline = %self.run.pipeline, stage = %self.name, worker, "Worker started");
        loop {
            let slot = input.lock().await.recv().await;
            match slot {
                Some(Slot::Item(env)) => self.process(env, &downstream).await,
                Some(Slot::Skipped(index)) => self.forward_skip(index, &downstream).await,
                None => break,
            }
        }
        debug!(pipeline = %self.run.pipeline, stage = %self.name, worker, "Worker finished");
    }

    async fn process(&self, env: Envelope<T>, downstream: &Downstream<T>) {
        let index = env.index();

        if self.run.is_faulted() {
            self.run.stats.record_discarded();
            self.forward_skip(index, downstream).await;
            return;
        }

        if self.cancel.is_cancelled() {
            debug!(
                pipeline = %self.run.pipeline,
                stage = %self.name,
                index,
                "Stage cancelled, dropping item"
            );
            self.run.stats.record_dropped();
            self.run.emit(
                kinds::ITEM_DROPPED,
                json!({ "stage": self.name, "index": index }),
            );
            self.forward_skip(index, downstream).await;
            return;
        }

        let branch = self.config.route(env.value());
        let ctx = CallContext::new(self.cancel.clone()).with_branch(branch);
        let call = (self.handler)(env, ctx);

        let result = tokio::select! {
            biased;
            result = call => result,
            () = self.cancel.cancelled() => Err(ProcessingError::cancelled(
                self.cancel.reason().unwrap_or_default(),
            )),
        };

        match result {
            Ok(out) => {
                if !downstream.send(out).await {
                    debug!(stage = %self.name, index, "Downstream closed, item discarded");
                }
            }
            Err(error) => {
                self.fail(index, branch, error);
                self.forward_skip(index, downstream).await;
            }
        }
    }

    fn fail(&self, index: u64, branch: Option<Branch>, error: ProcessingError) {
        if let Some(callback) = self.config.error_callback(branch) {
            warn!(
                pipeline = %self.run.pipeline,
                stage = %self.name,
                index,
                kind = error.kind(),
                error = %error,
                "Item failed, handled by error callback"
            );
            callback(&error);
            self.run.stats.record_failed();
            self.run
                .record_failure(FailureRecord::new(&self.name, index, &error, true));
            self.run.emit(
                kinds::ITEM_FAILED,
                json!({ "stage": self.name, "index": index, "kind": error.kind(), "error": error.to_string() }),
            );
            return;
        }

        self.run.stats.record_faulted();
        self.run
            .record_failure(FailureRecord::new(&self.name, index, &error, false));
        self.run.emit(
            kinds::STAGE_FAULT,
            json!({ "stage": self.name, "index": index, "kind": error.kind(), "error": error.to_string() }),
        );
        self.run.record_fault(PipelineError::Processing {
            stage: self.name.clone(),
            index,
            error,
        });
    }

    async fn forward_skip(&self, index: u64, downstream: &Downstream<T>) {
        if self.run.preserve_order {
            downstream.skip(index).await;
        }
    }
}
