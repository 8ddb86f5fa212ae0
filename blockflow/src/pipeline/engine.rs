//! The pipeline engine.

use super::output::{self, OutputReader};
use super::reorder::{run_reorder, ReorderBuffer};
use super::runtime::{FailureRecord, RunContext};
use super::{PipelineOptions, PipelineStats};
use crate::cancellation::{CancellationToken, DisposeReport, ResourceRegistry};
use crate::envelope::{Payload, Sequencer};
use crate::errors::{ConfigurationError, PipelineError, Result};
use crate::events::{kinds, EventSink, NoOpEventSink, PipelineEvent};
use crate::observability::SpanTimer;
use crate::plugins::{Plugin, PluginRegistry};
use crate::stages::worker::{Downstream, Slot, StageRuntime};
use crate::stages::StageConfig;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, OnceCell};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Stages and plugins may be added.
    Configuring,
    /// The stage graph is running and accepts writes.
    Built,
    /// Input is closed; stages are finishing.
    Draining,
    /// Every stage has finished.
    Completed,
    /// Torn down. Terminal.
    Disposed,
}

/// A chain of stages connected by bounded channels.
///
/// Configure with [`add_stage`](Self::add_stage),
/// [`branch_if`](Self::branch_if) and [`use_plugin`](Self::use_plugin), then
/// [`build`](Self::build) to start the workers and obtain the output. Feed
/// items with [`write`](Self::write) and close input with
/// [`complete`](Self::complete). Read the output concurrently with writing:
/// a full output channel stalls the stages behind it.
///
/// ```
/// use blockflow::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() -> blockflow::Result<()> {
/// let mut pipeline = Pipeline::ordered(None);
/// pipeline.add_stage(StageConfig::map(|v: i32| v * 2).with_concurrency(4))?;
/// let output = pipeline.build()?;
///
/// let token = CancellationToken::new();
/// for v in 1..=3 {
///     pipeline.write(v, &token).await?;
/// }
/// pipeline.complete().await?;
///
/// assert_eq!(output.collect_all().await?, vec![2, 4, 6]);
/// pipeline.dispose().await;
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<T> {
    options: PipelineOptions,
    run_id: Uuid,
    stages: Vec<StageConfig<T>>,
    plugins: PluginRegistry,
    resources: ResourceRegistry,
    sink: Arc<dyn EventSink>,
    stats: Arc<PipelineStats>,
    sequencer: Sequencer,
    state: Mutex<PipelineState>,
    run: Option<Arc<RunContext>>,
    ingress: RwLock<Option<mpsc::Sender<Slot<T>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    abort_handles: Mutex<Vec<AbortHandle>>,
    completion: OnceCell<Result<()>>,
}

impl<T: Payload> Pipeline<T> {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            options,
            run_id: Uuid::new_v4(),
            stages: Vec::new(),
            plugins: PluginRegistry::new(),
            resources: ResourceRegistry::new(),
            sink: Arc::new(NoOpEventSink),
            stats: Arc::new(PipelineStats::default()),
            sequencer: Sequencer::new(),
            state: Mutex::new(PipelineState::Configuring),
            run: None,
            ingress: RwLock::new(None),
            tasks: Mutex::new(Vec::new()),
            abort_handles: Mutex::new(Vec::new()),
            completion: OnceCell::new(),
        }
    }

    /// Creates a pipeline that emits results in input order, holding at most
    /// `max_buffer` early results (`None` for no bound).
    #[must_use]
    pub fn ordered(max_buffer: Option<usize>) -> Self {
        Self::new(PipelineOptions::default().with_order(max_buffer))
    }

    /// Sends pipeline events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Appends a stage.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Configuration`] for an invalid stage,
    /// [`PipelineError::AlreadyBuilt`] after `build`, and
    /// [`PipelineError::Disposed`] after `dispose`.
    pub fn add_stage(&mut self, config: StageConfig<T>) -> Result<&mut Self> {
        self.ensure_configuring()?;
        let position = self.stages.len();
        config.validate().map_err(|e| match e.stage {
            Some(_) => e,
            None => e.with_stage(default_stage_name(position)),
        })?;

        debug!(
            pipeline = %self.options.name,
            stage = config.name().unwrap_or_default(),
            position,
            concurrency = config.concurrency(),
            modifiers = ?config.modifier_names(),
            "Stage added"
        );
        self.stages.push(config);
        Ok(self)
    }

    /// Appends a stage that routes each value through `when_true` if
    /// `predicate` holds, else through `when_false` (or unchanged).
    ///
    /// See [`StageConfig::branch`] for how the two configurations merge.
    ///
    /// # Errors
    ///
    /// As [`add_stage`](Self::add_stage), plus a configuration error when an
    /// arm is itself a branch.
    pub fn branch_if<P>(
        &mut self,
        predicate: P,
        when_true: StageConfig<T>,
        when_false: Option<StageConfig<T>>,
    ) -> Result<&mut Self>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.ensure_configuring()?;
        let merged = StageConfig::branch(predicate, when_true, when_false)?;
        self.add_stage(merged)
    }

    /// Attaches a plugin.
    ///
    /// Its attach hook runs immediately; its dispose hook is registered to
    /// run once when the pipeline is disposed.
    ///
    /// # Errors
    ///
    /// A configuration error if a plugin of the same type is attached or the
    /// attach hook rejects it; `AlreadyBuilt` or `Disposed` as for stages.
    pub fn use_plugin<P: Plugin>(&mut self, plugin: P) -> Result<&mut Self> {
        self.ensure_configuring()?;
        let plugin = Arc::new(plugin);
        self.plugins.insert(plugin.clone())?;

        if let Err(e) = plugin.on_attach(&self.plugins) {
            self.plugins.remove::<P>();
            return Err(e.into());
        }

        let name = plugin.name().to_string();
        let hook = plugin.clone();
        self.resources.register(format!("plugin:{name}"), move || async move {
            hook.on_dispose().await;
        });
        info!(pipeline = %self.options.name, plugin = %name, "Plugin attached");
        Ok(self)
    }

    /// Returns the attached plugin of type `P`.
    #[must_use]
    pub fn plugin<P: Plugin>(&self) -> Option<Arc<P>> {
        self.plugins.get::<P>()
    }

    /// Returns the plugin registry.
    #[must_use]
    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Registers a hook to run once when the pipeline is disposed.
    ///
    /// Hooks run last-registered first.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Disposed`] if the pipeline is already disposed.
    pub fn register_resource<F, Fut>(&self, name: impl Into<String>, hook: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.state() == PipelineState::Disposed || !self.resources.register(name, hook) {
            return Err(PipelineError::Disposed);
        }
        Ok(())
    }

    /// Freezes the stage graph, starts every worker and returns the output.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// A configuration error for an empty pipeline or invalid options;
    /// `AlreadyBuilt` on a second call; `Disposed` after `dispose`.
    pub fn build(&mut self) -> Result<OutputReader<T>> {
        self.ensure_configuring()?;
        if self.stages.is_empty() {
            return Err(ConfigurationError::new("pipeline has no stages").into());
        }
        self.options.validate()?;

        let run = Arc::new(RunContext::new(
            self.options.name.clone(),
            self.run_id,
            self.options.preserve_order,
            self.stats.clone(),
            self.sink.clone(),
        ));
        let (egress, reader) = output::channel(self.options.output_capacity, self.stats.clone());
        let mut tasks = Vec::new();

        let last: Downstream<T> = if self.options.preserve_order {
            let (tx, rx) = mpsc::channel(self.options.output_capacity);
            let buffer = ReorderBuffer::new(self.options.reorder_max_buffer);
            tasks.push(tokio::spawn(run_reorder(rx, buffer, egress, run.clone())));
            Downstream::Stage(tx)
        } else {
            Downstream::Egress(egress)
        };

        let stages = std::mem::take(&mut self.stages);
        let stage_count = stages.len();
        let (senders, receivers): (Vec<_>, Vec<_>) = stages
            .iter()
            .map(|config| {
                mpsc::channel(
                    config
                        .channel_capacity()
                        .unwrap_or(self.options.default_channel_capacity),
                )
            })
            .unzip();

        for (position, (config, input)) in stages.into_iter().zip(receivers).enumerate() {
            let name = config
                .name()
                .map_or_else(|| default_stage_name(position), str::to_string);
            let downstream = match senders.get(position + 1) {
                Some(next) => Downstream::Stage(next.clone()),
                None => last.clone(),
            };
            let stage = Arc::new(StageRuntime::new(name, config, run.clone()));
            debug!(pipeline = %self.options.name, stage = stage.name(), position, "Starting stage workers");
            tasks.extend(stage.spawn(input, downstream));
        }

        *self.abort_handles.lock() = tasks.iter().map(JoinHandle::abort_handle).collect();
        *self.tasks.lock() = tasks;
        *self.ingress.write() = senders.into_iter().next();
        *self.state.lock() = PipelineState::Built;

        run.emit(
            kinds::PIPELINE_BUILT,
            json!({
                "stages": stage_count,
                "preserve_order": self.options.preserve_order,
                "reorder_max_buffer": self.options.reorder_max_buffer,
            }),
        );
        info!(
            pipeline = %self.options.name,
            run_id = %self.run_id,
            stages = stage_count,
            preserve_order = self.options.preserve_order,
            "Pipeline built"
        );
        self.run = Some(run);
        Ok(reader)
    }

    /// Pushes a value into the first stage, waiting for channel capacity.
    ///
    /// The value's sequence index is assigned once capacity is granted, so a
    /// write abandoned through `cancel` consumes no index. `cancel` only
    /// abandons the wait; it does not affect the pipeline.
    ///
    /// # Errors
    ///
    /// `NotBuilt` before `build`, `InputClosed` after `complete`, `Disposed`
    /// after `dispose`, and `Cancelled` if `cancel` fires first.
    pub async fn write(&self, value: T, cancel: &CancellationToken) -> Result<()> {
        let sender = self.ingress_sender()?;

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(PipelineError::Cancelled(cancel.reason().unwrap_or_default()));
            }
            permit = sender.reserve() => permit.map_err(|_| self.closed_error())?,
        };

        let envelope = self.sequencer.wrap(value);
        permit.send(Slot::Item(envelope));
        self.stats.record_written();
        Ok(())
    }

    /// Closes input and waits for every stage to drain.
    ///
    /// Idempotent: every call, concurrent or later, observes the same
    /// outcome.
    ///
    /// # Errors
    ///
    /// The first unhandled stage failure (or reorder overflow); `NotBuilt`
    /// before `build`; `Disposed` if disposal interrupted the drain.
    pub async fn complete(&self) -> Result<()> {
        match self.state() {
            PipelineState::Configuring => return Err(PipelineError::NotBuilt),
            PipelineState::Disposed if !self.completion.initialized() => {
                return Err(PipelineError::Disposed);
            }
            _ => {}
        }
        self.completion.get_or_init(|| self.drain()).await.clone()
    }

    /// Tears the pipeline down: aborts workers, closes channels and runs
    /// every disposal hook once.
    ///
    /// A second call does nothing and returns an empty report.
    pub async fn dispose(&self) -> DisposeReport {
        {
            let mut state = self.state.lock();
            if *state == PipelineState::Disposed {
                return DisposeReport::default();
            }
            *state = PipelineState::Disposed;
        }

        self.ingress.write().take();
        for handle in self.abort_handles.lock().drain(..) {
            handle.abort();
        }

        let report = self.resources.dispose_all(self.options.dispose_timeout()).await;
        if !report.failed.is_empty() {
            warn!(
                pipeline = %self.options.name,
                failed = ?report.failed,
                "Some resources did not dispose cleanly"
            );
        }

        self.sink
            .emit(self.event(
                kinds::PIPELINE_DISPOSED,
                json!({
                    "resources_completed": report.completed,
                    "resources_failed": report.failed.len(),
                }),
            ))
            .await;
        info!(pipeline = %self.options.name, run_id = %self.run_id, resources = report.notified(), "Pipeline disposed");
        report
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.options.name
    }

    /// Returns the id of this pipeline instance.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the options.
    #[must_use]
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Returns the item counters.
    #[must_use]
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Returns every item failure recorded so far.
    #[must_use]
    pub fn failures(&self) -> Vec<FailureRecord> {
        self.run.as_ref().map(|run| run.failures()).unwrap_or_default()
    }

    fn ensure_configuring(&self) -> Result<()> {
        match self.state() {
            PipelineState::Configuring => Ok(()),
            PipelineState::Disposed => Err(PipelineError::Disposed),
            _ => Err(PipelineError::AlreadyBuilt),
        }
    }

    fn ingress_sender(&self) -> Result<mpsc::Sender<Slot<T>>> {
        match self.state() {
            PipelineState::Configuring => Err(PipelineError::NotBuilt),
            PipelineState::Disposed => Err(PipelineError::Disposed),
            PipelineState::Draining | PipelineState::Completed => Err(PipelineError::InputClosed),
            PipelineState::Built => self.ingress.read().clone().ok_or(PipelineError::InputClosed),
        }
    }

    fn closed_error(&self) -> PipelineError {
        if self.state() == PipelineState::Disposed {
            PipelineError::Disposed
        } else {
            PipelineError::InputClosed
        }
    }

    fn event(&self, kind: &str, data: serde_json::Value) -> PipelineEvent {
        PipelineEvent::new(kind, self.options.name.clone(), self.run_id.to_string(), data)
    }

    async fn drain(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                PipelineState::Configuring => return Err(PipelineError::NotBuilt),
                PipelineState::Disposed => return Err(PipelineError::Disposed),
                _ => *state = PipelineState::Draining,
            }
        }
        let Some(run) = self.run.clone() else {
            return Err(PipelineError::NotBuilt);
        };

        info!(pipeline = %self.options.name, run_id = %self.run_id, "Draining pipeline");
        let timer = SpanTimer::start("drain");
        self.ingress.write().take();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        let mut interrupted = false;
        for task in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    run.record_fault(PipelineError::Internal(format!("stage worker panicked: {e}")));
                } else {
                    interrupted = true;
                }
            }
        }

        {
            let mut state = self.state.lock();
            if interrupted || *state == PipelineState::Disposed {
                return Err(PipelineError::Disposed);
            }
            *state = PipelineState::Completed;
        }

        let outcome = run.fault();
        self.sink
            .emit(run.event(
                kinds::PIPELINE_COMPLETED,
                json!({
                    "stats": self.stats.to_dict(),
                    "duration_ms": timer.elapsed_ms(),
                    "error": outcome.as_ref().map(ToString::to_string),
                }),
            ))
            .await;
        info!(
            pipeline = %self.options.name,
            run_id = %self.run_id,
            duration_ms = timer.elapsed_ms(),
            emitted = self.stats.emitted(),
            failed = outcome.is_some(),
            "Pipeline completed"
        );

        outcome.map_or(Ok(()), Err)
    }
}

impl<T: Payload> Default for Pipeline<T> {
    fn default() -> Self {
        Self::new(PipelineOptions::default())
    }
}

impl<T> Drop for Pipeline<T> {
    fn drop(&mut self) {
        for handle in self.abort_handles.get_mut().drain(..) {
            handle.abort();
        }
    }
}

impl<T> std::fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.options.name)
            .field("run_id", &self.run_id)
            .field("state", &*self.state.lock())
            .field("stages", &self.stages.len())
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

fn default_stage_name(position: usize) -> String {
    format!("stage-{position}")
}
