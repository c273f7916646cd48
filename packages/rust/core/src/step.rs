//! A single pipeline stage.
//!
//! A [`Step`] buffers incoming records in a FIFO queue, drops duplicates by
//! key, drains bounded batches from a scheduling loop and hands each batch to
//! its [`BatchProcessor`]. Whatever the processor emits is fanned out to every
//! attached [`Output`] in attach order.

use std::collections::{HashSet, VecDeque};
use std::hash::{BuildHasher, BuildHasherDefault, DefaultHasher, Hash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use etlflow_shared::{EtlError, Result, StepOptions};

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// A value that can flow through a pipeline.
///
/// Records are hashed for deduplication and cloned once per extra output
/// during fan-out.
pub trait Record: Clone + Eq + Hash + Send + Sync + 'static {}

impl<T> Record for T where T: Clone + Eq + Hash + Send + Sync + 'static {}

/// A fan-out target: another step's input or a terminal sink.
pub trait Output<R>: Send + Sync {
    /// Name used in logs and wiring checks.
    fn name(&self) -> &str;

    /// Accept one produced record.
    fn put(&self, record: R);
}

/// The batch operation a concrete step supplies.
#[async_trait]
pub trait BatchProcessor<R: Record>: Send + Sync + 'static {
    /// Transform one non-empty batch, emitting results as they are produced.
    ///
    /// Records emitted before an error is returned stay delivered.
    async fn process_batch(&self, batch: Vec<R>, out: &mut Emitter<R>) -> Result<()>;

    /// Batch size, dedup and concurrency settings for steps built on this
    /// processor, layered over `defaults`.
    fn options(&self, defaults: StepOptions) -> StepOptions {
        defaults
    }

    /// Identity of a record for duplicate detection. Two records with the same
    /// key are duplicates. Defaults to a hash of the whole record.
    fn dedup_key(&self, record: &R) -> u64 {
        BuildHasherDefault::<DefaultHasher>::default().hash_one(record)
    }
}

/// Delivers records produced by a batch to every attached output.
pub struct Emitter<R> {
    outputs: Vec<Arc<dyn Output<R>>>,
    emitted: usize,
}

impl<R: Record> Emitter<R> {
    /// Emitter over a fixed set of outputs.
    pub fn new(outputs: Vec<Arc<dyn Output<R>>>) -> Self {
        Self {
            outputs,
            emitted: 0,
        }
    }

    /// Push `record` to every output, in attach order.
    pub fn emit(&mut self, record: R) {
        if let Some((last, rest)) = self.outputs.split_last() {
            for output in rest {
                output.put(record.clone());
            }
            last.put(record);
        }
        self.emitted += 1;
    }

    /// Number of records emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Mutable state shared by `put`, the scheduling loop and batch tasks.
struct StepState<R> {
    queue: VecDeque<R>,
    /// Dedup keys of every record ever accepted. Never evicted.
    seen: HashSet<u64>,
    /// Batches drained but not yet finished.
    in_flight: usize,
    /// First failure raised by a batch task.
    failure: Option<Arc<EtlError>>,
}

/// One stage of a pipeline.
pub struct Step<R: Record> {
    name: String,
    options: StepOptions,
    processor: Arc<dyn BatchProcessor<R>>,
    state: Mutex<StepState<R>>,
    outputs: RwLock<Vec<Arc<dyn Output<R>>>>,
    running: AtomicBool,
    /// Wakes the scheduling loop (enqueue, batch finished, stop).
    wake: Notify,
    /// Wakes joiners whenever a batch finishes.
    settled: Notify,
}

impl<R: Record> Step<R> {
    /// Create a step using the processor's own options.
    pub fn new(name: impl Into<String>, processor: impl BatchProcessor<R>) -> Arc<Self> {
        Self::with_defaults(name, processor, StepOptions::default())
    }

    /// Create a step whose processor layers its options over `defaults`.
    pub fn with_defaults(
        name: impl Into<String>,
        processor: impl BatchProcessor<R>,
        defaults: StepOptions,
    ) -> Arc<Self> {
        let options = processor.options(defaults);
        Self::with_options(name, processor, options)
    }

    /// Create a step with explicit options, ignoring the processor's.
    pub fn with_options(
        name: impl Into<String>,
        processor: impl BatchProcessor<R>,
        options: StepOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            options,
            processor: Arc::new(processor),
            state: Mutex::new(StepState {
                queue: VecDeque::new(),
                seen: HashSet::new(),
                in_flight: 0,
                failure: None,
            }),
            outputs: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
            wake: Notify::new(),
            settled: Notify::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> StepOptions {
        self.options
    }

    /// Enqueue a record unless it is a duplicate and duplicates are dropped.
    pub fn put(&self, record: R) {
        let key = self
            .options
            .drop_duplicates
            .then(|| self.processor.dedup_key(&record));

        let mut state = self.lock();
        if key.is_some_and(|key| !state.seen.insert(key)) {
            debug!(step = %self.name, "dropping duplicate record");
            return;
        }
        state.queue.push_back(record);
        drop(state);
        self.wake.notify_one();
    }

    /// Register a fan-out target. Call order fixes delivery order.
    ///
    /// Outputs are read by batches dispatched after this call; wiring a
    /// running step is not supported.
    pub fn attach(&self, output: Arc<dyn Output<R>>) {
        if self.is_running() {
            warn!(step = %self.name, output = output.name(), "attaching output to a running step");
        }
        self.outputs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(output);
    }

    /// Currently attached outputs, in attach order.
    pub fn outputs(&self) -> Vec<Arc<dyn Output<R>>> {
        self.outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records waiting in the input queue.
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Batches dispatched and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the scheduling loop on the current tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EtlError::config(format!(
                "step '{}' is already running",
                self.name
            )));
        }

        info!(
            step = %self.name,
            max_batch_size = self.options.max_batch_size,
            drop_duplicates = self.options.drop_duplicates,
            concurrent_batches = self.options.concurrent_batches,
            "starting step"
        );

        let step = Arc::clone(self);
        Ok(tokio::spawn(async move { step.run_loop().await }))
    }

    /// Let the scheduling loop exit at its next tick. In-flight batches keep running.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(step = %self.name, "stopping step");
            self.wake.notify_one();
        }
    }

    /// `Ok(true)` when no batch is in flight and the queue is empty.
    ///
    /// Once any batch has failed, every call returns that failure.
    pub fn done(&self) -> Result<bool> {
        let state = self.lock();
        if let Some(failure) = &state.failure {
            return Err(EtlError::processing(&self.name, Arc::clone(failure)));
        }
        Ok(state.in_flight == 0 && state.queue.is_empty())
    }

    /// Wait until [`done`](Self::done) holds, or return the first batch failure.
    pub async fn join(&self) -> Result<()> {
        loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            if self.done()? {
                return Ok(());
            }
            settled.await;
        }
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    async fn run_loop(self: Arc<Self>) {
        while self.is_running() {
            if self.tick() {
                tokio::task::yield_now().await;
            } else {
                self.wake.notified().await;
            }
        }
        debug!(step = %self.name, "scheduling loop exited");
    }

    /// Dispatch at most one batch. Returns true if another one is ready right away.
    fn tick(self: &Arc<Self>) -> bool {
        let Some(batch) = self.take_batch() else {
            return false;
        };
        self.dispatch(batch);
        self.options.concurrent_batches && self.queued() > 0
    }

    /// Drain the next batch and count it in flight in the same critical section.
    fn take_batch(&self) -> Option<Vec<R>> {
        let mut state = self.lock();
        if state.queue.is_empty() {
            return None;
        }
        if !self.options.concurrent_batches && state.in_flight > 0 {
            return None;
        }

        let take = match self.options.max_batch_size {
            0 => state.queue.len(),
            max => max.min(state.queue.len()),
        };
        let batch: Vec<R> = state.queue.drain(..take).collect();
        state.in_flight += 1;
        Some(batch)
    }

    fn dispatch(self: &Arc<Self>, batch: Vec<R>) {
        debug!(step = %self.name, size = batch.len(), "dispatching batch");

        let mut emitter = Emitter::new(self.outputs());
        let mut guard = BatchGuard {
            step: Arc::clone(self),
            outcome: None,
        };

        tokio::spawn(async move {
            let processor = Arc::clone(&guard.step.processor);
            let outcome = processor.process_batch(batch, &mut emitter).await;
            debug!(
                step = %guard.step.name,
                emitted = emitter.emitted(),
                ok = outcome.is_ok(),
                "batch finished"
            );
            guard.settle(outcome);
        });
    }

    fn finish_batch(&self, failure: Option<EtlError>) {
        if let Some(err) = &failure {
            warn!(step = %self.name, error = %err, "batch failed");
        }

        {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            if let Some(err) = failure {
                state.failure.get_or_insert_with(|| Arc::new(err));
            }
        }

        self.wake.notify_one();
        self.settled.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, StepState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R: Record> Output<R> for Step<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, record: R) {
        Step::put(self, record);
    }
}

impl<R: Record> std::fmt::Debug for Step<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Settles a batch when its task ends, including by panic or cancellation.
struct BatchGuard<R: Record> {
    step: Arc<Step<R>>,
    outcome: Option<Result<()>>,
}

impl<R: Record> BatchGuard<R> {
    fn settle(&mut self, outcome: Result<()>) {
        self.outcome = Some(outcome);
    }
}

impl<R: Record> Drop for BatchGuard<R> {
    fn drop(&mut self) {
        let failure = match self.outcome.take() {
            Some(Ok(())) => None,
            Some(Err(err)) => Some(err),
            None => Some(EtlError::Task(format!(
                "batch task of step '{}' panicked or was cancelled",
                self.step.name
            ))),
        };
        self.step.finish_batch(failure);
    }
}
