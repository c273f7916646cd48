//! Linear chain of steps: wiring, seeding, supervision and results.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use etlflow_shared::{EtlError, Result};

use crate::sink::ResultsSink;
use crate::step::{Record, Step};

/// An ordered chain of steps feeding a terminal results sink.
pub struct Pipeline<R: Record> {
    steps: Vec<Arc<Step<R>>>,
    initial_data: Vec<R>,
    results: Arc<ResultsSink<R>>,
    loops: Vec<JoinHandle<()>>,
    started: bool,
}

impl<R: Record> Pipeline<R> {
    /// Chain `steps` in the given order. An empty chain is accepted here and
    /// rejected by [`start`](Self::start).
    pub fn new(steps: impl IntoIterator<Item = Arc<Step<R>>>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            initial_data: Vec::new(),
            results: Arc::new(ResultsSink::default()),
            loops: Vec::new(),
            started: false,
        }
    }

    /// Records put into the first step on start.
    pub fn with_initial_data(mut self, records: impl IntoIterator<Item = R>) -> Self {
        self.initial_data.extend(records);
        self
    }

    pub fn steps(&self) -> &[Arc<Step<R>>] {
        &self.steps
    }

    /// Wire the chain, seed the first step and start every scheduling loop.
    ///
    /// A pipeline starts once. If a step refuses to start, the steps started
    /// by this call are stopped again.
    pub fn start(&mut self) -> Result<()> {
        let (Some(first), Some(last)) = (self.steps.first(), self.steps.last()) else {
            return Err(EtlError::config("No steps to start"));
        };
        if self.started {
            return Err(EtlError::config("pipeline already started"));
        }
        self.started = true;

        for pair in self.steps.windows(2) {
            pair[0].attach(pair[1].clone());
        }
        last.attach(self.results.clone());

        for record in self.initial_data.drain(..) {
            first.put(record);
        }

        info!(
            steps = self.steps.len(),
            seeded = first.queued(),
            "starting pipeline"
        );

        for (i, step) in self.steps.iter().enumerate() {
            match step.start() {
                Ok(handle) => self.loops.push(handle),
                Err(e) => {
                    warn!(step = step.name(), error = %e, "step failed to start");
                    for started in &self.steps[..i] {
                        started.stop();
                    }
                    self.loops.clear();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Wait for every step in chain order, then stop them all.
    ///
    /// Steps are stopped even when an earlier join fails; the first failure is
    /// returned.
    #[instrument(skip_all, fields(steps = self.steps.len()))]
    pub async fn join(&mut self) -> Result<()> {
        let outcome = self.join_steps().await;

        for step in &self.steps {
            step.stop();
        }
        for handle in self.loops.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "step loop ended abnormally");
            }
        }

        outcome
    }

    async fn join_steps(&self) -> Result<()> {
        for step in &self.steps {
            step.join().await?;
        }
        Ok(())
    }

    /// Start, join and return the terminal results.
    #[instrument(skip_all, fields(steps = self.steps.len()))]
    pub async fn run(&mut self) -> Result<Vec<R>> {
        let started = Instant::now();
        self.start()?;
        self.join().await?;

        let results = self.results();
        info!(
            results = results.len(),
            duration_ms = started.elapsed().as_millis(),
            "pipeline completed"
        );
        Ok(results)
    }

    /// Everything the last step has produced so far.
    pub fn results(&self) -> Vec<R> {
        self.results.snapshot()
    }

    /// True when every step is done; fails if any step has a failed batch.
    pub fn done(&self) -> Result<bool> {
        for step in &self.steps {
            if !step.done()? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl<R: Record> From<Arc<Step<R>>> for Pipeline<R> {
    fn from(step: Arc<Step<R>>) -> Self {
        Self::new([step])
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::step::{BatchProcessor, Emitter, Output};

    struct Echo;

    #[async_trait]
    impl BatchProcessor<u32> for Echo {
        async fn process_batch(&self, batch: Vec<u32>, out: &mut Emitter<u32>) -> Result<()> {
            for n in batch {
                out.emit(n);
            }
            Ok(())
        }
    }

    #[test]
    fn empty_pipeline_is_constructible() {
        let pipeline: Pipeline<u32> = Pipeline::new(Vec::new());
        assert!(pipeline.steps().is_empty());
        assert!(pipeline.results().is_empty());
        assert!(pipeline.done().unwrap());
    }

    #[tokio::test]
    async fn empty_pipeline_fails_to_start() {
        let mut pipeline: Pipeline<u32> = Pipeline::new(Vec::new());
        let err = pipeline.start().unwrap_err();
        assert!(matches!(err, EtlError::Config { .. }));
        assert_eq!(err.to_string(), "config error: No steps to start");
    }

    #[tokio::test]
    async fn single_step_pipeline_starts_its_step() {
        let step = Step::new("only", Echo);
        let mut pipeline = Pipeline::from(step.clone()).with_initial_data([4, 2]);

        pipeline.start().expect("start");
        assert!(step.is_running());

        pipeline.join().await.expect("join");
        assert!(!step.is_running());
        assert_eq!(pipeline.results(), vec![4, 2]);
    }

    #[tokio::test]
    async fn second_start_is_rejected_without_rewiring() {
        let steps = vec![Step::new("a", Echo), Step::new("b", Echo)];
        let mut pipeline = Pipeline::new(steps.clone());

        pipeline.start().expect("start");
        let err = pipeline.start().unwrap_err();
        assert!(matches!(err, EtlError::Config { .. }));
        assert_eq!(steps[0].outputs().len(), 1);
        assert_eq!(steps[1].outputs().len(), 1);

        steps[0].put(42);
        pipeline.join().await.expect("join");
        assert_eq!(pipeline.results(), vec![42]);
    }

    #[tokio::test]
    async fn failed_start_stops_steps_already_started() {
        let a = Step::new("a", Echo);
        let b = Step::new("b", Echo);
        let elsewhere = b.start().expect("start b on its own");

        let mut pipeline = Pipeline::new([a.clone(), b.clone()]);
        let err = pipeline.run().await.unwrap_err();
        assert_eq!(err.to_string(), "config error: step 'b' is already running");
        assert!(!a.is_running());
        assert!(b.is_running(), "a step started by its owner is left alone");

        b.stop();
        elsewhere.await.expect("loop task");
    }

    #[tokio::test]
    async fn wiring_is_one_hop() {
        let steps = vec![
            Step::new("a", Echo),
            Step::new("b", Echo),
            Step::new("c", Echo),
        ];
        let mut pipeline = Pipeline::new(steps.clone());
        pipeline.start().expect("start");

        for (i, step) in steps.iter().enumerate() {
            let outputs = step.outputs();
            assert_eq!(outputs.len(), 1, "step {i} should have exactly one output");
            match steps.get(i + 1) {
                Some(next) => assert!(std::ptr::addr_eq(
                    Arc::as_ptr(&outputs[0]),
                    Arc::as_ptr(next)
                )),
                None => assert_eq!(outputs[0].name(), "results"),
            }
        }

        pipeline.join().await.expect("join");
    }
}
