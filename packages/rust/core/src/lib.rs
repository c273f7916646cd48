//! Asynchronous batch pipeline engine for etlflow.
//!
//! This crate provides:
//! - [`step`]: a single stage with its input queue, dedup cache, fan-out, scheduling loop
//! - [`pipeline`]: a linear chain of steps with seeding, supervision and results
//! - [`sink`]: the terminal collector exposed as pipeline results

pub mod pipeline;
pub mod sink;
pub mod step;

pub use pipeline::Pipeline;
pub use sink::ResultsSink;
pub use step::{BatchProcessor, Emitter, Output, Record, Step};

pub use etlflow_shared::{EtlError, Result, StepOptions};
