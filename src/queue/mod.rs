//! Queue module - retry controller and staggered batch runner

pub mod batch;
pub mod retry;

pub use batch::{BatchConfig, BatchPlan, BatchReport, BatchRunner, BatchSink, BatchStatus, ImageFailure};
pub use retry::{RetryController, RetryPolicy, Sleeper, TokioSleeper};
