//! Training infrastructure: batching, dropout, metrics, and the driver.
//!
//! This module provides the pieces the training loop is assembled from:
//!
//! - [`generate_batches`] / [`split_range`]: contiguous batch covers
//! - [`DropoutMask`]: the per-example interaction dropout bitmask
//! - [`mean_average_precision`]: the MAP@12 ranking metric
//! - [`Trainer`]: the batched, multi-threaded train/evaluate/predict
//!   driver with lock-free shared weights
//! - [`TrainingLogger`]: progress reporting with verbosity levels

mod batches;
mod driver;
mod dropout;
mod logger;
mod metric;

pub use batches::{generate_batches, split_range};
pub use driver::{EvalReport, TrainError, TrainParams, Trainer};
pub use dropout::{dropout_multiplier, DropoutMask};
pub use logger::{TrainingLogger, Verbosity};
pub use metric::{mean_average_precision, MetricError, MAP_CUTOFF};
