//! Batched, multi-threaded training and evaluation driver.
//!
//! An epoch partitions the dataset into contiguous batches, shuffles
//! their order, and processes them in parallel on a rayon pool. Each
//! batch worker reads its whole feature-record range with one positioned
//! read, then walks shuffled mini-batches sequentially: fresh dropout
//! mask, `predict`, loss gradient, `update` per example and model.
//!
//! The model weights are shared across workers **without locks or
//! atomics**. Concurrent batches may interleave read-modify-write cycles
//! on the same coordinates; this lock-free asynchronous SGD tolerates
//! the races, and exact numerical results are therefore run-order and
//! thread-count dependent. Keep it that way: serializing access to a
//! high-cardinality sparse weight table would dominate the runtime.

use std::ops::Range;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::data::{DataError, Dataset, DatasetIndex, Feature};
use crate::model::{Model, ModelKind};

use super::batches::{generate_batches, split_range};
use super::dropout::{dropout_multiplier, DropoutMask};
use super::logger::{TrainingLogger, Verbosity};
use super::metric::{mean_average_precision, MetricError};

/// Parameters for a training run.
///
/// Use struct construction with `..Default::default()` for convenient
/// configuration.
#[derive(Debug, Clone)]
pub struct TrainParams {
    /// Passes over the training set.
    pub epochs: u32,
    /// Worker threads; `0` uses rayon's global pool, `1` runs
    /// sequentially (and reproducibly), `n > 1` builds a dedicated pool.
    pub threads: usize,
    /// Examples per batch (one positioned read each).
    pub batch_size: usize,
    /// Examples per mini-batch (the shuffling granularity inside a
    /// batch).
    pub mini_batch_size: usize,
    /// Binary log of the interaction drop probability; `1` drops 50%,
    /// `0` disables dropout.
    pub dropout_prob_log: u32,
    /// Seed for batch shuffles and dropout masks.
    pub seed: u64,
    /// Progress output level.
    pub verbosity: Verbosity,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            epochs: 10,
            threads: 4,
            batch_size: 10_000,
            mini_batch_size: 32,
            dropout_prob_log: 1,
            seed: 2017,
            verbosity: Verbosity::default(),
        }
    }
}

/// Loss and ranking metric of one evaluation pass.
#[derive(Debug, Clone, Copy)]
pub struct EvalReport {
    /// Mean log-loss of the (ensemble-averaged) predictions.
    pub loss: f64,
    /// MAP@12 over the dataset's ranking groups.
    pub map: f64,
}

/// Errors that abort a training run.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Metric(#[from] MetricError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw-pointer wrapper sharing the model slice across batch workers.
///
/// # Safety
///
/// This is the hogwild contract: every worker reads and writes the same
/// weight tables with no synchronization, and the races are tolerated by
/// the learning algorithm. Callers must not touch the slice through any
/// other path while workers run.
#[derive(Clone, Copy)]
struct SharedModels(*mut ModelKind, usize);

unsafe impl Send for SharedModels {}
unsafe impl Sync for SharedModels {}

impl SharedModels {
    fn new(models: &mut [ModelKind]) -> Self {
        Self(models.as_mut_ptr(), models.len())
    }

    /// SAFETY: see the type-level contract; updates race by design.
    #[allow(clippy::mut_from_ref)]
    unsafe fn get(&self) -> &mut [ModelKind] {
        std::slice::from_raw_parts_mut(self.0, self.1)
    }
}

/// Drives training, evaluation and prediction over opened datasets.
pub struct Trainer {
    params: TrainParams,
    logger: TrainingLogger,
}

impl Trainer {
    pub fn new(params: TrainParams) -> Self {
        let logger = TrainingLogger::new(params.verbosity);
        Self { params, logger }
    }

    pub fn params(&self) -> &TrainParams {
        &self.params
    }

    pub fn logger(&self) -> &TrainingLogger {
        &self.logger
    }

    /// Run `task` on the configured thread pool.
    fn install<R: Send>(&self, task: impl FnOnce() -> R + Send) -> R {
        match self.params.threads {
            0 => task(),
            n => ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .expect("failed to create thread pool")
                .install(task),
        }
    }

    /// One training pass over the dataset; returns the mean log-loss
    /// observed during the pass (across all ensemble members).
    pub fn train_epoch(
        &self,
        models: &mut [ModelKind],
        dataset: &Dataset,
        epoch: u32,
    ) -> Result<f64, TrainError> {
        let started = self.logger.phase_start();

        let mut batches = generate_batches(dataset.len(), self.params.batch_size);
        let mut rng =
            Xoshiro256PlusPlus::seed_from_u64(self.params.seed ^ ((epoch as u64) << 32));
        batches.shuffle(&mut rng);

        let n_models = models.len() as u64;
        let shared = SharedModels::new(models);

        let totals: Result<Vec<(f64, u64)>, DataError> = self.install(|| {
            batches
                .par_iter()
                .map(|batch| {
                    // SAFETY: hogwild weight sharing (see SharedModels).
                    let models = unsafe { shared.get() };
                    self.train_batch(models, dataset, batch.clone(), epoch)
                })
                .collect()
        });

        let mut loss = 0.0f64;
        let mut count = 0u64;
        for (batch_loss, batch_count) in totals? {
            loss += batch_loss;
            count += batch_count;
        }

        let mean = if count == 0 {
            0.0
        } else {
            loss / (count * n_models) as f64
        };
        self.logger.train_done(started, count, mean);
        Ok(mean)
    }

    /// Score a labeled dataset: ensemble log-loss plus MAP@12.
    pub fn evaluate(
        &self,
        models: &[ModelKind],
        dataset: &Dataset,
    ) -> Result<EvalReport, TrainError> {
        let started = self.logger.phase_start();
        let (predictions, loss) = self.score(models, dataset)?;
        let map = mean_average_precision(&dataset.index, &predictions)?;
        self.logger
            .eval_done(started, dataset.len() as u64, loss, map);
        Ok(EvalReport { loss, map })
    }

    /// Sigmoid-transformed ensemble predictions in input example order.
    pub fn predict(
        &self,
        models: &[ModelKind],
        dataset: &Dataset,
    ) -> Result<Vec<f32>, TrainError> {
        let started = self.logger.phase_start();
        let (predictions, _) = self.score(models, dataset)?;
        self.logger.predict_done(started, dataset.len() as u64);
        Ok(predictions)
    }

    fn train_batch(
        &self,
        models: &mut [ModelKind],
        dataset: &Dataset,
        batch: Range<usize>,
        epoch: u32,
    ) -> Result<(f64, u64), DataError> {
        let index = &dataset.index;
        let batch_start_offset = index.offsets[batch.start];
        let features = dataset.read_batch(batch_start_offset, index.offsets[batch.end])?;

        // Worker-local RNG derived from (seed, epoch, batch position):
        // single-threaded runs are reproducible end to end.
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(
            self.params.seed ^ ((epoch as u64) << 40) ^ batch.start as u64,
        );

        let mut mini_batches = split_range(batch.clone(), self.params.mini_batch_size);
        mini_batches.shuffle(&mut rng);

        let prob_log = self.params.dropout_prob_log;
        let mult = dropout_multiplier(prob_log);
        let mut mask = DropoutMask::new();

        let mut loss = 0.0f64;

        for mini_batch in &mini_batches {
            for example in mini_batch.clone() {
                let y = index.labels[example];
                let norm = index.norms[example];
                let records = example_records(&features, index, example, batch_start_offset);

                for model in models.iter_mut() {
                    mask.fill_random(model.dropout_mask_bits(records.len()), prob_log, &mut rng);

                    let t = model.predict(records, norm, &mask, mult);
                    let expnyt = (-(y as f64) * t as f64).exp();
                    loss += expnyt.ln_1p();

                    let kappa = (-(y as f64) * expnyt / (1.0 + expnyt)) as f32;
                    model.update(records, norm, kappa, &mask, mult);
                }
            }
        }

        Ok((loss, batch.len() as u64))
    }

    /// Unshuffled scoring pass shared by `evaluate` and `predict`: no
    /// updates, all-ones masks, dropout multiplier 1. Batch outputs are
    /// stitched back in input order.
    fn score(
        &self,
        models: &[ModelKind],
        dataset: &Dataset,
    ) -> Result<(Vec<f32>, f64), DataError> {
        debug_assert!(!models.is_empty());
        let batches = generate_batches(dataset.len(), self.params.batch_size);

        let results: Result<Vec<(Vec<f32>, f64)>, DataError> = self.install(|| {
            batches
                .par_iter()
                .map(|batch| self.score_batch(models, dataset, batch.clone()))
                .collect()
        });

        let mut predictions = Vec::with_capacity(dataset.len());
        let mut loss = 0.0f64;
        for (batch_predictions, batch_loss) in results? {
            predictions.extend_from_slice(&batch_predictions);
            loss += batch_loss;
        }

        let mean = if predictions.is_empty() {
            0.0
        } else {
            loss / predictions.len() as f64
        };
        Ok((predictions, mean))
    }

    fn score_batch(
        &self,
        models: &[ModelKind],
        dataset: &Dataset,
        batch: Range<usize>,
    ) -> Result<(Vec<f32>, f64), DataError> {
        let index = &dataset.index;
        let batch_start_offset = index.offsets[batch.start];
        let features = dataset.read_batch(batch_start_offset, index.offsets[batch.end])?;

        let mut mask = DropoutMask::new();
        let mut predictions = Vec::with_capacity(batch.len());
        let mut loss = 0.0f64;

        for example in batch.clone() {
            let y = index.labels[example];
            let norm = index.norms[example];
            let records = example_records(&features, index, example, batch_start_offset);

            let mut p = 0.0f64;
            for model in models {
                mask.fill_ones(model.dropout_mask_bits(records.len()));
                let t = model.predict(records, norm, &mask, 1.0);
                p += sigmoid(t as f64);
            }
            p /= models.len() as f64;

            loss += if y > 0.0 {
                -p.max(f64::MIN_POSITIVE).ln()
            } else {
                -(1.0 - p).max(f64::MIN_POSITIVE).ln()
            };

            predictions.push(p as f32);
        }

        Ok((predictions, loss))
    }
}

#[inline]
fn sigmoid(t: f64) -> f64 {
    1.0 / (1.0 + (-t).exp())
}

/// Slice one example's records out of its batch's feature buffer.
#[inline]
fn example_records<'a>(
    features: &'a [Feature],
    index: &DatasetIndex,
    example: usize,
    batch_start_offset: u64,
) -> &'a [Feature] {
    let (from, to) = index.example_range(example);
    &features[(from - batch_start_offset) as usize..(to - batch_start_offset) as usize]
}
