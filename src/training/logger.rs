//! Progress logging for long training runs.
//!
//! A run over tens of millions of examples takes hours; the logger
//! reports example counts, elapsed time and running loss per phase so a
//! human can monitor the job. All output goes through here, so a
//! [`Verbosity::Silent`] run prints nothing.

use std::time::Instant;

/// Output level for training progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// No output.
    Silent,
    /// Per-epoch and per-phase progress lines.
    #[default]
    Info,
}

/// Structured progress output for the training driver and CLI.
#[derive(Debug, Clone, Copy)]
pub struct TrainingLogger {
    verbosity: Verbosity,
}

impl TrainingLogger {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    fn enabled(&self) -> bool {
        self.verbosity >= Verbosity::Info
    }

    /// Start timing a phase; pair with one of the `*_done` methods.
    pub fn phase_start(&self) -> Instant {
        Instant::now()
    }

    pub fn epoch(&self, epoch: u32) {
        if self.enabled() {
            println!("Epoch {epoch}...");
        }
    }

    pub fn dataset_loaded(&self, name: &str, examples: usize) {
        if self.enabled() {
            println!("Loading {name}.index... {examples} examples");
        }
    }

    pub fn train_done(&self, started: Instant, examples: u64, loss: f64) {
        if self.enabled() {
            println!(
                "  Training... {examples} examples processed in {}s, loss = {loss:.5}",
                started.elapsed().as_secs()
            );
        }
    }

    pub fn eval_done(&self, started: Instant, examples: u64, loss: f64, map: f64) {
        if self.enabled() {
            println!(
                "  Evaluating... {examples} examples processed in {}s, loss = {loss:.5}, map = {map:.5}",
                started.elapsed().as_secs()
            );
        }
    }

    pub fn predict_done(&self, started: Instant, examples: u64) {
        if self.enabled() {
            println!(
                "  Predicting... {examples} examples processed in {}s",
                started.elapsed().as_secs()
            );
        }
    }

    pub fn finished(&self) {
        if self.enabled() {
            println!("Done.");
        }
    }
}
