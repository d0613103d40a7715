//! FTRL-Proximal linear model.
//!
//! No pairwise interactions: one hashed weight slot per feature index
//! plus an intercept at slot 0, each holding the `(z, n)` accumulator
//! pair of the FTRL-Proximal update. Weights are materialized lazily in
//! `predict` from the accumulators (L1 soft threshold) and cached in
//! per-thread scratch so the following `update` can reuse them; the
//! training driver always calls `update` directly after `predict` on the
//! same example and thread.

use std::cell::RefCell;

use crate::data::Feature;
use crate::training::DropoutMask;

use super::Model;

/// Configuration for [`FtrlModel`].
#[derive(Debug, Clone)]
pub struct FtrlParams {
    /// Binary log of the weight-slot count.
    pub n_bits: u32,
    /// Per-coordinate learning-rate scale.
    pub alpha: f32,
    /// Learning-rate offset.
    pub beta: f32,
    /// L1 regularization strength.
    pub l1: f32,
    /// L2 regularization strength.
    pub l2: f32,
}

impl Default for FtrlParams {
    fn default() -> Self {
        Self {
            n_bits: crate::data::HASH_BITS,
            alpha: 0.1,
            beta: 1.0,
            l1: 1.0,
            l2: 1.0,
        }
    }
}

#[derive(Default)]
struct FtrlScratch {
    indices: Vec<u32>,
    values: Vec<f32>,
    weights: Vec<f32>,
}

impl FtrlScratch {
    fn clear(&mut self) {
        self.indices.clear();
        self.values.clear();
        self.weights.clear();
    }

    fn push(&mut self, index: u32, value: f32) {
        self.indices.push(index);
        self.values.push(value);
        self.weights.push(0.0);
    }
}

thread_local! {
    static SCRATCH: RefCell<FtrlScratch> = RefCell::new(FtrlScratch::default());
}

/// Follow-the-regularized-leader proximal model.
pub struct FtrlModel {
    z: Vec<f32>,
    n: Vec<f32>,
    index_mask: u32,
    alpha: f32,
    beta: f32,
    l1: f32,
    l2: f32,
}

impl FtrlModel {
    pub fn new(params: &FtrlParams) -> Self {
        let n_weights = 1usize << params.n_bits;
        Self {
            z: vec![0.0; n_weights],
            n: vec![0.0; n_weights],
            index_mask: (n_weights - 1) as u32,
            alpha: params.alpha,
            beta: params.beta,
            l1: params.l1,
            l2: params.l2,
        }
    }

    /// Closed-form FTRL-Proximal weight for one slot.
    #[inline]
    fn weight(&self, slot: usize) -> f32 {
        let z = self.z[slot];
        if z.abs() <= self.l1 {
            0.0
        } else {
            (z.signum() * self.l1 - z) / ((self.beta + self.n[slot].sqrt()) / self.alpha + self.l2)
        }
    }
}

impl Model for FtrlModel {
    fn predict(
        &self,
        features: &[Feature],
        _norm: f32,
        _mask: &DropoutMask,
        _dropout_mult: f32,
    ) -> f32 {
        SCRATCH.with(|scratch| {
            let scratch = &mut *scratch.borrow_mut();
            scratch.clear();

            scratch.push(0, 1.0); // intercept
            for feature in features {
                scratch.push(feature.index & self.index_mask, feature.value);
            }

            let mut total = 0.0f32;
            for i in 0..scratch.indices.len() {
                let w = self.weight(scratch.indices[i] as usize);
                scratch.weights[i] = w;
                total += w * scratch.values[i];
            }
            total
        })
    }

    fn update(
        &mut self,
        _features: &[Feature],
        _norm: f32,
        kappa: f32,
        _mask: &DropoutMask,
        _dropout_mult: f32,
    ) {
        SCRATCH.with(|scratch| {
            let scratch = scratch.borrow();

            for i in 0..scratch.indices.len() {
                let slot = scratch.indices[i] as usize;
                let g = kappa * scratch.values[i];
                let n = self.n[slot];
                let sigma = ((n + g * g).sqrt() - n.sqrt()) / self.alpha;

                self.z[slot] += g - sigma * scratch.weights[i];
                self.n[slot] = n + g * g;
            }
        })
    }

    fn dropout_mask_bits(&self, _n_features: usize) -> usize {
        0
    }
}
