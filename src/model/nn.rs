//! Plain feed-forward network over hashed per-feature embeddings.
//!
//! Each feature index owns an embedding row of the input-layer width;
//! an example's layer-0 activation is the value-weighted mean of its
//! rows, followed by three ReLU layers down to a scalar score. Every
//! weight carries its own AdaGrad accumulator, updated through the fused
//! backward pass in [`super::math`]. Slot 0 of each layer is a constant
//! bias unit.

use std::cell::RefCell;

use rand::distributions::Uniform;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use rand_xoshiro::Xoshiro256PlusPlus;
use wide::f32x8;

use crate::data::Feature;
use crate::training::DropoutMask;

use super::math::{backward_pass, forward_pass, load8, relu, store8, LANES};
use super::Model;

/// Layer widths, bias unit included. All multiples of the SIMD width.
const L0_SIZE: usize = 96;
const L1_SIZE: usize = 64;
const L2_SIZE: usize = 48;

/// Configuration for [`NnModel`].
#[derive(Debug, Clone)]
pub struct NnParams {
    /// Binary log of the embedding-row count.
    pub hash_bits: u32,
    /// Learning rate.
    pub eta: f32,
    /// L2 regularization coefficient.
    pub lambda: f32,
}

impl Default for NnParams {
    fn default() -> Self {
        Self {
            hash_bits: crate::data::HASH_BITS,
            eta: 0.2,
            lambda: 0.00002,
        }
    }
}

#[derive(Default)]
struct NnScratch {
    l0_output: Vec<f32>,
    l0_grad: Vec<f32>,
    l1_output: Vec<f32>,
    l1_grad: Vec<f32>,
    l2_output: Vec<f32>,
    l2_grad: Vec<f32>,
}

impl NnScratch {
    fn prepare(&mut self) {
        self.l0_output.clear();
        self.l0_output.resize(L0_SIZE, 0.0);
        self.l1_output.clear();
        self.l1_output.resize(L1_SIZE, 0.0);
        self.l2_output.clear();
        self.l2_output.resize(L2_SIZE, 0.0);
    }

    fn prepare_grads(&mut self) {
        self.l0_grad.clear();
        self.l0_grad.resize(L0_SIZE, 0.0);
        self.l1_grad.clear();
        self.l1_grad.resize(L1_SIZE, 0.0);
        self.l2_grad.clear();
        self.l2_grad.resize(L2_SIZE, 0.0);
    }
}

thread_local! {
    static SCRATCH: RefCell<NnScratch> = RefCell::new(NnScratch::default());
}

/// Feed-forward predictor with AdaGrad per-weight learning rates.
pub struct NnModel {
    lin_w: Vec<f32>,
    lin_wg: Vec<f32>,

    l1_w: Vec<f32>,
    l1_wg: Vec<f32>,

    l2_w: Vec<f32>,
    l2_wg: Vec<f32>,

    l3_w: Vec<f32>,
    l3_wg: Vec<f32>,

    index_mask: usize,
    eta: f32,
    lambda: f32,
}

impl NnModel {
    pub fn new(params: &NnParams, seed: u64) -> Self {
        let n_features = 1usize << params.hash_bits;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);

        let lin_dist = Uniform::new(-0.1f32, 0.1);
        let mut lin_w = vec![0.0f32; n_features * L0_SIZE];
        for w in &mut lin_w {
            *w = rng.sample(lin_dist);
        }

        let l1_len = L0_SIZE * (L1_SIZE - 1);
        let l2_len = L1_SIZE * (L2_SIZE - 1);
        let l3_len = L2_SIZE;

        Self {
            lin_wg: vec![1.0; lin_w.len()],
            lin_w,
            l1_w: sampled_normal(&mut rng, l1_len, 2.0 / (L0_SIZE as f32).sqrt()),
            l1_wg: vec![1.0; l1_len],
            l2_w: sampled_normal(&mut rng, l2_len, 2.0 / (L1_SIZE as f32).sqrt()),
            l2_wg: vec![1.0; l2_len],
            l3_w: sampled_normal(&mut rng, l3_len, 2.0 / (L2_SIZE as f32).sqrt()),
            l3_wg: vec![1.0; l3_len],
            index_mask: n_features - 1,
            eta: params.eta,
            lambda: params.lambda,
        }
    }

    fn forward(&self, features: &[Feature], scratch: &mut NnScratch) -> f32 {
        let linear_norm = features.len() as f32;
        scratch.prepare();

        for feature in features {
            let row = feature.index as usize & self.index_mask;
            let w = &self.lin_w[row * L0_SIZE..][..L0_SIZE];
            let val = f32x8::splat(feature.value / linear_norm);
            for d in (0..L0_SIZE).step_by(LANES) {
                let acc = load8(&scratch.l0_output[d..]) + load8(&w[d..]) * val;
                store8(&mut scratch.l0_output[d..], acc);
            }
        }

        scratch.l0_output[0] = 1.0;
        for j in 1..L0_SIZE {
            scratch.l0_output[j] = relu(scratch.l0_output[j]);
        }

        scratch.l1_output[0] = 1.0;
        for j in 1..L1_SIZE {
            let row = &self.l1_w[(j - 1) * L0_SIZE..][..L0_SIZE];
            scratch.l1_output[j] = relu(forward_pass(&scratch.l0_output, row));
        }

        scratch.l2_output[0] = 1.0;
        for j in 1..L2_SIZE {
            let row = &self.l2_w[(j - 1) * L1_SIZE..][..L1_SIZE];
            scratch.l2_output[j] = relu(forward_pass(&scratch.l1_output, row));
        }

        forward_pass(&scratch.l2_output, &self.l3_w)
    }
}

fn sampled_normal(rng: &mut Xoshiro256PlusPlus, len: usize, std_dev: f32) -> Vec<f32> {
    let dist = Normal::new(0.0f32, std_dev).expect("valid normal distribution");
    (0..len).map(|_| rng.sample(dist)).collect()
}

impl Model for NnModel {
    fn predict(
        &self,
        features: &[Feature],
        _norm: f32,
        _mask: &DropoutMask,
        _dropout_mult: f32,
    ) -> f32 {
        SCRATCH.with(|scratch| self.forward(features, &mut scratch.borrow_mut()))
    }

    fn update(
        &mut self,
        features: &[Feature],
        _norm: f32,
        kappa: f32,
        _mask: &DropoutMask,
        _dropout_mult: f32,
    ) {
        let linear_norm = features.len() as f32;

        SCRATCH.with(|scratch| {
            let scratch = &mut *scratch.borrow_mut();
            scratch.prepare_grads();

            backward_pass(
                &scratch.l2_output,
                &mut scratch.l2_grad,
                &mut self.l3_w,
                &mut self.l3_wg,
                kappa,
                self.eta,
                self.lambda,
            );

            for j in 1..L2_SIZE {
                // ReLU activation: gradient in the negative part is zero.
                let grad = if scratch.l2_output[j] > 0.0 {
                    scratch.l2_grad[j]
                } else {
                    0.0
                };
                let ofs = (j - 1) * L1_SIZE;
                backward_pass(
                    &scratch.l1_output,
                    &mut scratch.l1_grad,
                    &mut self.l2_w[ofs..ofs + L1_SIZE],
                    &mut self.l2_wg[ofs..ofs + L1_SIZE],
                    grad,
                    self.eta,
                    self.lambda,
                );
            }

            for j in 1..L1_SIZE {
                let grad = if scratch.l1_output[j] > 0.0 {
                    scratch.l1_grad[j]
                } else {
                    0.0
                };
                let ofs = (j - 1) * L0_SIZE;
                backward_pass(
                    &scratch.l0_output,
                    &mut scratch.l0_grad,
                    &mut self.l1_w[ofs..ofs + L0_SIZE],
                    &mut self.l1_wg[ofs..ofs + L0_SIZE],
                    grad,
                    self.eta,
                    self.lambda,
                );
            }

            scratch.l0_grad[0] = 0.0;
            for j in 1..L0_SIZE {
                if scratch.l0_output[j] <= 0.0 {
                    scratch.l0_grad[j] = 0.0;
                }
            }

            let eta_v = f32x8::splat(self.eta);
            let lambda_v = f32x8::splat(self.lambda);

            for feature in features {
                let row = feature.index as usize & self.index_mask;
                let w = &mut self.lin_w[row * L0_SIZE..][..L0_SIZE];
                let wg = &mut self.lin_wg[row * L0_SIZE..][..L0_SIZE];
                let val = f32x8::splat(feature.value / linear_norm);

                for d in (0..L0_SIZE).step_by(LANES) {
                    let kappa_val = load8(&scratch.l0_grad[d..]) * val;

                    let w_v = load8(&w[d..]);
                    let g = lambda_v * w_v + kappa_val;
                    let wg_v = load8(&wg[d..]) + g * g;

                    store8(&mut w[d..], w_v - eta_v * g / wg_v.sqrt());
                    store8(&mut wg[d..], wg_v);
                }
            }
        })
    }

    fn dropout_mask_bits(&self, _n_features: usize) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> NnParams {
        NnParams {
            hash_bits: 8,
            eta: 0.05,
            lambda: 0.0,
        }
    }

    fn example() -> Vec<Feature> {
        vec![Feature::new(0, 5, 1.0), Feature::new(1, 7, 1.0)]
    }

    #[test]
    fn predict_is_finite_and_deterministic() {
        let model = NnModel::new(&small_params(), 11);
        let mask = DropoutMask::new();
        let a = model.predict(&example(), 2.0, &mask, 1.0);
        let b = model.predict(&example(), 2.0, &mask, 1.0);
        assert!(a.is_finite());
        assert_eq!(a, b);
    }

    #[test]
    fn training_reduces_log_loss() {
        let mut model = NnModel::new(&small_params(), 11);
        let features = example();
        let mask = DropoutMask::new();
        let y = 1.0f32;

        let loss = |t: f32| (((-y * t) as f64).exp()).ln_1p();

        let first = loss(model.predict(&features, 2.0, &mask, 1.0));
        for _ in 0..50 {
            let t = model.predict(&features, 2.0, &mask, 1.0);
            let expnyt = ((-y * t) as f64).exp();
            let kappa = (-(y as f64) * expnyt / (1.0 + expnyt)) as f32;
            model.update(&features, 2.0, kappa, &mask, 1.0);
        }
        let last = loss(model.predict(&features, 2.0, &mask, 1.0));

        assert!(last < first, "loss did not improve: {last} vs {first}");
    }
}
