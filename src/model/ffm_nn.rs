//! Field-aware factorization machine with a neural head.
//!
//! Instead of summing the pairwise interaction terms into a scalar, this
//! variant accumulates them (together with per-feature linear embeddings)
//! into a latent layer-0 vector and feeds that through a small ReLU
//! network. The FFM weight layout and the masked pair traversal are the
//! same as [`super::ffm::FfmModel`]; the layer-0 gradient coming out of
//! backpropagation takes the place of the scalar `kappa` when the
//! interaction weights are updated.

use std::cell::RefCell;

use rand::distributions::Uniform;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use wide::f32x8;

use crate::data::Feature;
use crate::training::DropoutMask;

use super::math::{aligned_size, backward_pass, forward_pass, load8, relu, store8, LANES};
use super::Model;

/// Hidden layer width, bias unit included.
const L1_SIZE: usize = 24;

/// Configuration for [`FfmNnModel`].
#[derive(Debug, Clone)]
pub struct FfmNnParams {
    /// Binary log of the hashed feature-slot count.
    pub hash_bits: u32,
    /// Number of fields weights are allocated for.
    pub n_fields: u32,
    /// Latent dimensions; also the (padded) layer-0 width.
    pub n_dim: usize,
    /// Learning rate.
    pub eta: f32,
    /// L2 regularization coefficient.
    pub lambda: f32,
    /// Restrict pairwise interactions to cross-group terms.
    pub restricted: bool,
}

impl Default for FfmNnParams {
    fn default() -> Self {
        Self {
            hash_bits: crate::data::HASH_BITS,
            n_fields: 40,
            n_dim: 16,
            eta: 0.2,
            lambda: 0.00002,
            restricted: false,
        }
    }
}

#[derive(Default)]
struct FfmNnScratch {
    l0_output: Vec<f32>,
    l0_grad: Vec<f32>,
    l1_output: Vec<f32>,
    l1_grad: Vec<f32>,
}

impl FfmNnScratch {
    fn prepare(&mut self, l0_size: usize) {
        self.l0_output.clear();
        self.l0_output.resize(l0_size, 0.0);
        self.l1_output.clear();
        self.l1_output.resize(L1_SIZE, 0.0);
    }

    fn prepare_grads(&mut self, l0_size: usize) {
        self.l0_grad.clear();
        self.l0_grad.resize(l0_size, 0.0);
        self.l1_grad.clear();
        self.l1_grad.resize(L1_SIZE, 0.0);
    }
}

thread_local! {
    static SCRATCH: RefCell<FfmNnScratch> = RefCell::new(FfmNnScratch::default());
}

/// FFM interaction layer feeding a one-hidden-layer network.
pub struct FfmNnModel {
    /// Interaction tensor, laid out as in [`super::ffm::FfmModel`].
    ffm_weights: Vec<f32>,
    /// Per-feature linear embedding rows with the same
    /// `[weights | accumulators]` stripe layout.
    lin_weights: Vec<f32>,

    l1_w: Vec<f32>,
    l1_wg: Vec<f32>,
    l2_w: Vec<f32>,
    l2_wg: Vec<f32>,

    eta: f32,
    lambda: f32,

    min_a_field: u32,
    max_b_field: u32,

    hash_mask: usize,
    n_fields: usize,
    dim_aligned: usize,
    field_stride: usize,
    index_stride: usize,
}

impl FfmNnModel {
    pub fn new(params: &FfmNnParams, seed: u64) -> Self {
        let n_features = 1usize << params.hash_bits;
        let dim_aligned = aligned_size(params.n_dim);
        let field_stride = dim_aligned * 2;
        let index_stride = params.n_fields as usize * field_stride;

        let (min_a_field, max_b_field) = if params.restricted {
            (10, params.n_fields.saturating_sub(11))
        } else {
            (0, params.n_fields)
        };

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let bound = 1.0 / (params.n_dim as f32).sqrt();

        let mut ffm_weights = vec![0.0f32; n_features * index_stride];
        init_stripes(
            &mut ffm_weights,
            params.n_dim,
            dim_aligned,
            Uniform::new(-bound, bound),
            &mut rng,
        );

        let mut lin_weights = vec![0.0f32; n_features * field_stride];
        init_stripes(
            &mut lin_weights,
            params.n_dim,
            dim_aligned,
            Uniform::new(-0.001f32, 0.001),
            &mut rng,
        );

        let l1_len = dim_aligned * (L1_SIZE - 1);
        let l1_bound = 1.0 / L1_SIZE as f32;
        let l1_dist = Uniform::new(-l1_bound, l1_bound);
        let l1_w: Vec<f32> = (0..l1_len).map(|_| rng.sample(l1_dist)).collect();

        let l2_dist = Uniform::new(-1.0f32, 1.0);
        let l2_w: Vec<f32> = (0..L1_SIZE).map(|_| rng.sample(l2_dist)).collect();

        Self {
            ffm_weights,
            lin_weights,
            l1_wg: vec![1.0; l1_len],
            l1_w,
            l2_wg: vec![1.0; L1_SIZE],
            l2_w,
            eta: params.eta,
            lambda: params.lambda,
            min_a_field,
            max_b_field,
            hash_mask: n_features - 1,
            n_fields: params.n_fields as usize,
            dim_aligned,
            field_stride,
            index_stride,
        }
    }

    /// Override the interaction field bounds directly.
    pub fn set_interaction_bounds(&mut self, min_a_field: u32, max_b_field: u32) {
        self.min_a_field = min_a_field;
        self.max_b_field = max_b_field;
    }

    #[inline]
    fn row_offset(&self, index: usize, field: u32) -> usize {
        debug_assert!((field as usize) < self.n_fields);
        index * self.index_stride + field as usize * self.field_stride
    }

    fn forward(
        &self,
        features: &[Feature],
        norm: f32,
        mask: &DropoutMask,
        dropout_mult: f32,
        scratch: &mut FfmNnScratch,
    ) -> f32 {
        let linear_norm = features.len() as f32;
        scratch.prepare(self.dim_aligned);

        let mut cursor = 0usize;

        for (a, fa) in features.iter().enumerate() {
            let index_a = fa.index as usize & self.hash_mask;

            let wl = &self.lin_weights[index_a * self.field_stride..];
            let val = f32x8::splat(fa.value / linear_norm);
            for d in (0..self.dim_aligned).step_by(LANES) {
                let acc = load8(&scratch.l0_output[d..]) + load8(&wl[d..]) * val;
                store8(&mut scratch.l0_output[d..], acc);
            }

            if fa.field < self.min_a_field {
                continue;
            }

            for fb in &features[..a] {
                if fb.field > self.max_b_field {
                    break;
                }

                let bit = cursor;
                cursor += 1;
                if !mask.is_set(bit) {
                    continue;
                }

                let index_b = fb.index as usize & self.hash_mask;
                let wa = &self.ffm_weights[self.row_offset(index_a, fb.field)..];
                let wb = &self.ffm_weights[self.row_offset(index_b, fa.field)..];

                let val = f32x8::splat(dropout_mult * fa.value * fb.value / norm);
                for d in (0..self.dim_aligned).step_by(LANES) {
                    let acc = load8(&scratch.l0_output[d..]) + load8(&wa[d..]) * load8(&wb[d..]) * val;
                    store8(&mut scratch.l0_output[d..], acc);
                }
            }
        }

        scratch.l0_output[0] = 1.0;
        for j in 1..self.dim_aligned {
            scratch.l0_output[j] = relu(scratch.l0_output[j]);
        }

        scratch.l1_output[0] = 1.0;
        for j in 1..L1_SIZE {
            let row = &self.l1_w[(j - 1) * self.dim_aligned..][..self.dim_aligned];
            scratch.l1_output[j] = relu(forward_pass(&scratch.l0_output, row));
        }

        forward_pass(&scratch.l1_output, &self.l2_w)
    }
}

/// Initialize `[weights | accumulators]` stripes: live lanes from the
/// distribution, padding lanes 0, accumulator lanes 1.
fn init_stripes(
    weights: &mut [f32],
    n_dim: usize,
    dim_aligned: usize,
    dist: Uniform<f32>,
    rng: &mut Xoshiro256PlusPlus,
) {
    for row in weights.chunks_exact_mut(dim_aligned * 2) {
        for w in &mut row[..n_dim] {
            *w = rng.sample(dist);
        }
        for g in &mut row[dim_aligned..] {
            *g = 1.0;
        }
    }
}

impl Model for FfmNnModel {
    fn predict(&self, features: &[Feature], norm: f32, mask: &DropoutMask, dropout_mult: f32) -> f32 {
        SCRATCH.with(|scratch| {
            self.forward(features, norm, mask, dropout_mult, &mut scratch.borrow_mut())
        })
    }

    fn update(
        &mut self,
        features: &[Feature],
        norm: f32,
        kappa: f32,
        mask: &DropoutMask,
        dropout_mult: f32,
    ) {
        let linear_norm = features.len() as f32;

        SCRATCH.with(|scratch| {
            let scratch = &mut *scratch.borrow_mut();
            scratch.prepare_grads(self.dim_aligned);

            backward_pass(
                &scratch.l1_output,
                &mut scratch.l1_grad,
                &mut self.l2_w,
                &mut self.l2_wg,
                kappa,
                self.eta,
                self.lambda,
            );

            for j in 1..L1_SIZE {
                // ReLU activation: gradient in the negative part is zero.
                let grad = if scratch.l1_output[j] > 0.0 {
                    scratch.l1_grad[j]
                } else {
                    0.0
                };
                let ofs = (j - 1) * self.dim_aligned;
                backward_pass(
                    &scratch.l0_output,
                    &mut scratch.l0_grad,
                    &mut self.l1_w[ofs..ofs + self.dim_aligned],
                    &mut self.l1_wg[ofs..ofs + self.dim_aligned],
                    grad,
                    self.eta,
                    self.lambda,
                );
            }

            scratch.l0_grad[0] = 0.0;
            for j in 1..self.dim_aligned {
                if scratch.l0_output[j] <= 0.0 {
                    scratch.l0_grad[j] = 0.0;
                }
            }

            let eta_v = f32x8::splat(self.eta);
            let lambda_v = f32x8::splat(self.lambda);

            let mut cursor = 0usize;

            for (a, fa) in features.iter().enumerate() {
                let index_a = fa.index as usize & self.hash_mask;

                {
                    let ofs = index_a * self.field_stride;
                    let val = f32x8::splat(fa.value / linear_norm);

                    for d in (0..self.dim_aligned).step_by(LANES) {
                        let kappa_val = load8(&scratch.l0_grad[d..]) * val;

                        let w = load8(&self.lin_weights[ofs + d..]);
                        let g = lambda_v * w + kappa_val;
                        let wg = load8(&self.lin_weights[ofs + self.dim_aligned + d..]) + g * g;

                        store8(&mut self.lin_weights[ofs + d..], w - eta_v * g / wg.sqrt());
                        store8(&mut self.lin_weights[ofs + self.dim_aligned + d..], wg);
                    }
                }

                if fa.field < self.min_a_field {
                    continue;
                }

                for fb in &features[..a] {
                    if fb.field > self.max_b_field {
                        break;
                    }

                    let bit = cursor;
                    cursor += 1;
                    if !mask.is_set(bit) {
                        continue;
                    }

                    let index_b = fb.index as usize & self.hash_mask;
                    let wa_ofs = self.row_offset(index_a, fb.field);
                    let wb_ofs = self.row_offset(index_b, fa.field);

                    let val = f32x8::splat(dropout_mult * fa.value * fb.value / norm);

                    // Rows may alias under hash collisions: read both
                    // chunks before writing either.
                    for d in (0..self.dim_aligned).step_by(LANES) {
                        let kappa_val = load8(&scratch.l0_grad[d..]) * val;

                        let wa = load8(&self.ffm_weights[wa_ofs + d..]);
                        let wb = load8(&self.ffm_weights[wb_ofs + d..]);

                        let ga = lambda_v * wa + kappa_val * wb;
                        let gb = lambda_v * wb + kappa_val * wa;

                        let wga =
                            load8(&self.ffm_weights[wa_ofs + self.dim_aligned + d..]) + ga * ga;
                        let wgb =
                            load8(&self.ffm_weights[wb_ofs + self.dim_aligned + d..]) + gb * gb;

                        store8(&mut self.ffm_weights[wa_ofs + d..], wa - eta_v * ga / wga.sqrt());
                        store8(&mut self.ffm_weights[wb_ofs + d..], wb - eta_v * gb / wgb.sqrt());

                        store8(&mut self.ffm_weights[wa_ofs + self.dim_aligned + d..], wga);
                        store8(&mut self.ffm_weights[wb_ofs + self.dim_aligned + d..], wgb);
                    }
                }
            }
        })
    }

    fn dropout_mask_bits(&self, n_features: usize) -> usize {
        n_features * (n_features + 1) / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> FfmNnParams {
        FfmNnParams {
            hash_bits: 8,
            n_fields: 12,
            n_dim: 8,
            eta: 0.05,
            lambda: 0.0,
            ..Default::default()
        }
    }

    fn example() -> Vec<Feature> {
        vec![Feature::new(0, 5, 1.0), Feature::new(1, 7, 1.0)]
    }

    #[test]
    fn predict_is_deterministic_under_fixed_mask() {
        let model = FfmNnModel::new(&small_params(), 5);
        let features = example();
        let mask = DropoutMask::ones(model.dropout_mask_bits(features.len()));

        let a = model.predict(&features, 2.0, &mask, 1.0);
        let b = model.predict(&features, 2.0, &mask, 1.0);
        assert_eq!(a, b);
    }

    #[test]
    fn training_reduces_log_loss() {
        let mut model = FfmNnModel::new(&small_params(), 5);
        let features = example();
        let mask = DropoutMask::ones(model.dropout_mask_bits(features.len()));
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

    #[test]
    fn mask_bits_counts_upper_triangle() {
        let model = FfmNnModel::new(&small_params(), 5);
        assert_eq!(model.dropout_mask_bits(3), 6);
    }
}
