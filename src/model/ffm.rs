//! Field-aware factorization machine with AdaGrad updates.
//!
//! Every (feature index, field) pair owns a latent vector: when feature
//! `a` interacts with feature `b`, the score uses `a`'s vector for `b`'s
//! field and `b`'s vector for `a`'s field. That asymmetric lookup is what
//! makes the interaction field-aware — the same feature presents a
//! different embedding to every field it meets.
//!
//! Weight layout per (index, field) row: `dim_aligned` weight lanes
//! followed by `dim_aligned` AdaGrad accumulator lanes, so one row is a
//! single contiguous, SIMD-friendly stripe.

use rand::distributions::Uniform;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use wide::f32x8;

use crate::data::Feature;
use crate::training::DropoutMask;

use super::math::{aligned_size, load8, store8, LANES};
use super::Model;

/// Configuration for [`FfmModel`].
///
/// The defaults reproduce the canonical full-scale model: `2^20` hashed
/// feature slots × 30 fields × 14 latent dimensions (padded to 16), which
/// allocates roughly 4 GB of weights. Tests shrink `hash_bits` and
/// `n_fields` to keep tables small.
#[derive(Debug, Clone)]
pub struct FfmParams {
    /// Binary log of the hashed feature-slot count.
    pub hash_bits: u32,
    /// Number of fields weights are allocated for.
    pub n_fields: u32,
    /// Live latent dimensions (padded up to the SIMD width internally).
    pub n_dim: usize,
    /// Learning rate.
    pub eta: f32,
    /// L2 regularization coefficient.
    pub lambda: f32,
    /// Restrict pairwise interactions to cross-terms between the two
    /// predefined field groups.
    pub restricted: bool,
}

impl Default for FfmParams {
    fn default() -> Self {
        Self {
            hash_bits: crate::data::HASH_BITS,
            n_fields: crate::data::NUM_FIELDS,
            n_dim: 14,
            eta: 0.2,
            lambda: 0.00002,
            restricted: false,
        }
    }
}

/// Field-aware bilinear predictor.
pub struct FfmModel {
    /// Interaction tensor: `n_features × n_fields` rows of
    /// `[dim_aligned weights | dim_aligned accumulators]`.
    weights: Vec<f32>,
    /// Linear term: `n_features` pairs of `(weight, accumulator)`.
    linear_weights: Vec<f32>,
    bias_w: f32,
    bias_g: f32,

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

impl FfmModel {
    pub fn new(params: &FfmParams, seed: u64) -> Self {
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
        let dist = Uniform::new(0.0f32, 1.0 / (params.n_dim as f32).sqrt());

        let mut weights = vec![0.0f32; n_features * index_stride];
        for row in weights.chunks_exact_mut(field_stride) {
            for w in &mut row[..params.n_dim] {
                *w = rng.sample(dist);
            }
            for g in &mut row[dim_aligned..] {
                *g = 1.0;
            }
        }

        let mut linear_weights = vec![0.0f32; n_features * 2];
        for pair in linear_weights.chunks_exact_mut(2) {
            pair[1] = 1.0;
        }

        Self {
            weights,
            linear_weights,
            bias_w: 0.0,
            bias_g: 1.0,
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

    /// Override the interaction field bounds directly. Only pairs where
    /// the later record's field is `>= min_a_field` and the earlier
    /// record's field is `<= max_b_field` are scored.
    pub fn set_interaction_bounds(&mut self, min_a_field: u32, max_b_field: u32) {
        self.min_a_field = min_a_field;
        self.max_b_field = max_b_field;
    }

    #[inline]
    fn row_offset(&self, index: usize, field: u32) -> usize {
        debug_assert!((field as usize) < self.n_fields);
        index * self.index_stride + field as usize * self.field_stride
    }
}

impl Model for FfmModel {
    fn predict(&self, features: &[Feature], norm: f32, mask: &DropoutMask, dropout_mult: f32) -> f32 {
        let linear_norm = features.len() as f32;

        let mut linear_total = 0.0f32;
        let mut acc = f32x8::splat(0.0);
        let mut cursor = 0usize;

        for (a, fa) in features.iter().enumerate() {
            let index_a = fa.index as usize & self.hash_mask;

            linear_total += fa.value * self.linear_weights[index_a * 2] / linear_norm;

            if fa.field < self.min_a_field {
                continue;
            }

            for fb in &features[..a] {
                // Records are field-sorted by the exporter: the first
                // field past the bound ends the scan.
                if fb.field > self.max_b_field {
                    break;
                }

                let bit = cursor;
                cursor += 1;
                if !mask.is_set(bit) {
                    continue;
                }

                let index_b = fb.index as usize & self.hash_mask;
                let wa = &self.weights[self.row_offset(index_a, fb.field)..];
                let wb = &self.weights[self.row_offset(index_b, fa.field)..];

                let val = f32x8::splat(dropout_mult * fa.value * fb.value / norm);
                for d in (0..self.dim_aligned).step_by(LANES) {
                    acc += load8(&wa[d..]) * load8(&wb[d..]) * val;
                }
            }
        }

        self.bias_w + linear_total + acc.reduce_add()
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

        let eta_v = f32x8::splat(self.eta);
        let lambda_v = f32x8::splat(self.lambda);

        let mut cursor = 0usize;

        for (a, fa) in features.iter().enumerate() {
            let index_a = fa.index as usize & self.hash_mask;

            let g = self.lambda * self.linear_weights[index_a * 2]
                + kappa * fa.value / linear_norm;
            let wg = self.linear_weights[index_a * 2 + 1] + g * g;
            self.linear_weights[index_a * 2] -= self.eta * g / wg.sqrt();
            self.linear_weights[index_a * 2 + 1] = wg;

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

                let kappa_val = f32x8::splat(kappa * dropout_mult * fa.value * fb.value / norm);

                // The two rows may alias under hash collisions, so each
                // chunk is read fully before either side is written.
                for d in (0..self.dim_aligned).step_by(LANES) {
                    let wa_v = load8(&self.weights[wa_ofs + d..]);
                    let wb_v = load8(&self.weights[wb_ofs + d..]);

                    let ga = lambda_v * wa_v + kappa_val * wb_v;
                    let gb = lambda_v * wb_v + kappa_val * wa_v;

                    let wga = load8(&self.weights[wa_ofs + self.dim_aligned + d..]) + ga * ga;
                    let wgb = load8(&self.weights[wb_ofs + self.dim_aligned + d..]) + gb * gb;

                    store8(&mut self.weights[wa_ofs + d..], wa_v - eta_v * ga / wga.sqrt());
                    store8(&mut self.weights[wb_ofs + d..], wb_v - eta_v * gb / wgb.sqrt());

                    store8(&mut self.weights[wa_ofs + self.dim_aligned + d..], wga);
                    store8(&mut self.weights[wb_ofs + self.dim_aligned + d..], wgb);
                }
            }
        }

        self.bias_g += kappa * kappa;
        self.bias_w -= self.eta * kappa / self.bias_g.sqrt();
    }

    fn dropout_mask_bits(&self, n_features: usize) -> usize {
        n_features * (n_features + 1) / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> FfmParams {
        FfmParams {
            hash_bits: 8,
            n_fields: 12,
            n_dim: 4,
            ..Default::default()
        }
    }

    fn two_feature_example() -> Vec<Feature> {
        vec![Feature::new(0, 5, 1.0), Feature::new(1, 7, 1.0)]
    }

    fn log_loss(y: f32, t: f32) -> f64 {
        (((-y * t) as f64).exp()).ln_1p()
    }

    #[test]
    fn predict_is_deterministic_under_fixed_mask() {
        let model = FfmModel::new(&small_params(), 7);
        let features = two_feature_example();
        let mask = DropoutMask::ones(model.dropout_mask_bits(features.len()));

        let a = model.predict(&features, 2.0, &mask, 1.0);
        let b = model.predict(&features, 2.0, &mask, 1.0);
        assert_eq!(a, b);
    }

    #[test]
    fn restricted_bounds_exclude_low_field_interactions() {
        let features = two_feature_example();
        let mask = DropoutMask::ones(3);

        let mut restricted = FfmModel::new(&small_params(), 7);
        restricted.set_interaction_bounds(10, 9);

        // Fresh model: bias and linear weights are zero, so with all
        // interactions excluded the score is exactly zero.
        assert_eq!(restricted.predict(&features, 2.0, &mask, 1.0), 0.0);

        // Unrestricted, the positive-uniform latent init contributes.
        let unrestricted = FfmModel::new(&small_params(), 7);
        assert!(unrestricted.predict(&features, 2.0, &mask, 1.0) > 0.0);
    }

    #[test]
    fn repeated_updates_decrease_log_loss() {
        let mut model = FfmModel::new(&small_params(), 42);
        let features = two_feature_example();
        let norm = 2.0;
        let mask = DropoutMask::ones(model.dropout_mask_bits(features.len()));
        let y = 1.0f32;

        let mut last = log_loss(y, model.predict(&features, norm, &mask, 1.0));
        for _ in 0..20 {
            let t = model.predict(&features, norm, &mask, 1.0);
            let expnyt = ((-y * t) as f64).exp();
            let kappa = (-(y as f64) * expnyt / (1.0 + expnyt)) as f32;
            model.update(&features, norm, kappa, &mask, 1.0);

            let loss = log_loss(y, model.predict(&features, norm, &mask, 1.0));
            assert!(loss < last + 1e-9, "loss did not decrease: {loss} vs {last}");
            last = loss;
        }
    }

    #[test]
    fn dropped_pairs_do_not_contribute() {
        let model = FfmModel::new(&small_params(), 3);
        let features = two_feature_example();

        // One pair only; masking its bit reduces predict to bias+linear,
        // which is zero on a fresh model.
        let mut mask = DropoutMask::new();
        mask.fill_ones(model.dropout_mask_bits(features.len()));
        let with_pair = model.predict(&features, 2.0, &mask, 1.0);

        let empty = DropoutMask::zeros(model.dropout_mask_bits(features.len()));
        let without_pair = model.predict(&features, 2.0, &empty, 1.0);

        assert!(with_pair > 0.0);
        assert_eq!(without_pair, 0.0);
    }

    #[test]
    fn mask_bits_is_the_pair_count_upper_bound() {
        let model = FfmModel::new(&small_params(), 1);
        assert_eq!(model.dropout_mask_bits(1), 1);
        assert_eq!(model.dropout_mask_bits(2), 3);
        assert_eq!(model.dropout_mask_bits(4), 10);
    }
}
