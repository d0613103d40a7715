//! Vectorized kernels over padded weight rows.
//!
//! Weight rows are padded to a multiple of the SIMD lane width and
//! processed as [`wide::f32x8`] chunks. Padding weight lanes hold 0 and
//! padding accumulator lanes hold 1: an inert pair that contributes
//! nothing to dot products and keeps the AdaGrad step finite, so the
//! inner loops never branch on the live dimension count.

use wide::f32x8;

/// SIMD lane width the weight layouts are padded to.
pub(crate) const LANES: usize = 8;

/// Round a dimension count up to the padded width.
#[inline]
pub(crate) fn aligned_size(n: usize) -> usize {
    n.div_ceil(LANES) * LANES
}

/// Load one SIMD chunk from the head of a slice.
#[inline]
pub(crate) fn load8(s: &[f32]) -> f32x8 {
    let mut lanes = [0.0f32; LANES];
    lanes.copy_from_slice(&s[..LANES]);
    f32x8::from(lanes)
}

/// Store one SIMD chunk to the head of a slice.
#[inline]
pub(crate) fn store8(s: &mut [f32], v: f32x8) {
    s[..LANES].copy_from_slice(&v.to_array());
}

#[inline]
pub(crate) fn relu(x: f32) -> f32 {
    if x > 0.0 {
        x
    } else {
        0.0
    }
}

/// Dot product of two padded, equal-length activation/weight rows.
#[inline]
pub(crate) fn forward_pass(input: &[f32], w: &[f32]) -> f32 {
    debug_assert_eq!(input.len() % LANES, 0);
    debug_assert_eq!(input.len(), w.len());

    let mut total = f32x8::splat(0.0);
    for d in (0..input.len()).step_by(LANES) {
        total += load8(&input[d..]) * load8(&w[d..]);
    }
    total.reduce_add()
}

/// One fused backpropagation step through a dense row.
///
/// Accumulates `grad * w` into `input_grad` and applies the AdaGrad
/// update `g = lambda*w + grad*input; wg += g²; w -= eta*g/sqrt(wg)` to
/// the row in place.
#[inline]
pub(crate) fn backward_pass(
    input: &[f32],
    input_grad: &mut [f32],
    w: &mut [f32],
    wg: &mut [f32],
    grad: f32,
    eta: f32,
    lambda: f32,
) {
    debug_assert_eq!(input.len(), w.len());
    debug_assert_eq!(w.len(), wg.len());

    let eta_v = f32x8::splat(eta);
    let lambda_v = f32x8::splat(lambda);
    let grad_v = f32x8::splat(grad);

    for d in (0..input.len()).step_by(LANES) {
        let w_v = load8(&w[d..]);
        let g = lambda_v * w_v + grad_v * load8(&input[d..]);
        let wg_v = load8(&wg[d..]) + g * g;

        let input_grad_v = load8(&input_grad[d..]) + grad_v * w_v;
        store8(&mut input_grad[d..], input_grad_v);
        store8(&mut w[d..], w_v - eta_v * g / wg_v.sqrt());
        store8(&mut wg[d..], wg_v);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn aligned_size_rounds_up_to_lanes() {
        assert_eq!(aligned_size(1), 8);
        assert_eq!(aligned_size(8), 8);
        assert_eq!(aligned_size(14), 16);
        assert_eq!(aligned_size(24), 24);
    }

    #[test]
    fn load_store_roundtrip() {
        let src: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let mut dst = vec![0.0f32; 8];
        store8(&mut dst, load8(&src));
        assert_eq!(src, dst);
    }

    #[test]
    fn forward_pass_is_a_dot_product() {
        let input = vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let w = vec![0.5, 0.5, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert_relative_eq!(forward_pass(&input, &w), 3.0);
    }

    #[test]
    fn backward_pass_moves_weights_against_gradient() {
        let input = vec![1.0; 8];
        let mut input_grad = vec![0.0; 8];
        let mut w = vec![0.5; 8];
        let mut wg = vec![1.0; 8];

        backward_pass(&input, &mut input_grad, &mut w, &mut wg, 1.0, 0.1, 0.0);

        // Positive grad on positive input shrinks the weights.
        for &x in &w {
            assert!(x < 0.5);
        }
        // Accumulators grow by g².
        for &g in &wg {
            assert!(g > 1.0);
        }
        // input_grad accumulated grad * original weight.
        for &ig in &input_grad {
            assert!((ig - 0.5).abs() < 1e-6);
        }
    }
}
