//! Interaction dropout bitmasks.
//!
//! Each pairwise interaction of an example owns one bit; set means the
//! pair survives. Masks are filled by OR-ing `prob_log` random 64-bit
//! words per slot, so a bit survives with probability `1 - 2^-prob_log`
//! (for the default `prob_log = 1`, a 50% dropout rate). Surviving terms
//! are rescaled by [`dropout_multiplier`] to keep the expected
//! interaction sum unchanged.
//!
//! Mask buffers are reused across the examples of a batch; `fill_*`
//! resizes in place without reallocating once the high-water mark is
//! reached.

use rand::Rng;

/// Bitmask over the pairwise interactions of one example.
#[derive(Debug, Clone, Default)]
pub struct DropoutMask {
    words: Vec<u64>,
}

impl DropoutMask {
    pub fn new() -> Self {
        Self::default()
    }

    /// An all-ones mask covering `bits` interactions (evaluation mode).
    pub fn ones(bits: usize) -> Self {
        let mut mask = Self::new();
        mask.fill_ones(bits);
        mask
    }

    /// An all-zeros mask covering `bits` interactions.
    pub fn zeros(bits: usize) -> Self {
        let mut mask = Self::new();
        mask.words.resize(Self::words_for(bits), 0);
        mask
    }

    #[inline]
    fn words_for(bits: usize) -> usize {
        bits.div_ceil(64)
    }

    /// Set every bit covering `bits` interactions.
    pub fn fill_ones(&mut self, bits: usize) {
        self.words.clear();
        self.words.resize(Self::words_for(bits), !0u64);
    }

    /// Randomize the mask: each bit keeps its pair with probability
    /// `1 - 2^-prob_log`. `prob_log = 0` disables dropout (all ones).
    pub fn fill_random(&mut self, bits: usize, prob_log: u32, rng: &mut impl Rng) {
        if prob_log == 0 {
            self.fill_ones(bits);
            return;
        }

        self.words.clear();
        self.words.resize(Self::words_for(bits), 0);
        for word in &mut self.words {
            for _ in 0..prob_log {
                *word |= rng.gen::<u64>();
            }
        }
    }

    /// Whether interaction `bit` survives. Bits beyond the filled range
    /// read as dropped.
    #[inline]
    pub fn is_set(&self, bit: usize) -> bool {
        match self.words.get(bit >> 6) {
            Some(word) => (word >> (bit & 63)) & 1 != 0,
            None => false,
        }
    }
}

/// Rescaling factor for surviving interaction terms: the reciprocal of
/// the keep probability `1 - 2^-prob_log`. 1.0 when dropout is disabled.
pub fn dropout_multiplier(prob_log: u32) -> f32 {
    if prob_log == 0 {
        1.0
    } else {
        let denom = (1u64 << prob_log) as f32;
        denom / (denom - 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn ones_mask_keeps_everything() {
        let mask = DropoutMask::ones(130);
        for bit in 0..130 {
            assert!(mask.is_set(bit));
        }
    }

    #[test]
    fn out_of_range_bits_read_as_dropped() {
        let mask = DropoutMask::ones(10);
        assert!(!mask.is_set(64));
    }

    #[test]
    fn prob_log_zero_disables_dropout() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let mut mask = DropoutMask::new();
        mask.fill_random(100, 0, &mut rng);
        for bit in 0..100 {
            assert!(mask.is_set(bit));
        }
        assert_eq!(dropout_multiplier(0), 1.0);
    }

    #[test]
    fn keep_rate_tracks_prob_log() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let bits = 64 * 1000;

        for (prob_log, expected) in [(1u32, 0.5f64), (2, 0.75), (3, 0.875)] {
            let mut mask = DropoutMask::new();
            mask.fill_random(bits, prob_log, &mut rng);

            let kept = (0..bits).filter(|&b| mask.is_set(b)).count();
            let rate = kept as f64 / bits as f64;
            assert!(
                (rate - expected).abs() < 0.01,
                "prob_log {prob_log}: keep rate {rate}, expected ~{expected}"
            );
        }
    }

    #[test]
    fn multiplier_is_reciprocal_keep_probability() {
        assert_eq!(dropout_multiplier(1), 2.0);
        assert!((dropout_multiplier(2) - 4.0 / 3.0).abs() < 1e-6);
        assert!((dropout_multiplier(3) - 8.0 / 7.0).abs() < 1e-6);
    }

    #[test]
    fn refill_reuses_capacity() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mut mask = DropoutMask::new();
        mask.fill_random(1024, 1, &mut rng);
        mask.fill_ones(16);
        assert!(mask.is_set(0));
        assert!(!mask.is_set(70));
    }
}
