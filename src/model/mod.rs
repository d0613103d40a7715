//! Predictor variants behind a single predict/update interface.
//!
//! All models share one capability set — score a feature range, apply a
//! gradient step, report how many dropout bits an example needs — so the
//! training driver is written once against [`Model`] and the CLI picks a
//! concrete variant through [`ModelKind`]:
//!
//! - [`FfmModel`]: field-aware factorization machine (default)
//! - [`FfmNnModel`]: FFM interaction layer with a neural head
//! - [`FtrlModel`]: FTRL-Proximal linear model
//! - [`NnModel`]: plain feed-forward network

mod ffm;
mod ffm_nn;
mod ftrl;
mod math;
mod nn;

pub use ffm::{FfmModel, FfmParams};
pub use ffm_nn::{FfmNnModel, FfmNnParams};
pub use ftrl::{FtrlModel, FtrlParams};
pub use nn::{NnModel, NnParams};

use crate::data::Feature;
use crate::training::DropoutMask;

/// Capability set shared by every predictor variant.
///
/// `norm` is the example's precomputed sum of squared feature values;
/// `dropout_mult` rescales surviving interaction terms during training
/// (1.0 at evaluation time). `kappa` is the loss gradient with respect to
/// the raw score, supplied by the driver. `update` must follow a
/// `predict` of the same example on the same thread — the variants with
/// hidden activations or lazily materialized weights reuse them from
/// per-thread scratch.
pub trait Model: Send {
    /// Score a contiguous feature range.
    fn predict(&self, features: &[Feature], norm: f32, mask: &DropoutMask, dropout_mult: f32)
        -> f32;

    /// Apply one stochastic gradient step.
    fn update(
        &mut self,
        features: &[Feature],
        norm: f32,
        kappa: f32,
        mask: &DropoutMask,
        dropout_mult: f32,
    );

    /// Number of dropout-mask bits an example with `n_features` records
    /// consumes (the upper-triangular pair count for the bilinear
    /// variants, 0 for models without pairwise terms).
    fn dropout_mask_bits(&self, n_features: usize) -> usize;
}

/// Model selector parsed from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelName {
    Ffm,
    FfmNn,
    Ftrl,
    Nn,
}

impl ModelName {
    /// Parse a CLI model name. Returns `None` for unknown names.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ffm" => Some(Self::Ffm),
            "ffm-nn" => Some(Self::FfmNn),
            "ftrl" => Some(Self::Ftrl),
            "nn" => Some(Self::Nn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ffm => "ffm",
            Self::FfmNn => "ffm-nn",
            Self::Ftrl => "ftrl",
            Self::Nn => "nn",
        }
    }
}

/// Hyperparameters shared across variants, as exposed on the CLI.
#[derive(Debug, Clone)]
pub struct ModelOptions {
    pub eta: f32,
    pub lambda: f32,
    pub restricted: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            eta: 0.2,
            lambda: 0.00002,
            restricted: false,
        }
    }
}

/// A concrete, dispatchable model instance.
pub enum ModelKind {
    Ffm(FfmModel),
    FfmNn(FfmNnModel),
    Ftrl(FtrlModel),
    Nn(NnModel),
}

impl ModelKind {
    /// Build a full-scale model of the named variant.
    pub fn build(name: ModelName, options: &ModelOptions, seed: u64) -> Self {
        match name {
            ModelName::Ffm => Self::Ffm(FfmModel::new(
                &FfmParams {
                    eta: options.eta,
                    lambda: options.lambda,
                    restricted: options.restricted,
                    ..Default::default()
                },
                seed,
            )),
            ModelName::FfmNn => Self::FfmNn(FfmNnModel::new(
                &FfmNnParams {
                    eta: options.eta,
                    lambda: options.lambda,
                    restricted: options.restricted,
                    ..Default::default()
                },
                seed,
            )),
            ModelName::Ftrl => Self::Ftrl(FtrlModel::new(&FtrlParams::default())),
            ModelName::Nn => Self::Nn(NnModel::new(
                &NnParams {
                    eta: options.eta,
                    lambda: options.lambda,
                    ..Default::default()
                },
                seed,
            )),
        }
    }
}

impl Model for ModelKind {
    fn predict(
        &self,
        features: &[Feature],
        norm: f32,
        mask: &DropoutMask,
        dropout_mult: f32,
    ) -> f32 {
        match self {
            Self::Ffm(m) => m.predict(features, norm, mask, dropout_mult),
            Self::FfmNn(m) => m.predict(features, norm, mask, dropout_mult),
            Self::Ftrl(m) => m.predict(features, norm, mask, dropout_mult),
            Self::Nn(m) => m.predict(features, norm, mask, dropout_mult),
        }
    }

    fn update(
        &mut self,
        features: &[Feature],
        norm: f32,
        kappa: f32,
        mask: &DropoutMask,
        dropout_mult: f32,
    ) {
        match self {
            Self::Ffm(m) => m.update(features, norm, kappa, mask, dropout_mult),
            Self::FfmNn(m) => m.update(features, norm, kappa, mask, dropout_mult),
            Self::Ftrl(m) => m.update(features, norm, kappa, mask, dropout_mult),
            Self::Nn(m) => m.update(features, norm, kappa, mask, dropout_mult),
        }
    }

    fn dropout_mask_bits(&self, n_features: usize) -> usize {
        match self {
            Self::Ffm(m) => m.dropout_mask_bits(n_features),
            Self::FfmNn(m) => m.dropout_mask_bits(n_features),
            Self::Ftrl(m) => m.dropout_mask_bits(n_features),
            Self::Nn(m) => m.dropout_mask_bits(n_features),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_names_roundtrip() {
        for name in [ModelName::Ffm, ModelName::FfmNn, ModelName::Ftrl, ModelName::Nn] {
            assert_eq!(ModelName::parse(name.as_str()), Some(name));
        }
    }

    #[test]
    fn unknown_model_name_is_rejected() {
        assert_eq!(ModelName::parse("gbdt"), None);
        assert_eq!(ModelName::parse(""), None);
    }

    #[test]
    fn kind_dispatches_mask_size() {
        let params = FfmParams {
            hash_bits: 4,
            n_fields: 2,
            n_dim: 4,
            ..Default::default()
        };
        let kind = ModelKind::Ffm(FfmModel::new(&params, 1));
        assert_eq!(kind.dropout_mask_bits(3), 6);
    }
}
