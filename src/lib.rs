//! fieldfm: a field-aware factorization machine trainer for Rust.
//!
//! This crate implements a supervised-learning engine for large-scale
//! click-through-rate prediction over sparse categorical features:
//!
//! - [`data`]: the binary dataset format (index + flat feature records),
//!   its streaming writer and batch reader, and the hashed feature builder
//! - [`model`]: the predictor variants (field-aware factorization machine,
//!   FFM + neural head, FTRL-proximal, plain feed-forward network) behind
//!   a single predict/update interface
//! - [`training`]: the batched, multi-threaded training and evaluation
//!   driver, dropout masks, and the MAP@12 ranking metric

pub mod data;
pub mod model;
pub mod training;
