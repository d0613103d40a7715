//! Dataset representation and binary codec.
//!
//! A dataset is a pair of files sharing a base name:
//!
//! - `<base>.index`: per-example metadata ([`DatasetIndex`]) loaded
//!   wholesale into memory
//! - `<base>.data`: the flat concatenation of all [`Feature`] records,
//!   streamed in batch-sized slices during training
//!
//! Producers build examples with [`FeatureBuilder`], append them through
//! [`DataWriter`] (which returns the running record count, used directly
//! as the next example's offset), and persist the index once at the end
//! with [`write_index`].

mod builder;
mod error;
mod feature;
mod index;
mod io;

pub use builder::FeatureBuilder;
pub use error::DataError;
pub use feature::{
    Feature, HASH_BITS, HASH_MASK, HASH_OFFSET, HASH_SPACE, NUM_FEATURES, NUM_FIELDS, RECORD_SIZE,
};
pub use index::DatasetIndex;
pub use io::{read_batch, read_index, write_index, DataWriter, Dataset};
