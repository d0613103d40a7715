//! Feature records and the hashed index space.
//!
//! A [`Feature`] is one nonzero coordinate of an example: a semantic
//! field, a local index within that field's value space, and a weight.
//! On disk the field and index are packed into a single `u32`
//! (`field << HASH_BITS | index`) followed by the `f32` value — 8 bytes
//! per record, little-endian. Records are decoded into the explicit
//! struct immediately at the read boundary; nothing outside the codec
//! touches the packed form.

/// Bits of the hashed local-index space (`2^20` slots per field group).
pub const HASH_BITS: u32 = 20;

/// Mask extracting the local index from a packed record.
pub const HASH_MASK: u32 = (1 << HASH_BITS) - 1;

/// Number of local-index slots.
pub const NUM_FEATURES: usize = 1 << HASH_BITS;

/// Number of semantic fields the canonical models allocate weights for.
pub const NUM_FIELDS: u32 = 30;

/// Low index slots reserved for explicitly placed (`raw`) features.
pub const HASH_OFFSET: u32 = 200;

/// Size of the index range hashed features map into.
pub const HASH_SPACE: u32 = (1 << HASH_BITS) - HASH_OFFSET;

/// Size of one serialized feature record in bytes.
pub const RECORD_SIZE: usize = 8;

/// One nonzero coordinate of an example.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    /// Semantic feature group (e.g. "event country", "ad campaign").
    pub field: u32,
    /// Position within the field's (possibly hashed) value space.
    pub index: u32,
    /// Feature weight; 1.0 for plain one-hot indicators.
    pub value: f32,
}

impl Feature {
    /// Create a record. The index is truncated to the hash space.
    pub fn new(field: u32, index: u32, value: f32) -> Self {
        Self {
            field,
            index: index & HASH_MASK,
            value,
        }
    }

    /// Pack field and index into the serialized `u32` form.
    #[inline]
    pub fn packed(self) -> u32 {
        (self.field << HASH_BITS) | (self.index & HASH_MASK)
    }

    /// Decode a record from its packed serialized form.
    #[inline]
    pub fn from_packed(packed: u32, value: f32) -> Self {
        Self {
            field: packed >> HASH_BITS,
            index: packed & HASH_MASK,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_roundtrip() {
        let f = Feature::new(17, 123_456, 0.5);
        let decoded = Feature::from_packed(f.packed(), f.value);
        assert_eq!(decoded, f);
    }

    #[test]
    fn new_truncates_index_to_hash_space() {
        let f = Feature::new(0, HASH_MASK + 10, 1.0);
        assert_eq!(f.index, 9);
    }

    #[test]
    fn hash_space_constants_are_consistent() {
        assert_eq!(NUM_FEATURES, (HASH_MASK as usize) + 1);
        assert_eq!(HASH_SPACE + HASH_OFFSET, NUM_FEATURES as u32);
    }
}
