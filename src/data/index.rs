//! In-memory dataset index.

use super::error::DataError;

/// Per-example metadata for a dataset, loaded wholesale and kept
/// read-only for the life of a training or evaluation run.
///
/// Example `i` owns the feature records `offsets[i]..offsets[i + 1]` of
/// the data file. `groups` must be non-decreasing across the index for
/// the MAP computation; this is checked at evaluation time, not here.
#[derive(Debug, Clone, Default)]
pub struct DatasetIndex {
    /// Target values: +1 / -1, or 0 for unlabeled (test) examples.
    pub labels: Vec<f32>,
    /// Cumulative feature-record counts; `offsets[0] == 0`, length
    /// `len() + 1`.
    pub offsets: Vec<u64>,
    /// Precomputed sum of squared feature values per example.
    pub norms: Vec<f32>,
    /// Ranking-group id per example (e.g. a display id).
    pub groups: Vec<u32>,
}

impl DatasetIndex {
    pub fn new() -> Self {
        Self {
            labels: Vec::new(),
            offsets: vec![0],
            norms: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Append one example's metadata. `end_offset` is the cumulative
    /// record count returned by the data writer after the example's
    /// records were appended.
    pub fn push(&mut self, label: f32, end_offset: u64, norm: f32, group: u32) {
        self.labels.push(label);
        self.offsets.push(end_offset);
        self.norms.push(norm);
        self.groups.push(group);
    }

    /// Record range of example `i` in the data file.
    #[inline]
    pub fn example_range(&self, i: usize) -> (u64, u64) {
        (self.offsets[i], self.offsets[i + 1])
    }

    /// Check the array-length invariants required by the binary layout.
    pub(crate) fn validate(&self) -> Result<(), DataError> {
        let size = self.len();

        if self.offsets.len() != size + 1 {
            return Err(DataError::IndexShape {
                what: "offsets",
                expected: size + 1,
                actual: self.offsets.len(),
            });
        }
        if self.norms.len() != size {
            return Err(DataError::IndexShape {
                what: "norms",
                expected: size,
                actual: self.norms.len(),
            });
        }
        if self.groups.len() != size {
            return Err(DataError::IndexShape {
                what: "groups",
                expected: size,
                actual: self.groups.len(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_extends_offsets() {
        let mut index = DatasetIndex::new();
        index.push(1.0, 3, 3.0, 1);
        index.push(-1.0, 7, 4.0, 1);

        assert_eq!(index.len(), 2);
        assert_eq!(index.offsets, vec![0, 3, 7]);
        assert_eq!(index.example_range(1), (3, 7));
    }

    #[test]
    fn validate_accepts_consistent_index() {
        let mut index = DatasetIndex::new();
        index.push(1.0, 2, 2.0, 1);
        assert!(index.validate().is_ok());
    }

    #[test]
    fn validate_rejects_shape_mismatch() {
        let mut index = DatasetIndex::new();
        index.push(1.0, 2, 2.0, 1);
        index.norms.pop();

        let err = index.validate().unwrap_err();
        assert!(matches!(err, DataError::IndexShape { what: "norms", .. }));
    }
}
