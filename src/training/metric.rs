//! Ranking metric: mean average precision at rank 12.
//!
//! Examples sharing a group id form one ranking unit (e.g. the ads shown
//! in a single display). Each group contains at most one positive; its
//! contribution is the reciprocal of the positive's rank among the
//! group's predictions when that rank is within the cutoff, and zero
//! otherwise. The metric is the mean over groups.

use crate::data::DatasetIndex;

/// Deepest rank at which a positive still scores.
pub const MAP_CUTOFF: usize = 12;

/// Errors raised by the metric computation.
#[derive(Debug, thiserror::Error)]
pub enum MetricError {
    /// The index's group ids decreased — the dataset is corrupt or
    /// wrongly sorted, which invalidates the whole evaluation.
    #[error("ranking groups must be non-decreasing (violated at example {position})")]
    UnorderedGroups { position: usize },
}

/// Compute MAP@12 over a dataset's groups.
///
/// Requires `index.groups` to be non-decreasing; a decrease is fatal and
/// reported as [`MetricError::UnorderedGroups`].
pub fn mean_average_precision(
    index: &DatasetIndex,
    predictions: &[f32],
) -> Result<f64, MetricError> {
    debug_assert_eq!(predictions.len(), index.len());

    let size = index.len();
    if size == 0 {
        return Ok(0.0);
    }

    let mut total = 0.0f64;
    let mut count = 0u64;

    let mut group_start = 0usize;
    let mut positive: Option<usize> = None;

    for i in 0..size {
        if i > 0 {
            if index.groups[i] < index.groups[i - 1] {
                return Err(MetricError::UnorderedGroups { position: i });
            }
            if index.groups[i] > index.groups[i - 1] {
                total += average_precision(&predictions[group_start..i], positive, group_start);
                count += 1;
                group_start = i;
                positive = None;
            }
        }

        if index.labels[i] > 0.0 {
            positive = Some(i);
        }
    }

    total += average_precision(&predictions[group_start..], positive, group_start);
    count += 1;

    Ok(total / count as f64)
}

/// One group's contribution: `1 / rank` of the positive if it ranks
/// within the cutoff, 0 otherwise (including groups with no positive).
fn average_precision(group: &[f32], positive: Option<usize>, group_start: usize) -> f64 {
    let Some(positive) = positive else {
        return 0.0;
    };

    let target = group[positive - group_start];
    let rank = group.iter().filter(|&&p| p >= target).count();

    if rank <= MAP_CUTOFF {
        1.0 / rank as f64
    } else {
        0.0
    }
}
