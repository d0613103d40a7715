//! Round-trip and streaming tests for the binary dataset codec.

use std::fs::OpenOptions;

use fieldfm::data::{
    read_batch, read_index, write_index, DataError, DataWriter, Dataset, DatasetIndex, Feature,
    FeatureBuilder,
};
use tempfile::TempDir;

fn sample_features() -> Vec<Vec<Feature>> {
    vec![
        vec![Feature::new(0, 5, 1.0), Feature::new(1, 7, 1.0)],
        vec![
            Feature::new(0, 5, 1.0),
            Feature::new(1, 9, 0.5),
            Feature::new(2, 300, 2.0),
        ],
        vec![Feature::new(3, 11, 1.0)],
    ]
}

/// Write a small dataset (index + data) into `dir` under `base`.
fn write_sample(dir: &TempDir, base: &str) -> (String, DatasetIndex) {
    let base = dir.path().join(base).to_str().unwrap().to_string();

    let mut writer = DataWriter::create(format!("{base}.data")).unwrap();
    let mut index = DatasetIndex::new();

    for (i, features) in sample_features().iter().enumerate() {
        let offset = writer.write(features).unwrap();
        let norm: f32 = features.iter().map(|f| f.value * f.value).sum();
        let label = if i == 0 { 1.0 } else { -1.0 };
        index.push(label, offset, norm, i as u32 + 1);
    }
    writer.finish().unwrap();
    write_index(format!("{base}.index"), &index).unwrap();

    (base, index)
}

#[test]
fn index_roundtrip_is_bit_identical() {
    let dir = TempDir::new().unwrap();
    let (base, index) = write_sample(&dir, "roundtrip");

    let loaded = read_index(format!("{base}.index")).unwrap();

    assert_eq!(loaded.labels, index.labels);
    assert_eq!(loaded.offsets, index.offsets);
    assert_eq!(loaded.norms, index.norms);
    assert_eq!(loaded.groups, index.groups);
}

#[test]
fn write_index_rejects_shape_mismatch() {
    let dir = TempDir::new().unwrap();
    let mut index = DatasetIndex::new();
    index.push(1.0, 2, 2.0, 1);
    index.groups.pop();

    let err = write_index(dir.path().join("bad.index"), &index).unwrap_err();
    assert!(matches!(err, DataError::IndexShape { what: "groups", .. }));
}

#[test]
fn read_index_fails_on_truncated_file() {
    let dir = TempDir::new().unwrap();
    let (base, _) = write_sample(&dir, "truncated");

    let path = format!("{base}.index");
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(20).unwrap();

    assert!(matches!(read_index(&path), Err(DataError::Io(_))));
}

#[test]
fn streaming_writer_returns_cumulative_record_counts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stream.data");

    let mut builder = FeatureBuilder::new();
    builder.raw(0, 5, 1.0);
    builder.raw(1, 7, 1.0);
    assert_eq!(builder.norm(), 2.0);

    let mut writer = DataWriter::create(&path).unwrap();
    assert_eq!(writer.write(builder.features()).unwrap(), 2);
    assert_eq!(writer.write(builder.features()).unwrap(), 4);
    assert_eq!(writer.offset(), 4);
    writer.finish().unwrap();
}

#[test]
fn batch_read_equals_full_read_at_any_split() {
    let dir = TempDir::new().unwrap();
    let (base, index) = write_sample(&dir, "split");
    let data = format!("{base}.data");

    let total = *index.offsets.last().unwrap();
    let full = read_batch(&data, 0, total).unwrap();
    assert_eq!(full.len(), total as usize);

    for k in 0..=total {
        let mut parts = read_batch(&data, 0, k).unwrap();
        parts.extend(read_batch(&data, k, total).unwrap());
        assert_eq!(parts, full, "split at {k}");
    }
}

#[test]
fn read_batch_decodes_fields_and_values() {
    let dir = TempDir::new().unwrap();
    let (base, index) = write_sample(&dir, "decode");

    let (from, to) = index.example_range(1);
    let features = read_batch(format!("{base}.data"), from, to).unwrap();

    assert_eq!(features.len(), 3);
    assert_eq!(features[2], Feature::new(2, 300, 2.0));
}

#[test]
fn read_batch_empty_range_reads_nothing() {
    // No file on disk: an empty range must not try to open it.
    let features = read_batch("does/not/exist.data", 5, 5).unwrap();
    assert!(features.is_empty());
}

#[test]
fn read_batch_rejects_reversed_range() {
    let err = read_batch("does/not/exist.data", 7, 3).unwrap_err();
    assert!(matches!(err, DataError::InvalidRange { from: 7, to: 3 }));
}

#[test]
fn read_batch_fails_past_end_of_file() {
    let dir = TempDir::new().unwrap();
    let (base, index) = write_sample(&dir, "past_end");

    let total = *index.offsets.last().unwrap();
    let result = read_batch(format!("{base}.data"), 0, total + 1);
    assert!(matches!(result, Err(DataError::Io(_))));
}

#[test]
fn dataset_open_joins_the_file_pair() {
    let dir = TempDir::new().unwrap();
    let (base, index) = write_sample(&dir, "pair");

    let dataset = Dataset::open(&base).unwrap();
    assert_eq!(dataset.len(), 3);
    assert_eq!(dataset.index.offsets, index.offsets);

    let (from, to) = dataset.index.example_range(0);
    let features = dataset.read_batch(from, to).unwrap();
    assert_eq!(features.len(), 2);
}

#[test]
fn dataset_open_fails_without_files() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("missing");
    assert!(matches!(Dataset::open(base), Err(DataError::Io(_))));
}
