//! Binary index and data file codec.
//!
//! # Index layout
//!
//! ```text
//! u64          example count N
//! N   × f32    labels
//! N+1 × u64    offsets (cumulative record counts)
//! N   × f32    norms
//! N   × u32    groups
//! ```
//!
//! # Data layout
//!
//! Flat sequence of 8-byte records: packed `u32` field+index, `f32`
//! value. Addressed by record offset; byte offset = record offset × 8.
//!
//! Everything is little-endian. There is no magic number and no version
//! field — the format is implicit, matching the exporters that produce
//! these files.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::error::DataError;
use super::feature::{Feature, RECORD_SIZE};
use super::index::DatasetIndex;

/// Write a dataset index. Fails if the array-length invariants are
/// violated or the file cannot be written.
pub fn write_index(path: impl AsRef<Path>, index: &DatasetIndex) -> Result<(), DataError> {
    index.validate()?;

    let mut out = BufWriter::new(File::create(path)?);

    out.write_all(&(index.len() as u64).to_le_bytes())?;
    for &label in &index.labels {
        out.write_all(&label.to_le_bytes())?;
    }
    for &offset in &index.offsets {
        out.write_all(&offset.to_le_bytes())?;
    }
    for &norm in &index.norms {
        out.write_all(&norm.to_le_bytes())?;
    }
    for &group in &index.groups {
        out.write_all(&group.to_le_bytes())?;
    }
    out.flush()?;

    Ok(())
}

/// Read a dataset index written by [`write_index`]. Truncated or
/// unreadable files surface as [`DataError::Io`].
pub fn read_index(path: impl AsRef<Path>) -> Result<DatasetIndex, DataError> {
    let mut input = BufReader::new(File::open(path)?);

    let size = read_u64(&mut input)? as usize;

    let mut index = DatasetIndex {
        labels: Vec::with_capacity(size),
        offsets: Vec::with_capacity(size + 1),
        norms: Vec::with_capacity(size),
        groups: Vec::with_capacity(size),
    };

    for _ in 0..size {
        index.labels.push(read_f32(&mut input)?);
    }
    for _ in 0..size + 1 {
        index.offsets.push(read_u64(&mut input)?);
    }
    for _ in 0..size {
        index.norms.push(read_f32(&mut input)?);
    }
    for _ in 0..size {
        index.groups.push(read_u32(&mut input)?);
    }

    Ok(index)
}

/// Read `to - from` feature records at record offset `from` via a
/// positioned read. Returns an empty vector when `from == to` without
/// touching the file.
pub fn read_batch(path: impl AsRef<Path>, from: u64, to: u64) -> Result<Vec<Feature>, DataError> {
    if to < from {
        return Err(DataError::InvalidRange { from, to });
    }
    if to == from {
        return Ok(Vec::new());
    }

    let count = (to - from) as usize;

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(from * RECORD_SIZE as u64))?;

    let mut bytes = vec![0u8; count * RECORD_SIZE];
    file.read_exact(&mut bytes)?;

    let features = bytes
        .chunks_exact(RECORD_SIZE)
        .map(|record| {
            let packed = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
            let value = f32::from_le_bytes([record[4], record[5], record[6], record[7]]);
            Feature::from_packed(packed, value)
        })
        .collect();

    Ok(features)
}

/// Streaming sequential writer for the data file.
///
/// Appends records example by example and reports the cumulative record
/// count after each write, so producers can build the index incrementally
/// while the data file is written once, in order, with no random access.
pub struct DataWriter {
    out: BufWriter<File>,
    offset: u64,
}

impl DataWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, DataError> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
            offset: 0,
        })
    }

    /// Append one example's records; returns the cumulative record count
    /// (the next example's starting offset).
    pub fn write(&mut self, features: &[Feature]) -> Result<u64, DataError> {
        for feature in features {
            self.out.write_all(&feature.packed().to_le_bytes())?;
            self.out.write_all(&feature.value.to_le_bytes())?;
        }
        self.offset += features.len() as u64;
        Ok(self.offset)
    }

    /// Records written so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Flush and close, surfacing any buffered write error.
    pub fn finish(mut self) -> Result<(), DataError> {
        self.out.flush()?;
        Ok(())
    }
}

/// An opened dataset: the index in memory plus the path of the data
/// file, which is streamed in slices during training.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub index: DatasetIndex,
    pub data_path: PathBuf,
}

impl Dataset {
    /// Open the `<base>.index` / `<base>.data` pair.
    pub fn open(base: impl AsRef<Path>) -> Result<Self, DataError> {
        let base = base.as_ref();
        let index = read_index(with_suffix(base, ".index"))?;
        Ok(Self {
            index,
            data_path: with_suffix(base, ".data"),
        })
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Read a record range from the data file.
    pub fn read_batch(&self, from: u64, to: u64) -> Result<Vec<Feature>, DataError> {
        read_batch(&self.data_path, from, to)
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn read_u64(input: &mut impl Read) -> Result<u64, DataError> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_u32(input: &mut impl Read) -> Result<u32, DataError> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f32(input: &mut impl Read) -> Result<f32, DataError> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_appends_to_full_base_name() {
        let path = with_suffix(Path::new("cache/cv1_train"), ".index");
        assert_eq!(path, PathBuf::from("cache/cv1_train.index"));
    }
}
