use log::debug;
use nom::IResult;
use nom::number::Endianness;
use nom::number::complete::{f64 as double, u64 as word};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

const WORD: usize = size_of::<u64>();
const DOUBLE: usize = size_of::<f64>();

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record ends inside field `{field}`")]
    Truncated { field: &'static str },

    #[error("cannot allocate {bytes} bytes")]
    Allocation { bytes: usize },

    #[error("record counts overflow the address space")]
    Malformed,

    #[error("record fields disagree: {0}")]
    Inconsistent(&'static str),

    #[error("{0} bytes after the end of the record")]
    TrailingBytes(usize),
}

/// Vectors and the outliers found among them.
///
/// On disk, in order: `num_vectors`, `vector_dims`, the row-major vector
/// data, `k`, the outlier count `N`, `block_size`, `N` outlier indices and
/// `N` outlier scores. Counts and indices are machine words.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRecord {
    pub num_vectors: u64,
    pub vector_dims: u64,
    /// `num_vectors * vector_dims` values, one vector after another.
    pub data: Vec<f64>,
    /// Neighbour rank used to score outliers.
    pub k: u64,
    pub block_size: u64,
    pub outlier_indices: Vec<u64>,
    pub outlier_scores: Vec<f64>,
}

impl DatasetRecord {
    /// Number of recorded outliers.
    pub fn outliers(&self) -> usize {
        self.outlier_indices.len()
    }

    /// Vector `i`, or `None` past the last one.
    pub fn vector(&self, i: usize) -> Option<&[f64]> {
        let dims = usize::try_from(self.vector_dims).ok()?;
        let start = i.checked_mul(dims)?;
        self.data.get(start..start.checked_add(dims)?)
    }

    fn validate(&self) -> Result<(), RecordError> {
        let expected = self
            .num_vectors
            .checked_mul(self.vector_dims)
            .ok_or(RecordError::Malformed)?;
        if expected != self.data.len() as u64 {
            return Err(RecordError::Inconsistent("data length is not num_vectors * vector_dims"));
        }
        if self.outlier_indices.len() != self.outlier_scores.len() {
            return Err(RecordError::Inconsistent("outlier index and score counts differ"));
        }
        Ok(())
    }

    /// Serialized size in bytes.
    pub fn encoded_len(&self) -> usize {
        5 * WORD
            + self.data.len() * DOUBLE
            + self.outlier_indices.len() * WORD
            + self.outlier_scores.len() * DOUBLE
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<(), RecordError> {
        self.validate()?;
        out.write_all(&self.num_vectors.to_ne_bytes())?;
        out.write_all(&self.vector_dims.to_ne_bytes())?;
        for value in &self.data {
            out.write_all(&value.to_ne_bytes())?;
        }
        out.write_all(&self.k.to_ne_bytes())?;
        out.write_all(&(self.outliers() as u64).to_ne_bytes())?;
        out.write_all(&self.block_size.to_ne_bytes())?;
        for index in &self.outlier_indices {
            out.write_all(&index.to_ne_bytes())?;
        }
        for score in &self.outlier_scores {
            out.write_all(&score.to_ne_bytes())?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RecordError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Writes the record to `path`, replacing any existing file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), RecordError> {
        self.validate()?;
        let mut out = BufWriter::new(File::create(path.as_ref())?);
        self.write_to(&mut out)?;
        out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        debug!(
            "saved {} vectors of {} dims to {}",
            self.num_vectors,
            self.vector_dims,
            path.as_ref().display()
        );
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, RecordError> {
        let mut buf = Vec::new();
        File::open(path.as_ref())?.read_to_end(&mut buf)?;
        Self::load_from_bytes(&buf)
    }

    /// Parses a record that must span all of `buf`.
    pub fn load_from_bytes(buf: &[u8]) -> Result<Self, RecordError> {
        let (record, rest) = Self::parse_prefix(buf)?;
        if !rest.is_empty() {
            return Err(RecordError::TrailingBytes(rest.len()));
        }
        Ok(record)
    }

    /// Parses a record from the start of `buf` and returns the bytes after it.
    pub fn parse_prefix(buf: &[u8]) -> Result<(Self, &[u8]), RecordError> {
        let (rest, num_vectors) = field(buf, "num_vectors", word(Endianness::Native))?;
        let (rest, vector_dims) = field(rest, "vector_dims", word(Endianness::Native))?;
        let values = num_vectors
            .checked_mul(vector_dims)
            .ok_or(RecordError::Malformed)?;
        let (rest, data) = array(rest, "data", values, DOUBLE, double(Endianness::Native))?;
        let (rest, k) = field(rest, "k", word(Endianness::Native))?;
        let (rest, outliers) = field(rest, "outlier_count", word(Endianness::Native))?;
        let (rest, block_size) = field(rest, "block_size", word(Endianness::Native))?;
        let (rest, outlier_indices) =
            array(rest, "outlier_indices", outliers, WORD, word(Endianness::Native))?;
        let (rest, outlier_scores) =
            array(rest, "outlier_scores", outliers, DOUBLE, double(Endianness::Native))?;

        Ok((
            Self {
                num_vectors,
                vector_dims,
                data,
                k,
                block_size,
                outlier_indices,
                outlier_scores,
            },
            rest,
        ))
    }
}

fn field<'a, T>(
    input: &'a [u8],
    name: &'static str,
    mut parser: impl FnMut(&'a [u8]) -> IResult<&'a [u8], T>,
) -> Result<(&'a [u8], T), RecordError> {
    parser(input).map_err(|_| RecordError::Truncated { field: name })
}

/// Parses `count` fixed-size elements after checking that the input holds
/// them all, so a corrupt count never drives a large allocation.
fn array<'a, T>(
    input: &'a [u8],
    name: &'static str,
    count: u64,
    elem_size: usize,
    mut parser: impl FnMut(&'a [u8]) -> IResult<&'a [u8], T>,
) -> Result<(&'a [u8], Vec<T>), RecordError> {
    let count = usize::try_from(count).map_err(|_| RecordError::Malformed)?;
    let bytes = count.checked_mul(elem_size).ok_or(RecordError::Malformed)?;
    if bytes > input.len() {
        return Err(RecordError::Truncated { field: name });
    }

    let mut items = Vec::new();
    items
        .try_reserve_exact(count)
        .map_err(|_| RecordError::Allocation { bytes })?;
    let mut rest = input;
    for _ in 0..count {
        let (next, item) = field(rest, name, &mut parser)?;
        items.push(item);
        rest = next;
    }
    Ok((rest, items))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DatasetRecord {
        DatasetRecord {
            num_vectors: 2,
            vector_dims: 3,
            data: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            k: 1,
            block_size: 1,
            outlier_indices: vec![1],
            outlier_scores: vec![2.5],
        }
    }

    #[test]
    fn layout_is_flat_native_words() {
        let bytes = sample().to_bytes().unwrap();
        assert_eq!(bytes.len(), sample().encoded_len());
        assert_eq!(bytes.len(), 5 * 8 + 6 * 8 + 8 + 8);

        let word_at = |i: usize| u64::from_ne_bytes(bytes[i * 8..i * 8 + 8].try_into().unwrap());
        let double_at = |i: usize| f64::from_ne_bytes(bytes[i * 8..i * 8 + 8].try_into().unwrap());
        assert_eq!((word_at(0), word_at(1)), (2, 3));
        assert_eq!(double_at(2), 1.0);
        assert_eq!(double_at(7), 6.0);
        assert_eq!((word_at(8), word_at(9), word_at(10)), (1, 1, 1));
        assert_eq!(word_at(11), 1);
        assert_eq!(double_at(12), 2.5);
    }

    #[test]
    fn rows_are_addressable() {
        let record = sample();
        assert_eq!(record.vector(0), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(record.vector(1), Some(&[4.0, 5.0, 6.0][..]));
        assert_eq!(record.vector(2), None);
    }

    #[test]
    fn every_proper_prefix_is_truncated() {
        let bytes = sample().to_bytes().unwrap();
        for len in 0..bytes.len() {
            assert!(
                matches!(
                    DatasetRecord::load_from_bytes(&bytes[..len]),
                    Err(RecordError::Truncated { .. })
                ),
                "prefix of {} bytes",
                len
            );
        }
    }

    #[test]
    fn huge_counts_do_not_allocate() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&u64::MAX.to_ne_bytes());
        bytes.extend_from_slice(&2u64.to_ne_bytes());
        assert!(matches!(
            DatasetRecord::load_from_bytes(&bytes),
            Err(RecordError::Malformed)
        ));

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(1u64 << 40).to_ne_bytes());
        bytes.extend_from_slice(&1u64.to_ne_bytes());
        assert!(matches!(
            DatasetRecord::load_from_bytes(&bytes),
            Err(RecordError::Truncated { field: "data" })
        ));
    }

    #[test]
    fn inconsistent_records_are_not_written() {
        let mut record = sample();
        record.outlier_scores.clear();
        assert!(matches!(record.to_bytes(), Err(RecordError::Inconsistent(_))));

        let mut record = sample();
        record.data.pop();
        assert!(matches!(record.to_bytes(), Err(RecordError::Inconsistent(_))));
    }

    #[test]
    fn prefix_parse_leaves_the_rest() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes.extend_from_slice(b"tail");
        assert!(matches!(
            DatasetRecord::load_from_bytes(&bytes),
            Err(RecordError::TrailingBytes(4))
        ));
        let (record, rest) = DatasetRecord::parse_prefix(&bytes).unwrap();
        assert_eq!(record, sample());
        assert_eq!(rest, b"tail");
    }
}
