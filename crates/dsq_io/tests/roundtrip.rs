use dsq_io::{DatasetRecord, RecordError};
use std::fs;

fn scenario() -> DatasetRecord {
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
fn file_round_trip_reproduces_every_field() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dataset.bin");

    scenario().save(&path).unwrap();
    let loaded = DatasetRecord::load_from_file(&path).unwrap();

    assert_eq!(loaded, scenario());
    assert_eq!(loaded.outlier_indices, [1]);
    assert_eq!(loaded.outlier_scores, [2.5]);
    assert_eq!(
        fs::metadata(&path).unwrap().len() as usize,
        scenario().encoded_len()
    );
}

#[test]
fn byte_round_trip_reproduces_every_field() {
    let bytes = scenario().to_bytes().unwrap();
    assert_eq!(DatasetRecord::load_from_bytes(&bytes).unwrap(), scenario());
}

#[test]
fn empty_outlier_set_round_trips() {
    let record = DatasetRecord {
        outlier_indices: Vec::new(),
        outlier_scores: Vec::new(),
        ..scenario()
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.bin");
    record.save(&path).unwrap();
    let loaded = DatasetRecord::load_from_file(&path).unwrap();
    assert_eq!(loaded, record);
    assert_eq!(loaded.outliers(), 0);
}

#[test]
fn short_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.bin");
    let bytes = scenario().to_bytes().unwrap();
    fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

    assert!(matches!(
        DatasetRecord::load_from_file(&path),
        Err(RecordError::Truncated {
            field: "outlier_scores"
        })
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        DatasetRecord::load_from_file(dir.path().join("absent.bin")),
        Err(RecordError::Io(_))
    ));
}
