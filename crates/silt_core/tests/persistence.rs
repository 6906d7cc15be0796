//! End-to-end persistence tests over the filesystem backend.
//!
//! Everything in-process is covered by per-module tests against
//! `MemoryDirectory`; these tests close a segment, drop the directory (and
//! with it the advisory lock), and reopen from disk.

use silt_core::{Segment, SegmentConfig, SegmentId, SplitOutcome};
use silt_storage::{FsDirectory, SegmentDirectory};
use std::sync::Arc;

fn config() -> SegmentConfig {
    SegmentConfig::new()
        .max_write_cache_keys(8)
        .max_write_cache_keys_during_maintenance(16)
        .sparse_index_page_len(4)
}

fn key(i: u32) -> Vec<u8> {
    format!("key-{i:04}").into_bytes()
}

fn open(path: &std::path::Path, id: SegmentId) -> Segment {
    let dir: Arc<dyn SegmentDirectory> = Arc::new(FsDirectory::open(path).unwrap());
    Segment::open(dir, id, config()).unwrap()
}

#[test]
fn reopen_after_flush_compaction_and_deletes() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("segments");

    {
        let segment = open(&path, SegmentId::new(1));
        for i in 0..100 {
            segment.put(key(i), i.to_be_bytes().to_vec()).unwrap();
        }
        segment.flush().unwrap();
        segment.force_compact().unwrap();

        for i in 100..150 {
            segment.put(key(i), i.to_be_bytes().to_vec()).unwrap();
        }
        segment.delete(key(0)).unwrap();
        segment.close().unwrap();
    }

    let segment = open(&path, SegmentId::new(1));
    assert_eq!(segment.get(&key(0)).unwrap(), None);
    for i in 1..150 {
        assert_eq!(
            segment.get(&key(i)).unwrap(),
            Some(i.to_be_bytes().to_vec()),
            "key {i} lost across reopen"
        );
    }
    assert_eq!(segment.number_of_keys().unwrap(), 149);
}

#[test]
fn both_halves_of_a_split_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("segments");

    {
        let segment = open(&path, SegmentId::new(1));
        for i in 0..10 {
            segment.put(key(i), b"v".to_vec()).unwrap();
        }

        let plan = segment.split_plan();
        let outcome = segment.split(SegmentId::new(2), plan).unwrap();
        let SplitOutcome::Split { lower, .. } = outcome else {
            panic!("expected a split");
        };

        assert_eq!(lower.number_of_keys().unwrap(), 5);
        assert_eq!(segment.number_of_keys().unwrap(), 5);
        lower.close().unwrap();
        segment.close().unwrap();
    }

    let upper = open(&path, SegmentId::new(1));
    for i in 0..5 {
        assert_eq!(upper.get(&key(i)).unwrap(), None);
    }
    for i in 5..10 {
        assert_eq!(upper.get(&key(i)).unwrap(), Some(b"v".to_vec()));
    }
    drop(upper);

    let lower = open(&path, SegmentId::new(2));
    for i in 0..5 {
        assert_eq!(lower.get(&key(i)).unwrap(), Some(b"v".to_vec()));
    }
    for i in 5..10 {
        assert_eq!(lower.get(&key(i)).unwrap(), None);
    }
}
